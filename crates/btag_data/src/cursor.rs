use crate::error::{check_window, DataError};
use crate::records::{RecordArray, Schema};
use crate::source::{check_alignment, EventSource};
use crate::store::{CollectionLayout, StoreLayout};
use anyhow::{Context, Result};
use memmap2::Mmap;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default name of the per-event collection.
pub const EVENTS_COLLECTION: &str = "jets";
/// Default name of the per-event, per-sub-object collection.
pub const SUBOBJECTS_COLLECTION: &str = "tracks";

/// Windowed, aligned reads over the two collections of an on-disk store.
///
/// The store file is mapped read-only once at [`open`](Self::open); the
/// layout, event count and schemas are parsed from its header at that point and
/// never re-derived. Each [`read`](EventSource::read) decodes only the bytes of
/// the requested window, so the full dataset is never materialized.
///
/// The mapping is owned exclusively by the cursor. It is released by
/// [`close`](Self::close), or when the cursor is dropped on any other path,
/// including unwinding from an error.
///
/// # Example
/// ```ignore
/// let mut cursor = AlignedCursor::open("events.safetensors")?;
/// let (jets, tracks) = cursor.read(0, 3)?;
/// assert_eq!(jets.len(), tracks.len());
/// cursor.close();
/// ```
#[derive(Debug)]
pub struct AlignedCursor {
    path: PathBuf,
    mmap: Mmap,
    events: CollectionLayout,
    subobjects: CollectionLayout,
    event_schema: Schema,
    subobject_schema: Schema,
    total_events: usize,
}

impl AlignedCursor {
    /// Opens a store with the default `jets`/`tracks` collection names.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, EVENTS_COLLECTION, SUBOBJECTS_COLLECTION)
    }

    /// Opens a store, reading events from `events` and sub-objects from
    /// `subobjects`.
    ///
    /// # Errors
    /// Fails with [`DataError::Storage`] if the file cannot be opened or
    /// mapped, is not a valid store, lacks either collection, or the two
    /// collections do not share their leading dimension.
    pub fn open_with(path: impl AsRef<Path>, events: &str, subobjects: &str) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| {
            DataError::storage(format!("Failed to open store {}: {}", path.display(), e))
        })?;

        // SAFETY: The file is opened read-only and the mapping is never written
        // through. Concurrent truncation by another process is outside our control.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| {
            DataError::storage(format!("Failed to map store {}: {}", path.display(), e))
        })?;

        let layout = StoreLayout::parse(&mmap)
            .with_context(|| format!("Failed to read store header: {}", path.display()))?;
        let events = layout.collection(events)?.clone();
        let subobjects = layout.collection(subobjects)?.clone();
        let total_events = check_alignment(events.shape(), subobjects.shape())?;

        info!(
            path = %path.display(),
            total_events,
            capacity = subobjects.shape()[1],
            event_fields = events.schema().len(),
            subobject_fields = subobjects.schema().len(),
            "opened record store"
        );

        Ok(Self {
            event_schema: events.schema(),
            subobject_schema: subobjects.schema(),
            path,
            mmap,
            events,
            subobjects,
            total_events,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Releases the mapping. Equivalent to dropping the cursor, but explicit at
    /// call sites that own the cursor's lifetime.
    pub fn close(self) {
        debug!(path = %self.path.display(), "closing record store");
        drop(self);
    }
}

impl EventSource for AlignedCursor {
    fn total_events(&self) -> usize {
        self.total_events
    }

    fn event_schema(&self) -> &Schema {
        &self.event_schema
    }

    fn subobject_schema(&self) -> &Schema {
        &self.subobject_schema
    }

    fn read(&mut self, start: usize, length: usize) -> Result<(RecordArray, RecordArray)> {
        check_window(start, length, self.total_events)?;
        debug!(start, length, "reading window");
        let events = self.events.read_window(&self.mmap, start, length)?;
        let subobjects = self.subobjects.read_window(&self.mmap, start, length)?;
        Ok((events, subobjects))
    }
}
