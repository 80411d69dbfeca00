use crate::error::DataError;
use crate::records::{RecordArray, Schema};
use anyhow::Result;

/// An `EventSource` provides windowed access to two aligned record
/// collections: one record per event, and one padded sequence of sub-records
/// per event.
///
/// Implementations can be either:
/// - On disk (`AlignedCursor`) for stores that should never be fully loaded,
/// - In memory (`InMemorySource`) for small samples and tests.
///
/// Reads take `&mut self`: a source is owned by one consumer at a time.
pub trait EventSource {
    /// Number of events shared by both collections.
    fn total_events(&self) -> usize;

    /// Schema of the per-event collection (`jets`).
    fn event_schema(&self) -> &Schema;

    /// Schema of the per-event, per-sub-object collection (`tracks`).
    fn subobject_schema(&self) -> &Schema;

    /// Reads events `[start, start + length)` from both collections.
    ///
    /// Both returned arrays have leading dimension `length` and row `i` of
    /// each describes the same event.
    fn read(&mut self, start: usize, length: usize) -> Result<(RecordArray, RecordArray)>;

    /// Fixed number of sub-object slots per event.
    fn subobject_capacity(&self) -> usize {
        self.subobject_schema()
            .event_shape()
            .first()
            .copied()
            .unwrap_or(0)
    }

    /// Last start offset from which a full window of `batch_size` events fits.
    fn usable_span(&self, batch_size: usize) -> Result<usize> {
        let total = self.total_events();
        if batch_size == 0 || batch_size > total {
            return Err(DataError::config(format!(
                "batch_size must be in 1..={} for this source, but got batch_size={}",
                total, batch_size
            ))
            .into());
        }
        Ok(total - batch_size)
    }
}

/// Checks the event/sub-object rank contract and the shared leading dimension.
pub(crate) fn check_alignment(
    events_shape: &[usize],
    subobjects_shape: &[usize],
) -> std::result::Result<usize, DataError> {
    if events_shape.len() != 1 {
        return Err(DataError::storage(format!(
            "Event collection must have rank 1, but has shape {:?}",
            events_shape
        )));
    }
    if subobjects_shape.len() != 2 {
        return Err(DataError::storage(format!(
            "Sub-object collection must have rank 2 (events x sub-objects), but has shape {:?}",
            subobjects_shape
        )));
    }
    if events_shape[0] != subobjects_shape[0] {
        return Err(DataError::storage(format!(
            "Collections are not aligned: {} events vs {} sub-object rows",
            events_shape[0], subobjects_shape[0]
        )));
    }
    Ok(events_shape[0])
}

/// An `EventSource` over two record arrays held in memory.
#[derive(Debug, Clone)]
pub struct InMemorySource {
    events: RecordArray,
    subobjects: RecordArray,
    event_schema: Schema,
    subobject_schema: Schema,
}

impl InMemorySource {
    pub fn new(events: RecordArray, subobjects: RecordArray) -> Result<Self> {
        check_alignment(events.shape(), subobjects.shape())?;
        Ok(Self {
            event_schema: events.schema(),
            subobject_schema: subobjects.schema(),
            events,
            subobjects,
        })
    }
}

impl EventSource for InMemorySource {
    fn total_events(&self) -> usize {
        self.events.len()
    }

    fn event_schema(&self) -> &Schema {
        &self.event_schema
    }

    fn subobject_schema(&self) -> &Schema {
        &self.subobject_schema
    }

    fn read(&mut self, start: usize, length: usize) -> Result<(RecordArray, RecordArray)> {
        Ok((
            self.events.slice_events(start, length)?,
            self.subobjects.slice_events(start, length)?,
        ))
    }
}
