//! Error taxonomy for the batching core.
//!
//! Public operations return `anyhow::Result`, but every failure listed here is
//! raised as a [`DataError`] so callers can recover the category with
//! `err.downcast_ref::<DataError>()`, even after context has been attached.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataError {
    /// A requested field is not part of the collection schema.
    #[error("Schema error: field '{field}' not found. Available fields: {available:?}")]
    Schema {
        field: String,
        available: Vec<String>,
    },

    /// A flatten or stream was configured with no fields at all.
    #[error("Empty selection: at least one field name must be requested")]
    EmptySelection,

    /// A read window falls outside the collections.
    #[error("Range error: window start={start}, length={length} is outside 0..{total}")]
    Range {
        start: usize,
        length: usize,
        total: usize,
    },

    /// The backing store cannot be opened, parsed, or read.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid stream or trainer configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DataError {
    pub(crate) fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

/// Fails with [`DataError::Range`] unless `[start, start + length)` is a
/// non-empty window inside `0..total`.
pub(crate) fn check_window(start: usize, length: usize, total: usize) -> Result<(), DataError> {
    let fits = start
        .checked_add(length)
        .is_some_and(|end| length > 0 && end <= total);
    if fits {
        Ok(())
    } else {
        Err(DataError::Range {
            start,
            length,
            total,
        })
    }
}

/// Returns the [`DataError`] category of an `anyhow` error, if it has one.
pub fn category(err: &anyhow::Error) -> Option<&DataError> {
    err.downcast_ref::<DataError>()
}
