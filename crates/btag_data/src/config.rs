//! Configuration for BatchStreamer behaviour
//!
//! The `StreamConfig` struct names the fields that become model inputs and
//! targets, and the window size used to walk the source.
//!
//! Example:
//! ```ignore
//! let config = StreamConfig::builder()
//!     .batch_size(100)
//!     .event_fields(["pt", "eta"])
//!     .subobject_fields(["d0", "charge"])
//!     .label_field("LabDr_HadF")
//!     .label_codes([0, 4, 5, 15])
//!     .aux_target_field("mv2c10")
//!     .build();
//! ```
//!
//! The same configuration can be loaded from JSON; missing keys fall back to
//! the defaults:
//! ```json
//! { "batch_size": 50, "subobject_fields": ["d0", "z0", "charge"], "shuffle": true }
//! ```

use crate::error::DataError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for BatchStreamer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Number of consecutive events per batch
    pub batch_size: usize,
    /// Per-event fields flattened into the `vertices` input, in output order
    pub event_fields: Vec<String>,
    /// Per-sub-object fields flattened into the `tracks` input, in output order
    pub subobject_fields: Vec<String>,
    /// Per-event field holding the integer class code
    pub label_field: String,
    /// Class codes; position `j` is column `j` of the one-hot target
    pub label_codes: Vec<i64>,
    /// Per-event field passed through as the auxiliary regression target
    pub aux_target_field: String,
    /// Visit windows in a per-epoch shuffled order instead of ascending order
    pub shuffle: bool,
    /// Base seed for window shuffling (0 if not specified)
    pub seed: Option<u64>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            event_fields: vec!["pt".into(), "eta".into()],
            subobject_fields: vec!["d0".into(), "charge".into()],
            label_field: "LabDr_HadF".into(),
            label_codes: vec![0, 4, 5, 15],
            aux_target_field: "mv2c10".into(),
            shuffle: false,
            seed: None,
        }
    }
}

impl StreamConfig {
    pub fn builder() -> StreamConfigBuilder {
        StreamConfigBuilder::default()
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read stream config: {}", path.display()))?;
        serde_json::from_str(&text).map_err(|e| {
            DataError::config(format!(
                "Invalid stream config {}: {}",
                path.display(),
                e
            ))
            .into()
        })
    }

    /// Checks the configuration against a source of `total_events` events.
    pub fn validate(&self, total_events: usize) -> Result<()> {
        if self.batch_size == 0 {
            return Err(DataError::config("batch_size must be > 0").into());
        }
        if self.batch_size > total_events {
            return Err(DataError::config(format!(
                "batch_size ({}) exceeds the number of events ({})",
                self.batch_size, total_events
            ))
            .into());
        }
        if self.event_fields.is_empty() || self.subobject_fields.is_empty() {
            return Err(DataError::EmptySelection.into());
        }
        if self.label_codes.is_empty() {
            return Err(DataError::config("label_codes must name at least one class").into());
        }
        Ok(())
    }

    pub fn num_classes(&self) -> usize {
        self.label_codes.len()
    }
}

/// Builder for StreamConfig with method chaining
#[derive(Default)]
pub struct StreamConfigBuilder {
    config: StreamConfig,
}

impl StreamConfigBuilder {
    /// Set the number of events per batch (must be > 0)
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    pub fn event_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.event_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn subobject_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.subobject_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn label_field(mut self, field: impl Into<String>) -> Self {
        self.config.label_field = field.into();
        self
    }

    pub fn label_codes(mut self, codes: impl IntoIterator<Item = i64>) -> Self {
        self.config.label_codes = codes.into_iter().collect();
        self
    }

    pub fn aux_target_field(mut self, field: impl Into<String>) -> Self {
        self.config.aux_target_field = field.into();
        self
    }

    /// Set whether to shuffle window order every epoch
    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.config.shuffle = shuffle;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    /// Build the final configuration.
    pub fn build(self) -> StreamConfig {
        self.config
    }
}
