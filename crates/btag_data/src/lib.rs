pub mod batch;
pub mod config;
pub mod cursor;
pub mod error;
pub mod flatten;
pub mod records;
pub mod sampler;
pub mod source;
pub mod store;
pub mod streamer;
pub mod synth;

pub use batch::Batch;
pub use config::StreamConfig;
pub use cursor::AlignedCursor;
pub use error::DataError;
pub use flatten::{flatten, flatten_all, RecordFlattener};
pub use records::{Column, FieldType, RecordArray, Schema};
pub use source::{EventSource, InMemorySource};
pub use streamer::BatchStreamer;
