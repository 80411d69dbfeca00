pub mod contract;
pub mod model;
pub mod trainer;

pub use contract::TensorContract;
pub use model::{FlavorTagger, TaggerConfig};
pub use trainer::{fit_generator, EpochSummary, FitHistory, StepMetrics, Trainer};
