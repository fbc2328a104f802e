//! Training infrastructure for Siamese one-shot models
//!
//! # Main Components
//!
//! - **Trainer**: the epoch state machine ([`TrainingLoop`])
//! - **Evaluation**: one-shot trial scoring ([`EvaluationLoop`])
//! - **Checkpoints**: append-only history plus a canonical best record
//! - **Data**: pair and trial providers over folder datasets
//! - **Metrics**: running loss averages and per-epoch summaries
//! - **Optimizers**: Adam with serializable state
//! - **Logs**: append-only `train.csv` / `valid.csv` sinks

pub mod checkpoints;
pub mod data;
pub mod evaluation;
pub mod events;
pub mod logs;
pub mod loss;
pub mod metrics;
pub mod optimizers;
pub mod trainer;

// Tests module
#[cfg(test)]
pub mod tests;

// Trainer re-exports
pub use trainer::{
    StopReason, TrainingInputs, TrainingLoop, TrainingOutcome, TrainingSettings, TrainingStatus,
};

// Component re-exports
pub use checkpoints::{CheckpointStore, TrainingState};
pub use evaluation::{EvaluationLoop, EvaluationReport};
pub use events::{EventSink, TrainingEvent};
pub use logs::LogSinks;
pub use loss::{BceWithLogitsLoss, PairLoss};
pub use metrics::{EpochMetrics, MetricsAccumulator};
pub use optimizers::{Adam, AdamParams, ParamOptimizer};
