//! Serialized optimizer state

use serde::{Deserialize, Serialize};

use crate::model::TensorRecord;

/// Optimizer state dictionary for checkpointing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerStateDict {
    /// Optimizer type
    pub optimizer_type: String,

    /// Updates applied so far
    pub step_count: usize,

    /// Learning rate at save time
    pub learning_rate: f64,

    /// First moment estimates, keyed by parameter name
    pub first_moment: Vec<TensorRecord>,

    /// Second moment estimates, keyed by parameter name
    pub second_moment: Vec<TensorRecord>,
}
