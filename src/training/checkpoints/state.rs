//! Persisted unit of training progress

use serde::{Deserialize, Serialize};

/// Training progress as written to a checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingState {
    /// Next epoch to run
    pub epoch: usize,

    /// Epoch that produced `best_score`
    pub best_epoch: usize,

    /// Highest validation accuracy observed, in [0, 1]
    pub best_score: f64,

    /// Opaque model parameter blob
    pub model_parameters: Vec<u8>,

    /// Opaque optimizer state blob
    pub optimizer_state: Vec<u8>,
}

impl TrainingState {
    /// Zeroed state for a fresh run
    pub fn new() -> Self {
        Self {
            epoch: 0,
            best_epoch: 0,
            best_score: 0.0,
            model_parameters: Vec::new(),
            optimizer_state: Vec::new(),
        }
    }

    /// Record the validation score of `epoch`.
    ///
    /// Returns `true` and moves the best-score bookkeeping only when `score`
    /// strictly exceeds the current best, so `best_score` never decreases.
    pub fn observe_score(&mut self, epoch: usize, score: f64) -> bool {
        if score > self.best_score {
            self.best_score = score;
            self.best_epoch = epoch;
            true
        } else {
            false
        }
    }
}

impl Default for TrainingState {
    fn default() -> Self {
        Self::new()
    }
}
