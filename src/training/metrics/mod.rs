//! Metrics for training progress
//!
//! Per-batch statistics are folded into a [`MetricsAccumulator`]; each epoch
//! is summarised as one [`EpochMetrics`] record.

pub mod aggregators;

pub use aggregators::MetricsAccumulator;

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Summary of one completed epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// Epoch index
    pub epoch: usize,

    /// Sample-weighted mean training loss
    pub train_loss: f64,

    /// Validation accuracy in [0, 1]
    pub valid_accuracy: f64,

    /// Best validation accuracy so far, including this epoch
    pub best_accuracy: f64,

    /// Epoch that produced `best_accuracy`
    pub best_epoch: usize,

    /// Wall time spent on the epoch
    pub duration: Duration,
}
