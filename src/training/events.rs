//! Structured progress events
//!
//! The loops never print progress. They publish [`TrainingEvent`]s that an
//! external reporter can subscribe to with an unbounded channel.

use std::path::PathBuf;

use tokio::sync::mpsc;

use crate::error::Phase;
use crate::training::metrics::EpochMetrics;

/// Training events for monitoring
#[derive(Debug, Clone, PartialEq)]
pub enum TrainingEvent {
    /// An epoch is about to start
    EpochStarted {
        /// Zero-based epoch index
        epoch: usize,
        /// Epoch budget of the run
        total_epochs: usize,
    },
    /// The state machine entered `phase`
    PhaseChanged {
        /// Epoch the phase belongs to
        epoch: usize,
        /// Phase entered
        phase: Phase,
    },
    /// One optimizer update finished
    BatchCompleted {
        /// Zero-based epoch index
        epoch: usize,
        /// Batch counter across epochs
        global_step: usize,
        /// Loss of this batch
        loss: f64,
        /// Sample-weighted mean loss of the epoch so far
        average_loss: f64,
    },
    /// One trial was judged
    TrialEvaluated {
        /// Validation or testing
        phase: Phase,
        /// Zero-based trial index
        trial: usize,
        /// Trials in the pass
        total: usize,
        /// Whether the true match scored highest
        correct: bool,
        /// Accuracy over the trials judged so far
        running_accuracy: f64,
    },
    /// The validation pass of an epoch finished
    ValidationCompleted {
        /// Zero-based epoch index
        epoch: usize,
        /// Validation accuracy in [0, 1]
        accuracy: f64,
    },
    /// Training and validation of an epoch finished
    EpochCompleted {
        /// Summary of the epoch
        metrics: EpochMetrics,
    },
    /// A checkpoint record was written
    CheckpointSaved {
        /// Record location
        path: PathBuf,
        /// Whether this is the canonical best record
        is_best: bool,
    },
    /// Patience ran out
    EarlyStopping {
        /// Epoch at which training stopped
        epoch: usize,
        /// Consecutive epochs without improvement
        epochs_without_improvement: usize,
    },
    /// The run ended without error
    TrainingCompleted {
        /// Epochs run in this call
        epochs_run: usize,
        /// Best validation accuracy
        best_score: f64,
        /// Epoch that produced `best_score`
        best_epoch: usize,
    },
}

/// Optional sending half of an event channel
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<TrainingEvent>>,
}

impl EventSink {
    /// Publish to `tx`
    pub fn new(tx: mpsc::UnboundedSender<TrainingEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Drop every event
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Send an event; a closed receiver is ignored
    pub fn send(&self, event: TrainingEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
