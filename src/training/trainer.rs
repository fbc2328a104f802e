//! Epoch-level training loop
//!
//! [`TrainingLoop`] owns the live [`TrainingState`] for the duration of a run
//! and walks the state machine
//! `Initializing → EpochTraining → EpochValidating → CheckpointDecision`,
//! looping until the epoch budget is spent or patience runs out.
//! Any failure inside an epoch aborts the run and is reported with the epoch
//! and phase it happened in.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use candle_core::DType;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Phase, Result};
use crate::model::SiameseModel;
use crate::training::checkpoints::{CheckpointStore, TrainingState};
use crate::training::data::{PairBatch, PairSource, TrialSource};
use crate::training::evaluation::{EvaluationLoop, EvaluationReport};
use crate::training::events::{EventSink, TrainingEvent};
use crate::training::logs::LogSinks;
use crate::training::loss::PairLoss;
use crate::training::metrics::{EpochMetrics, MetricsAccumulator};
use crate::training::optimizers::ParamOptimizer;

/// Loop parameters taken from [`Config`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSettings {
    /// Epoch budget
    pub epochs: usize,
    /// Epochs tolerated without improvement
    pub train_patience: usize,
    /// Non-best epochs are checkpointed when `epoch % checkpoint_interval == 0`
    pub checkpoint_interval: usize,
    /// Restore the most recent checkpoint before training
    pub resume: bool,
}

impl TrainingSettings {
    /// Extract loop parameters from a validated config
    pub fn from_config(config: &Config) -> Self {
        Self {
            epochs: config.epochs,
            train_patience: config.train_patience,
            checkpoint_interval: config.checkpoint_interval,
            resume: config.resume,
        }
    }
}

/// Capabilities a [`TrainingLoop`] drives
pub struct TrainingInputs {
    /// Network being trained
    pub model: Box<dyn SiameseModel>,
    /// Parameter update rule
    pub optimizer: Box<dyn ParamOptimizer>,
    /// Pair loss
    pub loss: Box<dyn PairLoss>,
    /// Training batches
    pub train_pairs: Box<dyn PairSource>,
    /// Validation trials
    pub valid_trials: Box<dyn TrialSource>,
}

/// Where the state machine currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainingStatus {
    /// Not yet started
    Idle,
    /// Restoring state and opening log sinks
    Initializing,
    /// Forward/backward/update over the training batches
    EpochTraining,
    /// Running validation trials
    EpochValidating,
    /// Updating best-score bookkeeping and writing checkpoints
    CheckpointDecision,
    /// Finished, by budget, early stop or failure
    Stopped,
}

impl TrainingStatus {
    fn phase(self) -> Option<Phase> {
        match self {
            TrainingStatus::Initializing => Some(Phase::Initializing),
            TrainingStatus::EpochTraining => Some(Phase::Training),
            TrainingStatus::EpochValidating => Some(Phase::Validating),
            TrainingStatus::CheckpointDecision => Some(Phase::Checkpointing),
            TrainingStatus::Idle | TrainingStatus::Stopped => None,
        }
    }
}

/// Why a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// The epoch budget was spent
    Completed,
    /// Patience ran out
    EarlyStopped,
}

/// Summary of a finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingOutcome {
    /// Epochs executed by this call
    pub epochs_run: usize,
    /// Next epoch a resumed run would start at
    pub next_epoch: usize,
    /// Best validation accuracy of the whole run, including restored history
    pub best_score: f64,
    /// Epoch that produced `best_score`
    pub best_epoch: usize,
    /// Why the loop ended
    pub stop_reason: StopReason,
    /// Per-epoch summaries of this call
    pub history: Vec<EpochMetrics>,
}

/// What the checkpoint decision concluded for one epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Stop,
    Save { is_best: bool },
    Continue,
}

/// Main training loop
pub struct TrainingLoop {
    settings: TrainingSettings,
    model: Box<dyn SiameseModel>,
    optimizer: Box<dyn ParamOptimizer>,
    loss_fn: Box<dyn PairLoss>,
    train_pairs: Box<dyn PairSource>,
    valid_trials: Box<dyn TrialSource>,
    store: CheckpointStore,
    logs_dir: PathBuf,
    state: TrainingState,
    epochs_without_improvement: usize,
    status: TrainingStatus,
    events: EventSink,
}

impl TrainingLoop {
    /// Create a loop writing checkpoints to `store` and logs to `logs_dir`
    pub fn new(
        settings: TrainingSettings,
        inputs: TrainingInputs,
        store: CheckpointStore,
        logs_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        if settings.checkpoint_interval == 0 {
            return Err(Error::config("checkpoint_interval must be > 0"));
        }
        Ok(Self {
            settings,
            model: inputs.model,
            optimizer: inputs.optimizer,
            loss_fn: inputs.loss,
            train_pairs: inputs.train_pairs,
            valid_trials: inputs.valid_trials,
            store,
            logs_dir: logs_dir.into(),
            state: TrainingState::new(),
            epochs_without_improvement: 0,
            status: TrainingStatus::Idle,
            events: EventSink::disabled(),
        })
    }

    /// Set up event monitoring
    pub fn with_event_monitoring(mut self, tx: mpsc::UnboundedSender<TrainingEvent>) -> Self {
        self.events = EventSink::new(tx);
        self
    }

    /// Publish events through an existing sink
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Live training state
    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    /// Current position in the state machine
    pub fn status(&self) -> TrainingStatus {
        self.status
    }

    /// Consecutive epochs without a strictly better validation score
    pub fn epochs_without_improvement(&self) -> usize {
        self.epochs_without_improvement
    }

    /// Model being trained
    pub fn model(&self) -> &dyn SiameseModel {
        &*self.model
    }

    /// Run until the epoch budget is spent or patience runs out.
    ///
    /// Log sinks are closed on every exit path.
    pub fn run(&mut self) -> Result<TrainingOutcome> {
        self.status = TrainingStatus::Initializing;
        let initialized = self.initialize();
        // Reported after a resume has restored the epoch to start from
        self.transition(self.state.epoch, TrainingStatus::Initializing);
        let mut sinks = match initialized {
            Ok(sinks) => sinks,
            Err(e) => {
                self.status = TrainingStatus::Stopped;
                return Err(e.in_phase(self.state.epoch, Phase::Initializing));
            }
        };

        let result = self.run_epochs(&mut sinks);
        let closed = sinks.close();
        self.status = TrainingStatus::Stopped;

        let outcome = result?;
        closed?;

        info!(
            "Training finished after {} epochs ({:?}); best valid acc {:.3} @ epoch {}",
            outcome.epochs_run, outcome.stop_reason, outcome.best_score, outcome.best_epoch
        );
        self.events.send(TrainingEvent::TrainingCompleted {
            epochs_run: outcome.epochs_run,
            best_score: outcome.best_score,
            best_epoch: outcome.best_epoch,
        });
        Ok(outcome)
    }

    fn initialize(&mut self) -> Result<LogSinks> {
        if self.settings.resume {
            let state = self.store.load(false)?;
            self.model.load_state_dict(&state.model_parameters)?;
            self.optimizer.load_state_dict(&state.optimizer_state)?;
            info!(
                "Resuming at epoch {} (best valid acc {:.3} @ epoch {})",
                state.epoch, state.best_score, state.best_epoch
            );
            self.state = state;
        } else {
            if let Some(latest) = self.store.latest()? {
                return Err(Error::config(format!(
                    "{} already holds checkpoint history (latest {}); enable resume or pick another num_model",
                    self.store.dir().display(),
                    latest.path.display()
                )));
            }
            self.state = TrainingState::new();
        }
        self.epochs_without_improvement = 0;

        let sinks = LogSinks::open(&self.logs_dir, self.settings.resume)?;
        info!(
            "Training with {} ({} parameter tensors), optimizer {} at lr {:.2e}",
            self.loss_fn.name(),
            self.model.named_vars().len(),
            self.optimizer.name(),
            self.optimizer.learning_rate()
        );
        Ok(sinks)
    }

    fn run_epochs(&mut self, sinks: &mut LogSinks) -> Result<TrainingOutcome> {
        let total_epochs = self.settings.epochs;
        let first_epoch = self.state.epoch;
        if first_epoch >= total_epochs {
            warn!(
                "Checkpoint is already at epoch {}, budget is {} epochs; nothing to train",
                first_epoch, total_epochs
            );
        }

        let mut history = Vec::new();
        let mut stop_reason = StopReason::Completed;

        for epoch in first_epoch..total_epochs {
            let epoch_start = Instant::now();
            info!("Epoch: {}/{}", epoch + 1, total_epochs);
            self.events.send(TrainingEvent::EpochStarted { epoch, total_epochs });

            self.transition(epoch, TrainingStatus::EpochTraining);
            let train_loss = self
                .train_epoch(epoch, sinks)
                .map_err(|e| e.in_phase(epoch, Phase::Training))?;

            self.transition(epoch, TrainingStatus::EpochValidating);
            let report = self
                .validate(epoch, sinks)
                .map_err(|e| e.in_phase(epoch, Phase::Validating))?;

            self.transition(epoch, TrainingStatus::CheckpointDecision);
            let decision = self.decide(epoch, report.accuracy);

            let metrics = self.epoch_metrics(epoch, train_loss, &report, epoch_start.elapsed());
            info!(
                "train loss: {:.4} - val acc: {:.3}{}",
                metrics.train_loss,
                metrics.valid_accuracy,
                if matches!(decision, Decision::Save { is_best: true }) { " [*]" } else { "" }
            );
            self.events.send(TrainingEvent::EpochCompleted {
                metrics: metrics.clone(),
            });
            history.push(metrics);

            match decision {
                Decision::Stop => {
                    info!("[!] No improvement in {} epochs, stopping training", self.epochs_without_improvement);
                    self.events.send(TrainingEvent::EarlyStopping {
                        epoch,
                        epochs_without_improvement: self.epochs_without_improvement,
                    });
                    stop_reason = StopReason::EarlyStopped;
                    break;
                }
                Decision::Save { is_best } => self
                    .checkpoint(is_best)
                    .map_err(|e| e.in_phase(epoch, Phase::Checkpointing))?,
                Decision::Continue => {}
            }
        }

        Ok(TrainingOutcome {
            epochs_run: history.len(),
            next_epoch: self.state.epoch,
            best_score: self.state.best_score,
            best_epoch: self.state.best_epoch,
            stop_reason,
            history,
        })
    }

    fn train_epoch(&mut self, epoch: usize, sinks: &mut LogSinks) -> Result<f64> {
        self.model.set_training(true);
        self.train_pairs.start_epoch(epoch)?;
        let num_batches = self.train_pairs.num_batches();

        let mut losses = MetricsAccumulator::new();
        let mut batch_idx = 0;
        while let Some(batch) = self.train_pairs.next_batch()? {
            let global_step = epoch * num_batches + batch_idx;
            let loss = self.train_step(&batch)?;
            losses.update(loss, batch.size() as f64);
            sinks.train.append(global_step, loss)?;

            self.events.send(TrainingEvent::BatchCompleted {
                epoch,
                global_step,
                loss,
                average_loss: losses.average(),
            });
            batch_idx += 1;
        }

        if batch_idx == 0 {
            warn!("Epoch {} produced no training batches", epoch);
        }
        debug!(
            "Epoch {}: {} batches, {} optimizer steps total",
            epoch,
            batch_idx,
            self.optimizer.step_count()
        );
        Ok(losses.average())
    }

    /// Forward, loss, backward and one optimizer update
    fn train_step(&mut self, batch: &PairBatch) -> Result<f64> {
        let logits = self.model.forward(&batch.left, &batch.right)?;
        let loss = self.loss_fn.compute(&logits, &batch.labels)?;

        let value = loss.sum_all()?.to_dtype(DType::F32)?.to_scalar::<f32>()? as f64;
        if !value.is_finite() {
            return Err(Error::numeric(format!("training loss became {value}")));
        }

        let gradients = loss.backward()?;
        self.optimizer.step(&gradients)?;
        Ok(value)
    }

    fn validate(&mut self, epoch: usize, sinks: &mut LogSinks) -> Result<EvaluationReport> {
        self.model.set_training(false);
        let report = EvaluationLoop::new(&*self.model, Phase::Validating)
            .with_events(self.events.clone())
            .run(self.valid_trials.as_mut())?;

        sinks.valid.append(epoch, report.accuracy)?;
        self.events.send(TrainingEvent::ValidationCompleted {
            epoch,
            accuracy: report.accuracy,
        });
        Ok(report)
    }

    fn decide(&mut self, epoch: usize, accuracy: f64) -> Decision {
        let is_best = self.state.observe_score(epoch, accuracy);
        self.state.epoch = epoch + 1;

        if is_best {
            self.epochs_without_improvement = 0;
        } else {
            self.epochs_without_improvement += 1;
            if self.epochs_without_improvement >= self.settings.train_patience {
                return Decision::Stop;
            }
        }

        let on_cadence = epoch % self.settings.checkpoint_interval == 0;
        let is_final = epoch + 1 == self.settings.epochs;
        if is_best || on_cadence || is_final {
            Decision::Save { is_best }
        } else {
            Decision::Continue
        }
    }

    fn checkpoint(&mut self, is_best: bool) -> Result<()> {
        self.state.model_parameters = self.model.state_dict()?;
        self.state.optimizer_state = self.optimizer.state_dict()?;

        let path = self.store.save(&self.state, false)?;
        self.events.send(TrainingEvent::CheckpointSaved { path, is_best: false });

        if is_best {
            let path = self.store.save(&self.state, true)?;
            self.events.send(TrainingEvent::CheckpointSaved { path, is_best: true });
        }
        debug!("Checkpointed epoch {} (best: {})", self.state.epoch, is_best);
        Ok(())
    }

    fn epoch_metrics(
        &self,
        epoch: usize,
        train_loss: f64,
        report: &EvaluationReport,
        duration: Duration,
    ) -> EpochMetrics {
        EpochMetrics {
            epoch,
            train_loss,
            valid_accuracy: report.accuracy,
            best_accuracy: self.state.best_score,
            best_epoch: self.state.best_epoch,
            duration,
        }
    }

    fn transition(&mut self, epoch: usize, status: TrainingStatus) {
        self.status = status;
        if let Some(phase) = status.phase() {
            self.events.send(TrainingEvent::PhaseChanged { epoch, phase });
        }
    }
}
