//! Top-level train/test entry points
//!
//! [`TrainerController`] turns an immutable [`Config`] into a wired
//! [`TrainingLoop`] or a one-off test pass. Which model, optimizer, loss and
//! data providers get wired is decided by a [`TrainingComponents`]
//! implementation; [`StandardComponents`] reads folder datasets from
//! `data_dir` and trains a [`SiameseNet`] with Adam.

use std::sync::Arc;

use candle_core::Device;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::error::{Phase, Result};
use crate::model::{SiameseModel, SiameseNet, SiameseNetConfig};
use crate::training::checkpoints::CheckpointStore;
use crate::training::data::{
    ClassFolderDataset, PairLoader, PairLoaderConfig, PairSource, TrialLoader, TrialSource,
};
use crate::training::evaluation::EvaluationLoop;
use crate::training::events::{EventSink, TrainingEvent};
use crate::training::loss::{BceWithLogitsLoss, PairLoss};
use crate::training::optimizers::{Adam, AdamParams, ParamOptimizer};
use crate::training::trainer::{TrainingInputs, TrainingLoop, TrainingOutcome, TrainingSettings};

/// Dataset split used for training pairs
pub const TRAIN_SPLIT: &str = "background";
/// Dataset split used for validation and test trials
pub const EVAL_SPLIT: &str = "evaluation";

/// Pick the compute device.
///
/// With `use_gpu` the first CUDA device is used when the build and the host
/// support it; otherwise training runs on the CPU.
pub fn select_device(use_gpu: bool) -> Result<Device> {
    if !use_gpu {
        return Ok(Device::Cpu);
    }
    let device = Device::cuda_if_available(0)?;
    if device.is_cpu() {
        warn!("GPU requested but no CUDA device is available, falling back to CPU");
    }
    Ok(device)
}

/// Factory for everything a run needs besides its config
pub trait TrainingComponents {
    /// Training pair provider
    fn train_pairs(&self, config: &Config, device: &Device) -> Result<Box<dyn PairSource>>;

    /// Validation trial provider
    fn valid_trials(&self, config: &Config, device: &Device) -> Result<Box<dyn TrialSource>>;

    /// Held-out test trial provider
    fn test_trials(&self, config: &Config, device: &Device) -> Result<Box<dyn TrialSource>>;

    /// Fresh model for samples of shape `sample_dims`
    fn build_model(
        &self,
        config: &Config,
        sample_dims: &[usize],
        device: &Device,
    ) -> Result<Box<dyn SiameseModel>>;

    /// Optimizer over `model`'s parameters
    fn build_optimizer(
        &self,
        config: &Config,
        model: &dyn SiameseModel,
    ) -> Result<Box<dyn ParamOptimizer>>;

    /// Pair loss
    fn build_loss(&self, _config: &Config) -> Box<dyn PairLoss> {
        Box::new(BceWithLogitsLoss)
    }
}

/// Folder datasets, [`SiameseNet`], Adam and binary cross-entropy
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardComponents;

impl StandardComponents {
    fn dataset(config: &Config, split: &str) -> Result<Arc<ClassFolderDataset>> {
        ClassFolderDataset::load(&config.data_dir.join(split), config.num_workers).map(Arc::new)
    }
}

impl TrainingComponents for StandardComponents {
    fn train_pairs(&self, config: &Config, device: &Device) -> Result<Box<dyn PairSource>> {
        let dataset = Self::dataset(config, TRAIN_SPLIT)?;
        let loader = PairLoader::new(
            dataset,
            PairLoaderConfig {
                batch_size: config.batch_size,
                num_train: config.num_train,
                augment: config.augment,
                max_shift: config.max_shift,
                shuffle: config.shuffle,
                seed: config.seed,
            },
            device.clone(),
        )?;
        Ok(Box::new(loader))
    }

    fn valid_trials(&self, config: &Config, device: &Device) -> Result<Box<dyn TrialSource>> {
        let dataset = Self::dataset(config, EVAL_SPLIT)?;
        let loader = TrialLoader::new(dataset, config.way, config.valid_trials, config.seed, device.clone())?;
        Ok(Box::new(loader))
    }

    fn test_trials(&self, config: &Config, device: &Device) -> Result<Box<dyn TrialSource>> {
        let dataset = Self::dataset(config, EVAL_SPLIT)?;
        let loader = TrialLoader::new(
            dataset,
            config.way,
            config.test_trials,
            config.seed.wrapping_add(1),
            device.clone(),
        )?;
        Ok(Box::new(loader))
    }

    fn build_model(
        &self,
        config: &Config,
        sample_dims: &[usize],
        device: &Device,
    ) -> Result<Box<dyn SiameseModel>> {
        let net = SiameseNet::new(
            SiameseNetConfig {
                input_dim: sample_dims.iter().product(),
                hidden_dim: config.hidden_dim,
                embedding_dim: config.embedding_dim,
            },
            device,
        )?;
        Ok(Box::new(net))
    }

    fn build_optimizer(
        &self,
        config: &Config,
        model: &dyn SiameseModel,
    ) -> Result<Box<dyn ParamOptimizer>> {
        let params = AdamParams {
            learning_rate: config.learning_rate,
            weight_decay: config.weight_decay,
            ..AdamParams::default()
        };
        Ok(Box::new(Adam::new(model.named_vars(), params)?))
    }
}

/// Result of a test pass
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TestReport {
    /// Trials judged correct
    pub correct: usize,
    /// Trials run
    pub total: usize,
    /// `correct / total`, 0 without trials
    pub accuracy: f64,
    /// `epoch` field of the evaluated checkpoint
    pub checkpoint_epoch: usize,
}

impl TestReport {
    /// Accuracy in percent
    pub fn percentage(&self) -> f64 {
        self.accuracy * 100.0
    }
}

/// Entry point for `train` and `test`
pub struct TrainerController {
    config: Config,
    device: Device,
    components: Box<dyn TrainingComponents>,
    events: EventSink,
}

impl TrainerController {
    /// Controller using [`StandardComponents`]
    pub fn new(config: Config, device: Device) -> Result<Self> {
        Self::with_components(config, device, Box::new(StandardComponents))
    }

    /// Controller using custom components
    pub fn with_components(
        config: Config,
        device: Device,
        components: Box<dyn TrainingComponents>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            device,
            components,
            events: EventSink::disabled(),
        })
    }

    /// Set up event monitoring
    pub fn with_event_monitoring(mut self, tx: mpsc::UnboundedSender<TrainingEvent>) -> Self {
        self.events = EventSink::new(tx);
        self
    }

    /// Run configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Compute device
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Train until the epoch budget is spent or patience runs out
    #[instrument(skip(self), fields(run = %self.config.num_model))]
    pub fn train(&mut self) -> Result<TrainingOutcome> {
        let config = &self.config;
        info!(
            "Training run {} on {:?} for up to {} epochs (resume: {})",
            config.num_model, self.device, config.epochs, config.resume
        );
        if config.pin_memory {
            debug!("pin_memory has no effect on this backend");
        }

        let train_pairs = self.components.train_pairs(config, &self.device)?;
        let valid_trials = self.components.valid_trials(config, &self.device)?;
        let model = self
            .components
            .build_model(config, train_pairs.sample_dims(), &self.device)?;
        let optimizer = self.components.build_optimizer(config, &*model)?;
        let loss = self.components.build_loss(config);

        let inputs = TrainingInputs {
            model,
            optimizer,
            loss,
            train_pairs,
            valid_trials,
        };
        let mut training = TrainingLoop::new(
            TrainingSettings::from_config(config),
            inputs,
            CheckpointStore::new(config.checkpoint_dir()),
            config.run_logs_dir(),
        )?
        .with_events(self.events.clone());

        training.run()
    }

    /// Evaluate the checkpoint selected by `config.best`
    pub fn test(&mut self) -> Result<TestReport> {
        self.test_checkpoint(self.config.best)
    }

    /// Evaluate the best (`best = true`) or most recent checkpoint on the test trials
    #[instrument(skip(self), fields(run = %self.config.num_model))]
    pub fn test_checkpoint(&mut self, best: bool) -> Result<TestReport> {
        let config = &self.config;
        let state = CheckpointStore::new(config.checkpoint_dir()).load(best)?;

        let mut trials = self.components.test_trials(config, &self.device)?;
        let mut model = self
            .components
            .build_model(config, trials.sample_dims(), &self.device)?;
        model.load_state_dict(&state.model_parameters)?;
        model.set_training(false);

        let report = EvaluationLoop::new(&*model, Phase::Testing)
            .with_events(self.events.clone())
            .run(trials.as_mut())?;

        let test = TestReport {
            correct: report.correct,
            total: report.total,
            accuracy: report.accuracy,
            checkpoint_epoch: state.epoch,
        };
        info!(
            "Test Acc: {}/{} ({:.2}%)",
            test.correct,
            test.total,
            test.percentage()
        );
        Ok(test)
    }
}
