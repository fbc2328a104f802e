//! Siamese one-shot - training and evaluation of Siamese networks for
//! one-shot recognition
//!
//! The crate drives a pairwise similarity model through epochs of training,
//! one-shot validation and checkpointing, and evaluates saved checkpoints on
//! held-out trials.
//!
//! ```rust,ignore
//! use siamese_oneshot::{select_device, Config, TrainerController};
//!
//! let config = Config::from_file("config.yaml")?;
//! let device = select_device(config.use_gpu)?;
//! let mut controller = TrainerController::new(config, device)?;
//! let outcome = controller.train()?;
//! let report = controller.test_checkpoint(true)?;
//! println!("Test Acc: {}/{} ({:.2}%)", report.correct, report.total, report.percentage());
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

pub mod config;
pub mod controller;
pub mod error;
pub mod logging;
pub mod model;
pub mod training;

// Re-exports
pub use config::Config;
pub use controller::{select_device, StandardComponents, TestReport, TrainerController, TrainingComponents};
pub use error::{Error, Phase, Result};
pub use model::{SiameseModel, SiameseNet, SiameseNetConfig};
pub use training::{
    CheckpointStore, EvaluationLoop, EvaluationReport, StopReason, TrainingEvent, TrainingLoop,
    TrainingOutcome, TrainingState,
};
