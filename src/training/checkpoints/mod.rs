//! Checkpointing of training progress
//!
//! [`TrainingState`] is owned by the training loop; [`CheckpointStore`] only
//! serializes and deserializes snapshots of it.

pub mod state;
pub mod store;

pub use state::TrainingState;
pub use store::{parse_history_epoch, CheckpointInfo, CheckpointStore, BEST_CHECKPOINT};
