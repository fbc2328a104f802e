//! Optimizer capability and the default Adam implementation
//!
//! The training loop only sees [`ParamOptimizer`]: apply one update from a
//! gradient store, and serialize/restore internal state for checkpoints.

pub mod adam;
pub mod state;

pub use adam::{Adam, AdamParams};
pub use state::OptimizerStateDict;

use candle_core::backprop::GradStore;

use crate::error::Result;

/// Trait for optimizers
pub trait ParamOptimizer {
    /// Optimizer name
    fn name(&self) -> &str;

    /// Apply one update from `gradients`
    fn step(&mut self, gradients: &GradStore) -> Result<()>;

    /// Current learning rate
    fn learning_rate(&self) -> f64;

    /// Number of updates applied so far
    fn step_count(&self) -> usize;

    /// Serialize optimizer state to an opaque blob
    fn state_dict(&self) -> Result<Vec<u8>>;

    /// Restore optimizer state from a blob produced by [`ParamOptimizer::state_dict`]
    fn load_state_dict(&mut self, bytes: &[u8]) -> Result<()>;
}
