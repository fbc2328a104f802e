//! Model capability consumed by the training and evaluation loops
//!
//! The loops never depend on a concrete network. Anything that can score a
//! batch of pairs and serialize its parameters implements [`SiameseModel`];
//! [`SiameseNet`] is the default twin-encoder network.

mod params;
mod siamese;


pub use params::{restore_vars, snapshot_vars, TensorRecord};
pub use siamese::{SiameseNet, SiameseNetConfig};

use candle_core::{Tensor, Var};

use crate::error::Result;

/// A pairwise similarity model
pub trait SiameseModel {
    /// Score `left[i]` against `right[i]`, returning one logit per pair with
    /// shape `[batch, 1]`. Higher means more similar.
    fn forward(&self, left: &Tensor, right: &Tensor) -> Result<Tensor>;

    /// Trainable parameters, sorted by name
    fn named_vars(&self) -> Vec<(String, Var)>;

    /// Serialize parameters to an opaque blob
    fn state_dict(&self) -> Result<Vec<u8>> {
        snapshot_vars(&self.named_vars())
    }

    /// Restore parameters from a blob produced by [`SiameseModel::state_dict`]
    fn load_state_dict(&mut self, bytes: &[u8]) -> Result<()> {
        restore_vars(&self.named_vars(), bytes)
    }

    /// Switch between training and inference behaviour
    fn set_training(&mut self, _training: bool) {}
}
