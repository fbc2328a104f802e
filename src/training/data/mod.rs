//! Data capabilities consumed by the training and evaluation loops
//!
//! The loops only see blocking "next batch" / "next trial" interfaces. The
//! default implementations read a folder-per-class dataset of safetensors
//! samples; any other provider can be plugged in through [`PairSource`] and
//! [`TrialSource`].

use candle_core::Tensor;

use crate::error::Result;

pub mod augment;
pub mod datasets;
pub mod loaders;


// Re-exports
pub use datasets::{ClassFolderDataset, Sample, SampleClass};
pub use loaders::{PairLoader, PairLoaderConfig, TrialLoader};

/// A batch of labelled training pairs
#[derive(Debug, Clone)]
pub struct PairBatch {
    /// First element of each pair, `[batch, ...]`
    pub left: Tensor,
    /// Second element of each pair, `[batch, ...]`
    pub right: Tensor,
    /// `1.0` for same identity, `0.0` for different, `[batch]`
    pub labels: Tensor,
}

impl PairBatch {
    /// Number of pairs in the batch
    pub fn size(&self) -> usize {
        self.labels.elem_count()
    }
}

/// One one-shot trial: a probe and `way` candidates
#[derive(Debug, Clone)]
pub struct Trial {
    /// Probe sample, `[1, ...]`
    pub probe: Tensor,
    /// Candidate samples, `[way, ...]`
    pub candidates: Tensor,
    /// Index of the true match among the candidates
    pub target: usize,
}

impl Trial {
    /// Index of the true match by convention
    pub const TRUE_MATCH: usize = 0;

    /// Trial whose true match is the first candidate
    pub fn new(probe: Tensor, candidates: Tensor) -> Self {
        Self {
            probe,
            candidates,
            target: Self::TRUE_MATCH,
        }
    }

    /// Number of candidates
    pub fn way(&self) -> usize {
        self.candidates.dims().first().copied().unwrap_or(0)
    }
}

/// Blocking source of training batches
pub trait PairSource {
    /// Batches per epoch
    fn num_batches(&self) -> usize;

    /// Shape of one sample, without the batch dimension
    fn sample_dims(&self) -> &[usize];

    /// Rewind for `epoch`
    fn start_epoch(&mut self, epoch: usize) -> Result<()>;

    /// Next batch of the current epoch, `None` once exhausted
    fn next_batch(&mut self) -> Result<Option<PairBatch>>;
}

/// Blocking source of one-shot trials
pub trait TrialSource {
    /// Trials per pass
    fn num_trials(&self) -> usize;

    /// Shape of one sample, without the batch dimension
    fn sample_dims(&self) -> &[usize];

    /// Rewind to the first trial
    fn reset(&mut self) -> Result<()>;

    /// Next trial, `None` once exhausted
    fn next_trial(&mut self) -> Result<Option<Trial>>;
}
