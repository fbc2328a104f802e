//! Pair and trial loaders over a [`ClassFolderDataset`]

use std::sync::Arc;

use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use super::augment::random_shift;
use super::{ClassFolderDataset, PairBatch, PairSource, Trial, TrialSource};
use crate::error::{Error, Result};

/// Configuration for [`PairLoader`]
#[derive(Debug, Clone, PartialEq)]
pub struct PairLoaderConfig {
    /// Pairs per batch
    pub batch_size: usize,
    /// Pairs per epoch
    pub num_train: usize,
    /// Apply random translation
    pub augment: bool,
    /// Translation bound in pixels
    pub max_shift: usize,
    /// Draw different pairs every epoch
    pub shuffle: bool,
    /// Base seed
    pub seed: u64,
}

fn two_distinct<R: Rng + ?Sized>(rng: &mut R, len: usize) -> (usize, usize) {
    let first = rng.random_range(0..len);
    let mut second = rng.random_range(0..len - 1);
    if second >= first {
        second += 1;
    }
    (first, second)
}

fn stacked(rows: Vec<f32>, count: usize, dims: &[usize], device: &Device) -> Result<Tensor> {
    let mut shape = Vec::with_capacity(dims.len() + 1);
    shape.push(count);
    shape.extend_from_slice(dims);
    Ok(Tensor::from_vec(rows, shape, device)?)
}

/// Labelled pair batches for training
///
/// Even pair indices are same-class pairs (label 1), odd indices pair two
/// different classes (label 0).
pub struct PairLoader {
    dataset: Arc<ClassFolderDataset>,
    config: PairLoaderConfig,
    pairable: Vec<usize>,
    device: Device,
    rng: StdRng,
    cursor: usize,
}

impl PairLoader {
    /// Create a loader; the dataset needs two classes and one class with two samples
    pub fn new(dataset: Arc<ClassFolderDataset>, config: PairLoaderConfig, device: Device) -> Result<Self> {
        if config.batch_size == 0 || config.num_train == 0 {
            return Err(Error::config("batch_size and num_train must be > 0"));
        }
        let pairable = dataset.pairable_classes();
        if dataset.num_classes() < 2 || pairable.is_empty() {
            return Err(Error::data(format!(
                "training set needs at least two classes and one class with two samples, found {} classes",
                dataset.num_classes()
            )));
        }

        info!(
            "Train on {} sample pairs per epoch in batches of {}",
            config.num_train, config.batch_size
        );
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Self {
            dataset,
            config,
            pairable,
            device,
            rng,
            cursor: 0,
        })
    }

    fn push_sample(&mut self, rows: &mut Vec<f32>, class: usize, sample: usize) {
        let dataset = Arc::clone(&self.dataset);
        let sample = &dataset.classes()[class].samples[sample];
        if self.config.augment {
            rows.extend(random_shift(&sample.values, &sample.dims, self.config.max_shift, &mut self.rng));
        } else {
            rows.extend_from_slice(&sample.values);
        }
    }

    fn draw_pair(&mut self, index: usize, left: &mut Vec<f32>, right: &mut Vec<f32>) -> f32 {
        if index % 2 == 0 {
            let class = self.pairable[self.rng.random_range(0..self.pairable.len())];
            let (a, b) = two_distinct(&mut self.rng, self.dataset.classes()[class].samples.len());
            self.push_sample(left, class, a);
            self.push_sample(right, class, b);
            1.0
        } else {
            let (c1, c2) = two_distinct(&mut self.rng, self.dataset.num_classes());
            let s1 = self.rng.random_range(0..self.dataset.classes()[c1].samples.len());
            let s2 = self.rng.random_range(0..self.dataset.classes()[c2].samples.len());
            self.push_sample(left, c1, s1);
            self.push_sample(right, c2, s2);
            0.0
        }
    }
}

impl PairSource for PairLoader {
    fn num_batches(&self) -> usize {
        self.config.num_train.div_ceil(self.config.batch_size)
    }

    fn sample_dims(&self) -> &[usize] {
        self.dataset.sample_dims()
    }

    fn start_epoch(&mut self, epoch: usize) -> Result<()> {
        let seed = if self.config.shuffle {
            self.config.seed.wrapping_add(epoch as u64)
        } else {
            self.config.seed
        };
        self.rng = StdRng::seed_from_u64(seed);
        self.cursor = 0;
        debug!("Pair loader rewound for epoch {} (seed {})", epoch, seed);
        Ok(())
    }

    fn next_batch(&mut self) -> Result<Option<PairBatch>> {
        if self.cursor >= self.config.num_train {
            return Ok(None);
        }
        let count = self.config.batch_size.min(self.config.num_train - self.cursor);
        let sample_len = self.dataset.sample_len();

        let mut left = Vec::with_capacity(count * sample_len);
        let mut right = Vec::with_capacity(count * sample_len);
        let mut labels = Vec::with_capacity(count);
        for index in self.cursor..self.cursor + count {
            labels.push(self.draw_pair(index, &mut left, &mut right));
        }
        self.cursor += count;

        let dims = self.dataset.sample_dims().to_vec();
        Ok(Some(PairBatch {
            left: stacked(left, count, &dims, &self.device)?,
            right: stacked(right, count, &dims, &self.device)?,
            labels: Tensor::from_vec(labels, count, &self.device)?,
        }))
    }
}

/// Seeded one-shot trials; every pass replays the same trials
pub struct TrialLoader {
    dataset: Arc<ClassFolderDataset>,
    way: usize,
    trials: usize,
    seed: u64,
    pairable: Vec<usize>,
    device: Device,
    rng: StdRng,
    produced: usize,
}

impl TrialLoader {
    /// Create a loader producing `trials` trials of `way` candidates each
    pub fn new(
        dataset: Arc<ClassFolderDataset>,
        way: usize,
        trials: usize,
        seed: u64,
        device: Device,
    ) -> Result<Self> {
        if way < 2 {
            return Err(Error::config("way must be at least 2"));
        }
        if dataset.num_classes() < way {
            return Err(Error::config(format!(
                "{}-way trials need at least {} classes, dataset has {}",
                way,
                way,
                dataset.num_classes()
            )));
        }
        let pairable = dataset.pairable_classes();
        if pairable.is_empty() {
            return Err(Error::data("no class has two samples to form a probe and its match"));
        }

        Ok(Self {
            dataset,
            way,
            trials,
            seed,
            pairable,
            device,
            rng: StdRng::seed_from_u64(seed),
            produced: 0,
        })
    }

    /// Candidates per trial
    pub fn way(&self) -> usize {
        self.way
    }
}

impl TrialSource for TrialLoader {
    fn num_trials(&self) -> usize {
        self.trials
    }

    fn sample_dims(&self) -> &[usize] {
        self.dataset.sample_dims()
    }

    fn reset(&mut self) -> Result<()> {
        self.rng = StdRng::seed_from_u64(self.seed);
        self.produced = 0;
        Ok(())
    }

    fn next_trial(&mut self) -> Result<Option<Trial>> {
        if self.produced >= self.trials {
            return Ok(None);
        }
        self.produced += 1;

        let dataset = Arc::clone(&self.dataset);
        let classes = dataset.classes();
        let class = self.pairable[self.rng.random_range(0..self.pairable.len())];
        let (probe_idx, match_idx) = two_distinct(&mut self.rng, classes[class].samples.len());

        let mut candidates = Vec::with_capacity(self.way * dataset.sample_len());
        candidates.extend_from_slice(&classes[class].samples[match_idx].values);

        // way - 1 distinct distractor classes, skipping the probe's class
        let others = rand::seq::index::sample(&mut self.rng, classes.len() - 1, self.way - 1);
        for other in others.iter() {
            let other = if other >= class { other + 1 } else { other };
            let sample = self.rng.random_range(0..classes[other].samples.len());
            candidates.extend_from_slice(&classes[other].samples[sample].values);
        }

        let dims = dataset.sample_dims();
        let probe = classes[class].samples[probe_idx].values.clone();
        Ok(Some(Trial::new(
            stacked(probe, 1, dims, &self.device)?,
            stacked(candidates, self.way, dims, &self.device)?,
        )))
    }
}
