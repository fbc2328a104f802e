//! Folder-per-class sample datasets
//!
//! Every leaf directory holding `*.safetensors` files is one class; every
//! file is one sample. A sample file stores a tensor named `image`, or a
//! single tensor under any name.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use candle_core::{DType, Device};
use rayon::prelude::*;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{Error, Result};

const SAMPLE_EXTENSION: &str = "safetensors";
const SAMPLE_TENSOR: &str = "image";

/// One decoded sample kept in host memory
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Row-major values
    pub values: Vec<f32>,
    /// Dimensions, e.g. `[channels, height, width]`
    pub dims: Vec<usize>,
}

impl Sample {
    /// Decode one sample file
    pub fn load(path: &Path) -> Result<Self> {
        let mut tensors = candle_core::safetensors::load(path, &Device::Cpu)
            .map_err(|e| Error::data(format!("{}: {e}", path.display())))?;

        let tensor = match tensors.remove(SAMPLE_TENSOR) {
            Some(tensor) => tensor,
            None if tensors.len() == 1 => tensors
                .into_values()
                .next()
                .ok_or_else(|| Error::data(format!("{}: empty sample", path.display())))?,
            None => {
                return Err(Error::data(format!(
                    "{}: expected a tensor named `{SAMPLE_TENSOR}`",
                    path.display()
                )))
            }
        };

        let values = tensor
            .flatten_all()
            .and_then(|t| t.to_dtype(DType::F32))
            .and_then(|t| t.to_vec1::<f32>())
            .map_err(|e| Error::data(format!("{}: {e}", path.display())))?;

        Ok(Self {
            values,
            dims: tensor.dims().to_vec(),
        })
    }
}

/// All samples of one identity
#[derive(Debug, Clone)]
pub struct SampleClass {
    /// Class name, relative to the dataset root
    pub name: String,
    /// Samples of this class
    pub samples: Vec<Sample>,
}

/// Samples grouped by identity
#[derive(Debug, Clone)]
pub struct ClassFolderDataset {
    classes: Vec<SampleClass>,
    sample_dims: Vec<usize>,
}

impl ClassFolderDataset {
    /// Build from in-memory classes; every sample must share one shape
    pub fn from_classes(classes: Vec<SampleClass>) -> Result<Self> {
        let classes: Vec<SampleClass> = classes.into_iter().filter(|c| !c.samples.is_empty()).collect();
        let sample_dims = classes
            .first()
            .map(|c| c.samples[0].dims.clone())
            .ok_or_else(|| Error::data("dataset has no samples"))?;

        for class in &classes {
            if let Some(odd) = class.samples.iter().find(|s| s.dims != sample_dims) {
                return Err(Error::data(format!(
                    "class {} has a sample of shape {:?}, expected {:?}",
                    class.name, odd.dims, sample_dims
                )));
            }
        }

        Ok(Self {
            classes,
            sample_dims,
        })
    }

    /// Scan `root` and decode every sample on `num_workers` threads
    pub fn load(root: &Path, num_workers: usize) -> Result<Self> {
        if !root.is_dir() {
            return Err(Error::data(format!("dataset directory {} does not exist", root.display())));
        }

        let mut by_class: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::data(format!("scanning {}: {e}", root.display())))?;
            let path = entry.path();
            let is_sample = entry.file_type().is_file()
                && path.extension().and_then(|ext| ext.to_str()) == Some(SAMPLE_EXTENSION);
            if !is_sample {
                continue;
            }
            if let Some(parent) = path.parent() {
                by_class.entry(parent.to_path_buf()).or_default().push(path.to_path_buf());
            }
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_workers.max(1))
            .build()
            .map_err(|e| Error::internal(format!("failed to start loader threads: {e}")))?;

        let classes = pool.install(|| {
            by_class
                .par_iter()
                .map(|(dir, files)| {
                    let samples = files.iter().map(|f| Sample::load(f)).collect::<Result<Vec<_>>>()?;
                    let name = dir
                        .strip_prefix(root)
                        .unwrap_or(dir)
                        .to_string_lossy()
                        .into_owned();
                    Ok(SampleClass { name, samples })
                })
                .collect::<Result<Vec<_>>>()
        })?;

        let dataset = Self::from_classes(classes)?;
        info!(
            "Loaded {} classes ({} samples, shape {:?}) from {}",
            dataset.num_classes(),
            dataset.num_samples(),
            dataset.sample_dims,
            root.display()
        );
        Ok(dataset)
    }

    /// Number of classes
    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    /// Total number of samples
    pub fn num_samples(&self) -> usize {
        self.classes.iter().map(|c| c.samples.len()).sum()
    }

    /// Shape shared by all samples
    pub fn sample_dims(&self) -> &[usize] {
        &self.sample_dims
    }

    /// Flattened sample size
    pub fn sample_len(&self) -> usize {
        self.sample_dims.iter().product()
    }

    /// All classes
    pub fn classes(&self) -> &[SampleClass] {
        &self.classes
    }

    /// Indices of classes that can provide two distinct samples
    pub fn pairable_classes(&self) -> Vec<usize> {
        let pairable: Vec<usize> = self
            .classes
            .iter()
            .enumerate()
            .filter(|(_, c)| c.samples.len() >= 2)
            .map(|(i, _)| i)
            .collect();
        debug!("{} of {} classes have at least two samples", pairable.len(), self.classes.len());
        pairable
    }
}
