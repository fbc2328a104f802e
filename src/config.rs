//! Configuration for training and testing runs

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Flat, immutable run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Root path of the dataset
    pub data_dir: PathBuf,
    /// Checkpoint storage root
    pub model_dir: PathBuf,
    /// Run identifier, used as a subdirectory of `model_dir` and `logs_dir`
    pub num_model: String,
    /// Root path of training/validation log files
    pub logs_dir: PathBuf,

    /// Pairs per training batch
    pub batch_size: usize,
    /// Training pairs drawn per epoch
    pub num_train: usize,
    /// Random translation of training samples
    pub augment: bool,

    /// Candidates per one-shot trial
    pub way: usize,
    /// Trials per validation pass
    pub valid_trials: usize,
    /// Trials in the held-out test pass
    pub test_trials: usize,

    /// Redraw training pairs every epoch
    pub shuffle: bool,
    /// Base seed for pair and trial sampling
    pub seed: u64,
    /// Threads used to decode the dataset
    pub num_workers: usize,
    /// Accepted for loader compatibility
    pub pin_memory: bool,

    /// Place the model on an accelerator when one is available
    pub use_gpu: bool,

    /// Training epoch budget
    pub epochs: usize,
    /// Epochs tolerated without validation improvement
    pub train_patience: usize,
    /// Restore the most recent checkpoint before training
    pub resume: bool,
    /// For `test`: use the best checkpoint instead of the most recent one
    pub best: bool,

    /// Optimizer learning rate
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    /// L2 weight decay
    #[serde(default = "default_weight_decay")]
    pub weight_decay: f64,
    /// Periodic checkpoint cadence in epochs
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: usize,
    /// Hidden width of the default network
    #[serde(default = "default_hidden_dim")]
    pub hidden_dim: usize,
    /// Embedding width of the default network
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,
    /// Maximum augmentation translation in pixels
    #[serde(default = "default_max_shift")]
    pub max_shift: usize,
}

fn default_learning_rate() -> f64 {
    3e-4
}

fn default_weight_decay() -> f64 {
    6e-5
}

fn default_checkpoint_interval() -> usize {
    5
}

fn default_hidden_dim() -> usize {
    512
}

fn default_embedding_dim() -> usize {
    256
}

fn default_max_shift() -> usize {
    2
}

impl Config {
    /// Load configuration from a JSON or YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::io(format!("reading config {}", path.display()), e))?;

        let config: Self = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .map_err(|e| Error::config(format!("{}: {e}", path.display())))?,
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| Error::config(format!("{}: {e}", path.display())))?,
            other => {
                return Err(Error::config(format!(
                    "unsupported config format {:?} for {}",
                    other.unwrap_or(""),
                    path.display()
                )))
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.num_model.trim().is_empty() {
            return Err(Error::config("num_model must not be empty"));
        }
        if self.batch_size == 0 {
            return Err(Error::config("batch_size must be > 0"));
        }
        if self.num_train == 0 {
            return Err(Error::config("num_train must be > 0"));
        }
        if self.way < 2 {
            return Err(Error::config("way must be at least 2"));
        }
        if self.valid_trials == 0 || self.test_trials == 0 {
            return Err(Error::config("valid_trials and test_trials must be > 0"));
        }
        if self.epochs == 0 {
            return Err(Error::config("epochs must be > 0"));
        }
        if self.checkpoint_interval == 0 {
            return Err(Error::config("checkpoint_interval must be > 0"));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(Error::config("learning_rate must be a positive finite number"));
        }
        if !self.weight_decay.is_finite() || self.weight_decay < 0.0 {
            return Err(Error::config("weight_decay must be >= 0"));
        }
        if self.hidden_dim == 0 || self.embedding_dim == 0 {
            return Err(Error::config("hidden_dim and embedding_dim must be > 0"));
        }
        Ok(())
    }

    /// Directory holding this run's checkpoints
    pub fn checkpoint_dir(&self) -> PathBuf {
        self.model_dir.join(&self.num_model)
    }

    /// Directory holding this run's CSV logs
    pub fn run_logs_dir(&self) -> PathBuf {
        self.logs_dir.join(&self.num_model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_yaml() -> &'static str {
        r#"
data_dir: ./data
model_dir: ./models
num_model: "1"
logs_dir: ./logs
batch_size: 128
num_train: 90000
augment: true
way: 20
valid_trials: 320
test_trials: 400
shuffle: true
seed: 1
num_workers: 4
pin_memory: true
use_gpu: false
epochs: 200
train_patience: 20
resume: false
best: true
"#
    }

    #[test]
    fn test_load_yaml_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.yaml");
        std::fs::write(&path, sample_yaml()).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.way, 20);
        assert_eq!(config.checkpoint_interval, 5);
        assert_eq!(config.learning_rate, 3e-4);
        assert_eq!(config.checkpoint_dir(), PathBuf::from("./models").join("1"));
        assert_eq!(config.run_logs_dir(), PathBuf::from("./logs").join("1"));
    }

    #[test]
    fn test_missing_field_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.json");
        std::fs::write(&path, r#"{ "data_dir": "./data" }"#).unwrap();

        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.ini");
        std::fs::write(&path, "x=1").unwrap();

        assert!(matches!(Config::from_file(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_validation_rejects_one_way_trials() {
        let mut config: Config = serde_yaml::from_str(sample_yaml()).unwrap();
        config.way = 1;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.way = 5;
        config.epochs = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
