//! Default twin-encoder network
//!
//! Both inputs go through one shared encoder; the absolute difference of the
//! two embeddings is mapped to a single similarity logit.

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{Linear, Module, VarBuilder, VarMap};
use serde::{Deserialize, Serialize};

use super::SiameseModel;
use crate::error::{Error, Result};

/// Layer widths of [`SiameseNet`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SiameseNetConfig {
    /// Flattened sample size
    pub input_dim: usize,
    /// Encoder hidden width
    pub hidden_dim: usize,
    /// Embedding width
    pub embedding_dim: usize,
}

/// Shared-weight encoder with an L1 distance head
pub struct SiameseNet {
    config: SiameseNetConfig,
    var_map: VarMap,
    hidden: Linear,
    embedding: Linear,
    head: Linear,
}

impl SiameseNet {
    /// Build a freshly initialised network on `device`
    pub fn new(config: SiameseNetConfig, device: &Device) -> Result<Self> {
        if config.input_dim == 0 {
            return Err(Error::config("SiameseNet input_dim must be > 0"));
        }

        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, device);

        let hidden = candle_nn::linear(config.input_dim, config.hidden_dim, vb.pp("encoder.hidden"))?;
        let embedding =
            candle_nn::linear(config.hidden_dim, config.embedding_dim, vb.pp("encoder.embedding"))?;
        let head = candle_nn::linear(config.embedding_dim, 1, vb.pp("head"))?;

        Ok(Self {
            config,
            var_map,
            hidden,
            embedding,
            head,
        })
    }

    /// Layer widths
    pub fn config(&self) -> &SiameseNetConfig {
        &self.config
    }

    /// Embed a batch of samples; any trailing shape is flattened
    pub fn embed(&self, samples: &Tensor) -> Result<Tensor> {
        let flat = samples.flatten_from(1)?;
        let hidden = self.hidden.forward(&flat)?.relu()?;
        let embedding = self.embedding.forward(&hidden)?;
        Ok(candle_nn::ops::sigmoid(&embedding)?)
    }
}

impl SiameseModel for SiameseNet {
    fn forward(&self, left: &Tensor, right: &Tensor) -> Result<Tensor> {
        let distance = (self.embed(left)? - self.embed(right)?)?.abs()?;
        Ok(self.head.forward(&distance)?)
    }

    fn named_vars(&self) -> Vec<(String, Var)> {
        let data = match self.var_map.data().lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut vars: Vec<(String, Var)> = data
            .iter()
            .map(|(name, var)| (name.clone(), var.clone()))
            .collect();
        vars.sort_by(|a, b| a.0.cmp(&b.0));
        vars
    }
}
