//! Pair losses
//!
//! Labels follow the similarity convention used throughout the crate:
//! `1.0` for a same-identity pair, `0.0` for a different-identity pair.

use candle_core::Tensor;

use crate::error::{Error, Result};

/// Loss over a batch of pair logits
pub trait PairLoss {
    /// Loss name
    fn name(&self) -> &str;

    /// Reduce `logits` (`[batch, 1]` or `[batch]`) against `labels` (`[batch]`)
    /// to a scalar loss tensor.
    fn compute(&self, logits: &Tensor, labels: &Tensor) -> Result<Tensor>;
}

/// Binary cross-entropy on raw logits, averaged over the batch
#[derive(Debug, Clone, Copy, Default)]
pub struct BceWithLogitsLoss;

impl PairLoss for BceWithLogitsLoss {
    fn name(&self) -> &str {
        "bce_with_logits"
    }

    fn compute(&self, logits: &Tensor, labels: &Tensor) -> Result<Tensor> {
        let logits = logits.flatten_all()?;
        let labels = labels.flatten_all()?.to_dtype(logits.dtype())?;
        if logits.dims() != labels.dims() {
            return Err(Error::data(format!(
                "{} logits for {} labels",
                logits.elem_count(),
                labels.elem_count()
            )));
        }

        // max(x, 0) - x*y + log(1 + exp(-|x|))
        let positive_part = logits.relu()?;
        let target_term = (&logits * &labels)?;
        let softplus = (logits.abs()?.neg()?.exp()? + 1.0)?.log()?;
        let per_pair = ((positive_part - target_term)? + softplus)?;
        Ok(per_pair.mean_all()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use candle_core::Device;

    fn scalar(t: Tensor) -> f32 {
        t.to_scalar::<f32>().unwrap()
    }

    #[test]
    fn test_zero_logits_give_ln2() {
        let device = Device::Cpu;
        let logits = Tensor::zeros((4, 1), candle_core::DType::F32, &device).unwrap();
        let labels = Tensor::new(&[1f32, 0., 1., 0.], &device).unwrap();

        let loss = BceWithLogitsLoss.compute(&logits, &labels).unwrap();
        assert_relative_eq!(scalar(loss), std::f32::consts::LN_2, epsilon = 1e-6);
    }

    #[test]
    fn test_confident_predictions() {
        let device = Device::Cpu;
        let logits = Tensor::new(&[[20f32], [-20.]], &device).unwrap();
        let right = Tensor::new(&[1f32, 0.], &device).unwrap();
        let wrong = Tensor::new(&[0f32, 1.], &device).unwrap();

        assert!(scalar(BceWithLogitsLoss.compute(&logits, &right).unwrap()) < 1e-6);
        assert_relative_eq!(
            scalar(BceWithLogitsLoss.compute(&logits, &wrong).unwrap()),
            20.0,
            epsilon = 1e-4
        );
    }

    #[test]
    fn test_length_mismatch_is_rejected() {
        let device = Device::Cpu;
        let logits = Tensor::zeros((3, 1), candle_core::DType::F32, &device).unwrap();
        let labels = Tensor::new(&[1f32, 0.], &device).unwrap();

        assert!(BceWithLogitsLoss.compute(&logits, &labels).is_err());
    }
}
