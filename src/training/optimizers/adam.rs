//! Adam optimizer with L2 weight decay
//!
//! Weight decay is added to the gradient before the moment updates (coupled
//! decay), so `weight_decay = 0` reduces to plain Adam.

use std::collections::HashMap;

use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};

use super::{OptimizerStateDict, ParamOptimizer};
use crate::error::{Error, Result};
use crate::model::TensorRecord;

/// Adam hyperparameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdamParams {
    /// Learning rate
    pub learning_rate: f64,
    /// Beta1 parameter (momentum)
    pub beta1: f64,
    /// Beta2 parameter (RMSprop)
    pub beta2: f64,
    /// Epsilon for numerical stability
    pub epsilon: f64,
    /// L2 penalty coefficient
    pub weight_decay: f64,
}

impl Default for AdamParams {
    fn default() -> Self {
        Self {
            learning_rate: 3e-4,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            weight_decay: 6e-5,
        }
    }
}

/// Adam optimizer over a fixed set of named variables
pub struct Adam {
    /// Parameters updated in place
    vars: Vec<(String, Var)>,

    /// Hyperparameters
    params: AdamParams,

    /// Current step count
    step_count: usize,

    /// First moment estimates (momentum)
    first_moment: HashMap<String, Tensor>,

    /// Second moment estimates (RMSprop)
    second_moment: HashMap<String, Tensor>,
}

impl Adam {
    /// Create a new Adam optimizer
    pub fn new(vars: Vec<(String, Var)>, params: AdamParams) -> Result<Self> {
        if vars.is_empty() {
            return Err(Error::config("optimizer needs at least one parameter"));
        }

        Ok(Self {
            vars,
            params,
            step_count: 0,
            first_moment: HashMap::new(),
            second_moment: HashMap::new(),
        })
    }

    /// Hyperparameters
    pub fn params(&self) -> &AdamParams {
        &self.params
    }

    fn update_parameter(&mut self, name: &str, var: &Var, grad: &Tensor) -> Result<()> {
        let AdamParams {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            weight_decay,
        } = self.params;
        // Moments must not keep the autograd graph of previous steps alive.
        let theta = var.as_tensor().detach();
        let grad = grad.detach();

        let grad = if weight_decay > 0.0 {
            (grad + (&theta * weight_decay)?)?
        } else {
            grad
        };

        // m_t = β₁ * m_{t-1} + (1 - β₁) * g_t
        let scaled_grad = (&grad * (1.0 - beta1))?;
        let momentum = match self.first_moment.get(name) {
            Some(prev) => ((prev * beta1)? + scaled_grad)?,
            None => scaled_grad,
        };

        // v_t = β₂ * v_{t-1} + (1 - β₂) * g_t²
        let scaled_sq = (grad.sqr()? * (1.0 - beta2))?;
        let variance = match self.second_moment.get(name) {
            Some(prev) => ((prev * beta2)? + scaled_sq)?,
            None => scaled_sq,
        };

        let step = self.step_count as i32;
        let corrected_momentum = (&momentum / (1.0 - beta1.powi(step)))?;
        let corrected_variance = (&variance / (1.0 - beta2.powi(step)))?;

        let denominator = (corrected_variance.sqrt()? + epsilon)?;
        let update = ((corrected_momentum / denominator)? * learning_rate)?;
        var.set(&(theta - update)?)?;

        self.first_moment.insert(name.to_string(), momentum.detach());
        self.second_moment.insert(name.to_string(), variance.detach());
        Ok(())
    }

    fn find_var(&self, name: &str) -> Result<&Var> {
        self.vars
            .iter()
            .find(|(var_name, _)| var_name == name)
            .map(|(_, var)| var)
            .ok_or_else(|| Error::incompatible(format!("optimizer state for unknown parameter {name}")))
    }

    fn restore_moments(&self, records: &[TensorRecord]) -> Result<HashMap<String, Tensor>> {
        let mut moments = HashMap::with_capacity(records.len());
        for record in records {
            let var = self.find_var(&record.name)?;
            if record.shape.as_slice() != var.dims() {
                return Err(Error::incompatible(format!(
                    "{}: moment shape {:?}, parameter shape {:?}",
                    record.name,
                    record.shape,
                    var.dims()
                )));
            }
            let tensor = record.to_tensor(var.device())?.to_dtype(var.dtype())?;
            moments.insert(record.name.clone(), tensor);
        }
        Ok(moments)
    }
}

fn sorted_records(moments: &HashMap<String, Tensor>) -> Result<Vec<TensorRecord>> {
    let mut records = moments
        .iter()
        .map(|(name, tensor)| TensorRecord::from_tensor(name.as_str(), tensor))
        .collect::<Result<Vec<_>>>()?;
    records.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(records)
}

impl ParamOptimizer for Adam {
    fn name(&self) -> &str {
        "adam"
    }

    fn step(&mut self, gradients: &GradStore) -> Result<()> {
        self.step_count += 1;

        let vars = self.vars.clone();
        for (name, var) in &vars {
            if let Some(grad) = gradients.get(var.as_tensor()) {
                self.update_parameter(name, var, grad)?;
            }
        }

        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.params.learning_rate
    }

    fn step_count(&self) -> usize {
        self.step_count
    }

    fn state_dict(&self) -> Result<Vec<u8>> {
        let state = OptimizerStateDict {
            optimizer_type: self.name().to_string(),
            step_count: self.step_count,
            learning_rate: self.params.learning_rate,
            first_moment: sorted_records(&self.first_moment)?,
            second_moment: sorted_records(&self.second_moment)?,
        };
        bincode::serialize(&state)
            .map_err(|e| Error::internal(format!("failed to encode optimizer state: {e}")))
    }

    fn load_state_dict(&mut self, bytes: &[u8]) -> Result<()> {
        let state: OptimizerStateDict = bincode::deserialize(bytes)?;
        if state.optimizer_type != self.name() {
            return Err(Error::incompatible(format!(
                "expected {} optimizer state, found {}",
                self.name(),
                state.optimizer_type
            )));
        }

        let first_moment = self.restore_moments(&state.first_moment)?;
        let second_moment = self.restore_moments(&state.second_moment)?;

        self.step_count = state.step_count;
        self.params.learning_rate = state.learning_rate;
        self.first_moment = first_moment;
        self.second_moment = second_moment;
        Ok(())
    }
}
