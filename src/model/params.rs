//! Parameter snapshots shared by models and optimizers

use std::collections::HashMap;

use candle_core::{DType, Device, Tensor, Var};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Host-side copy of one named tensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorRecord {
    /// Parameter name
    pub name: String,
    /// Tensor dimensions
    pub shape: Vec<usize>,
    /// Row-major values
    pub values: Vec<f32>,
}

impl TensorRecord {
    /// Copy a tensor to the host
    pub fn from_tensor(name: impl Into<String>, tensor: &Tensor) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            shape: tensor.dims().to_vec(),
            values: tensor.flatten_all()?.to_dtype(DType::F32)?.to_vec1::<f32>()?,
        })
    }

    /// Rebuild the tensor on `device`
    pub fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        let expected: usize = self.shape.iter().product();
        if expected != self.values.len() {
            return Err(Error::incompatible(format!(
                "{}: shape {:?} needs {} values, record has {}",
                self.name,
                self.shape,
                expected,
                self.values.len()
            )));
        }
        Ok(Tensor::from_vec(self.values.clone(), self.shape.as_slice(), device)?)
    }
}

/// Serialize named variables into a blob
pub fn snapshot_vars(vars: &[(String, Var)]) -> Result<Vec<u8>> {
    let records = vars
        .iter()
        .map(|(name, var)| TensorRecord::from_tensor(name.as_str(), var.as_tensor()))
        .collect::<Result<Vec<_>>>()?;

    bincode::serialize(&records)
        .map_err(|e| Error::internal(format!("failed to encode parameters: {e}")))
}

/// Overwrite named variables from a blob produced by [`snapshot_vars`]
pub fn restore_vars(vars: &[(String, Var)], bytes: &[u8]) -> Result<()> {
    let records: Vec<TensorRecord> = bincode::deserialize(bytes)?;
    if records.len() != vars.len() {
        return Err(Error::incompatible(format!(
            "blob holds {} parameters, model has {}",
            records.len(),
            vars.len()
        )));
    }

    let by_name: HashMap<&str, &TensorRecord> =
        records.iter().map(|r| (r.name.as_str(), r)).collect();

    for (name, var) in vars {
        let record = by_name
            .get(name.as_str())
            .ok_or_else(|| Error::incompatible(format!("missing parameter {name}")))?;

        if record.shape.as_slice() != var.dims() {
            return Err(Error::incompatible(format!(
                "{name}: stored shape {:?}, live shape {:?}",
                record.shape,
                var.dims()
            )));
        }

        let value = record.to_tensor(var.device())?.to_dtype(var.dtype())?;
        var.set(&value)?;
    }

    Ok(())
}
