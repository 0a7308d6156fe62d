use candle_core::{DType, Device, Tensor, Var};
use candle_nn::VarMap;

use crate::error::{BnnError, Result};

/// Scoped registry of trainable parameters.
///
/// Works like `VarBuilder::pp` over a `VarMap`, except that parameters are
/// registered from explicit initial tensors. Initial values come from
/// seeded draws, so they cannot be expressed as a `candle_nn::Init`.
#[derive(Clone)]
pub struct ParamStore {
    varmap: VarMap,
    path: Vec<String>,
    dtype: DType,
    device: Device,
}

impl ParamStore {
    pub fn new(varmap: &VarMap, dtype: DType, device: &Device) -> Self {
        Self {
            varmap: varmap.clone(),
            path: vec![],
            dtype,
            device: device.clone(),
        }
    }

    /// Push a prefix onto the parameter path.
    pub fn pp<S: ToString>(&self, name: S) -> Self {
        let mut path = self.path.clone();
        path.push(name.to_string());
        Self {
            varmap: self.varmap.clone(),
            path,
            dtype: self.dtype,
            device: self.device.clone(),
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// The underlying variable map, for optimizers.
    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    fn full_name(&self, name: &str) -> String {
        if self.path.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.path.join("."), name)
        }
    }

    /// Register `init` as a trainable variable and return its tensor handle.
    ///
    /// The returned tensor tracks gradients and follows optimizer updates.
    pub fn trainable(&self, name: &str, init: &Tensor) -> Result<Tensor> {
        let full_name = self.full_name(name);
        let init = init.to_dtype(self.dtype)?.to_device(&self.device)?;
        let var = Var::from_tensor(&init)?;
        let tensor = var.as_tensor().clone();

        let mut data = self
            .varmap
            .data()
            .lock()
            .map_err(|e| candle_core::Error::Msg(format!("poisoned VarMap: {}", e)))?;

        if data.contains_key(&full_name) {
            return Err(BnnError::InvalidConfiguration(format!(
                "parameter {} is already registered",
                full_name
            )));
        }
        data.insert(full_name, var);
        Ok(tensor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trainable_registration() -> Result<()> {
        let varmap = VarMap::new();
        let store = ParamStore::new(&varmap, DType::F32, &Device::Cpu);

        let init = Tensor::ones((2, 3), DType::F64, &Device::Cpu)?;
        let w = store.pp("layer0").trainable("post_mean", &init)?;

        assert_eq!(w.dims(), &[2, 3]);
        assert_eq!(w.dtype(), DType::F32);
        assert_eq!(varmap.all_vars().len(), 1);
        assert!(varmap.data().lock().unwrap().contains_key("layer0.post_mean"));
        Ok(())
    }

    #[test]
    fn test_duplicate_name_rejected() -> Result<()> {
        let varmap = VarMap::new();
        let store = ParamStore::new(&varmap, DType::F32, &Device::Cpu);
        let init = Tensor::zeros(3, DType::F32, &Device::Cpu)?;

        store.trainable("b", &init)?;
        let err = store.trainable("b", &init).unwrap_err();
        assert!(matches!(err, BnnError::InvalidConfiguration(_)));
        Ok(())
    }
}
