use candle_core::{Module, Tensor};
use candle_nn::Activation;

use super::{LayerOutput, VariationalLayer};
use crate::error::{BnnError, Result};
use crate::random::SeedSource;

/// Sequential composition of variational layers.
///
/// The output of each layer (after its optional activation) feeds the next
/// one; the KL penalties of all layers are summed.
#[derive(Default)]
pub struct VariationalStack {
    layers: Vec<Box<dyn VariationalLayer>>,
    activations: Vec<Option<Activation>>,
}

impl VariationalStack {
    pub fn new() -> Self {
        Self {
            layers: Vec::new(),
            activations: Vec::new(),
        }
    }

    /// Appends a layer followed by `activation` after all the current layers.
    pub fn push_with_act<L: VariationalLayer + 'static>(&mut self, layer: L, activation: Activation) {
        self.layers.push(Box::new(layer));
        self.activations.push(Some(activation));
    }

    pub fn push<L: VariationalLayer + 'static>(&mut self, layer: L) {
        self.layers.push(Box::new(layer));
        self.activations.push(None);
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl VariationalLayer for VariationalStack {
    fn forward_kl(&self, input: &Tensor, seeds: &mut dyn SeedSource) -> Result<LayerOutput> {
        if self.layers.is_empty() {
            return Err(BnnError::InvalidConfiguration(
                "cannot evaluate an empty layer stack".into(),
            ));
        }

        let mut x = input.clone();
        let mut kl: Option<Tensor> = None;

        for (layer, activation) in self.layers.iter().zip(self.activations.iter()) {
            let out = layer.forward_kl(&x, seeds)?;
            x = match activation {
                Some(activation) => activation.forward(&out.net)?,
                None => out.net,
            };
            kl = Some(match kl {
                Some(total) => (total + out.kl)?,
                None => out.kl,
            });
        }

        let kl = kl.ok_or_else(|| BnnError::InvalidConfiguration("no layer produced a KL".into()))?;
        Ok(LayerOutput { net: x, kl })
    }
}

/// Replicate a `(batch, dim)` tensor into `(n_samples, batch, dim)` ensemble
/// inputs.
pub fn tile_samples(x: &Tensor, n_samples: usize) -> Result<Tensor> {
    if x.rank() != 2 {
        return Err(BnnError::InvalidRank(x.rank()));
    }
    if n_samples == 0 {
        return Err(BnnError::InvalidConfiguration(
            "need at least one sample".into(),
        ));
    }
    Ok(x.unsqueeze(0)?.repeat((n_samples, 1, 1))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{DenseConfig, DenseVariational, EmbedConfig, EmbedVariational};
    use crate::params::ParamStore;
    use crate::random::SeedSequence;
    use approx::assert_abs_diff_eq;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_tile_samples() -> Result<()> {
        let x = Tensor::arange(0f32, 6f32, &Device::Cpu)?.reshape((3, 2))?;
        let xs = tile_samples(&x, 4)?;
        assert_eq!(xs.dims(), &[4, 3, 2]);
        assert_eq!(xs.get(3)?.to_vec2::<f32>()?, x.to_vec2::<f32>()?);

        assert!(matches!(
            tile_samples(&xs, 2),
            Err(BnnError::InvalidRank(3))
        ));
        Ok(())
    }

    #[test]
    fn test_stack_sums_kl() -> Result<()> {
        let varmap = VarMap::new();
        let store = ParamStore::new(&varmap, DType::F32, &Device::Cpu);
        let mut seeds = SeedSequence::default();

        let l0 = DenseVariational::new(4, &DenseConfig::new(8), &store.pp("l0"), &mut seeds)?;
        let l1 = DenseVariational::new(
            8,
            &DenseConfig {
                full: true,
                ..DenseConfig::new(2)
            },
            &store.pp("l1"),
            &mut seeds,
        )?;
        let expected = (l0.kl()?.to_scalar::<f32>()? + l1.kl()?.to_scalar::<f32>()?) as f64;

        let mut net = VariationalStack::new();
        net.push_with_act(l0, Activation::Relu);
        net.push(l1);
        assert_eq!(net.len(), 2);

        let x = tile_samples(&Tensor::randn(0f32, 1f32, (10, 4), &Device::Cpu)?, 3)?;
        let out = net.forward_kl(&x, &mut seeds)?;

        assert_eq!(out.net.dims(), &[3, 10, 2]);
        assert_abs_diff_eq!(out.kl.to_scalar::<f32>()? as f64, expected, epsilon = 1e-3);
        Ok(())
    }

    #[test]
    fn test_embedding_then_dense() -> Result<()> {
        let varmap = VarMap::new();
        let store = ParamStore::new(&varmap, DType::F32, &Device::Cpu);
        let mut seeds = SeedSequence::default();

        let mut net = VariationalStack::default();
        net.push(EmbedVariational::new(
            &EmbedConfig::new(3, 5),
            &store.pp("embed"),
            &mut seeds,
        )?);
        net.push(DenseVariational::new(3, &DenseConfig::new(1), &store.pp("out"), &mut seeds)?);

        let x = Tensor::new(&[[0f32], [4.], [2.]], &Device::Cpu)?;
        let out = net.forward_kl(&tile_samples(&x, 2)?, &mut seeds)?;
        assert_eq!(out.net.dims(), &[2, 3, 1]);
        Ok(())
    }

    #[test]
    fn test_empty_stack() -> Result<()> {
        let net = VariationalStack::new();
        assert!(net.is_empty());
        let x = Tensor::zeros((1, 2, 3), DType::F32, &Device::Cpu)?;
        assert!(net
            .forward_kl(&x, &mut SeedSequence::default())
            .is_err());
        Ok(())
    }
}
