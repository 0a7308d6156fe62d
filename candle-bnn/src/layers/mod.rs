//! Stochastic layers for variational Bayesian networks.
//!
//! Every layer consumes a rank-3 `(n_samples, batch, dim)` tensor, where the
//! leading axis indexes ensemble members (independent posterior draws), and
//! returns the transformed tensor together with the layer's KL penalty.
//!
//! ```ignore
//! let mut net = VariationalStack::new();
//! net.push_with_act(DenseVariational::new(d, &DenseConfig::new(20), &store.pp("l0"), &mut seeds)?, Activation::Relu);
//! net.push(DenseVariational::new(20, &DenseConfig::new(1), &store.pp("l1"), &mut seeds)?);
//!
//! let LayerOutput { net: y, kl } = net.forward_kl(&tile_samples(&x, 5)?, &mut seeds)?;
//! // loss = -(llik(y) - kl / n_total)
//! ```

mod dense;
mod embedding;
mod stack;

pub use dense::{DenseConfig, DenseVariational, DistributionOverrides};
pub use embedding::{EmbedConfig, EmbedVariational};
pub use stack::{tile_samples, VariationalStack};

use candle_core::Tensor;

use crate::error::{BnnError, Result};
use crate::random::SeedSource;

/// Output of a stochastic layer evaluation.
#[derive(Debug, Clone)]
pub struct LayerOutput {
    /// Transformed samples, shape (n_samples, batch, output_dim)
    pub net: Tensor,
    /// KL[q || p] of this layer's parameters, scalar
    pub kl: Tensor,
}

/// A layer evaluated on ensemble samples.
pub trait VariationalLayer {
    /// Evaluate the layer, drawing fresh weight samples from `seeds`.
    ///
    /// # Arguments
    /// * `x` - input, shape (n_samples, batch, input_dim)
    /// * `seeds` - random seed source, advanced once per weight draw
    fn forward_kl(&self, x: &Tensor, seeds: &mut dyn SeedSource) -> Result<LayerOutput>;
}

/// `(n_samples, input_dim)` of a rank-3 sample tensor
pub fn sample_dims(x: &Tensor) -> Result<(usize, usize)> {
    match *x.dims() {
        [0, _, _] => Err(BnnError::InvalidConfiguration(
            "need at least one sample".into(),
        )),
        [n_samples, _, input_dim] => Ok((n_samples, input_dim)),
        _ => Err(BnnError::InvalidRank(x.rank())),
    }
}
