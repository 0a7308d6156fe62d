use candle_core::Tensor;
use log::debug;

use super::{sample_dims, LayerOutput, VariationalLayer};
use crate::error::{BnnError, Result};
use crate::params::ParamStore;
use crate::random::SeedSource;
use crate::vb::{kl_qp, make_posterior_diagonal, make_posterior_full, make_prior, WeightDistribution};

/// Configuration for a variational dense layer.
#[derive(Debug, Clone)]
pub struct DenseConfig {
    /// Number of output units
    pub output_dim: usize,
    /// Initial prior variance τ² and initial posterior variance
    pub reg: f64,
    /// Full-covariance posterior per output column (weights only)
    pub full: bool,
    /// Learn a bias (offset) term
    pub use_bias: bool,
}

impl DenseConfig {
    pub fn new(output_dim: usize) -> Self {
        Self {
            output_dim,
            reg: 1.0,
            full: false,
            use_bias: true,
        }
    }
}

/// Caller-supplied priors and posteriors.
///
/// A supplied distribution replaces the one the layer would build from
/// `reg`/`full`. Supplying either bias distribution enables the bias.
#[derive(Debug, Clone, Default)]
pub struct DistributionOverrides {
    pub prior_w: Option<WeightDistribution>,
    pub post_w: Option<WeightDistribution>,
    pub prior_b: Option<WeightDistribution>,
    pub post_b: Option<WeightDistribution>,
}

/// Prior/posterior pair over one parameter block.
#[derive(Debug, Clone)]
pub(crate) struct ParamPair {
    pub prior: WeightDistribution,
    pub posterior: WeightDistribution,
}

impl ParamPair {
    pub fn kl(&self) -> Result<Tensor> {
        kl_qp(&self.posterior, &self.prior)
    }
}

/// Check a supplied distribution or build a learnable `N(0, reg I)` prior.
pub(crate) fn resolve_prior(
    given: Option<WeightDistribution>,
    store: &ParamStore,
    shape: &[usize],
    reg: f64,
) -> Result<WeightDistribution> {
    match given {
        Some(prior) => {
            prior.check_shape("prior", shape)?;
            Ok(prior)
        }
        None => Ok(make_prior(store, shape, reg)?.into()),
    }
}

/// Check a supplied distribution or build a fresh posterior.
///
/// A full covariance is only built for 2-D (weight matrix) shapes; a bias
/// always gets a diagonal posterior.
pub(crate) fn resolve_posterior(
    given: Option<WeightDistribution>,
    store: &ParamStore,
    shape: &[usize],
    reg: f64,
    full: bool,
    seeds: &mut dyn SeedSource,
) -> Result<WeightDistribution> {
    match (given, shape) {
        (Some(posterior), _) => {
            posterior.check_shape("posterior", shape)?;
            Ok(posterior)
        }
        (None, &[rows, cols]) if full => {
            Ok(make_posterior_full(store, (rows, cols), reg, seeds)?.into())
        }
        (None, _) => Ok(make_posterior_diagonal(store, shape, reg, seeds)?.into()),
    }
}

/// Dense (fully connected) layer with variational inference
///
/// `Y_s = X_s W_s + b_s` for each ensemble member `s`, where `W_s ~ q(W)`
/// and `b_s ~ q(b)` are independent posterior draws. The KL penalty
/// `KL[q(W) || p(W)] + KL[q(b) || p(b)]` does not depend on the number of
/// draws.
#[derive(Debug, Clone)]
pub struct DenseVariational {
    input_dim: usize,
    output_dim: usize,
    weight: ParamPair,
    bias: Option<ParamPair>,
}

impl DenseVariational {
    /// Create a dense layer, building all distributions from `config`.
    ///
    /// # Arguments
    /// * `input_dim` - last dimension of the layer's inputs
    /// * `config` - layer configuration
    /// * `store` - parameter scope for the layer
    /// * `seeds` - seed source for posterior initialisation
    pub fn new(
        input_dim: usize,
        config: &DenseConfig,
        store: &ParamStore,
        seeds: &mut dyn SeedSource,
    ) -> Result<Self> {
        Self::with_distributions(
            input_dim,
            config,
            DistributionOverrides::default(),
            store,
            seeds,
        )
    }

    /// Create a dense layer with some or all distributions supplied.
    ///
    /// Supplied distributions are shape-checked against
    /// `(input_dim, output_dim)` and `(output_dim,)` before anything is
    /// built. Seeds are consumed in the order: weight prior, weight
    /// posterior, bias prior, bias posterior.
    pub fn with_distributions(
        input_dim: usize,
        config: &DenseConfig,
        overrides: DistributionOverrides,
        store: &ParamStore,
        seeds: &mut dyn SeedSource,
    ) -> Result<Self> {
        let output_dim = config.output_dim;
        if input_dim == 0 || output_dim == 0 {
            return Err(BnnError::InvalidConfiguration(format!(
                "dense layer needs positive dimensions, got {} -> {}",
                input_dim, output_dim
            )));
        }

        let w_shape = [input_dim, output_dim];
        let b_shape = [output_dim];

        let DistributionOverrides {
            prior_w,
            post_w,
            prior_b,
            post_b,
        } = overrides;

        for (dist, what, shape) in [
            (&prior_w, "weight prior", &w_shape[..]),
            (&post_w, "weight posterior", &w_shape[..]),
            (&prior_b, "bias prior", &b_shape[..]),
            (&post_b, "bias posterior", &b_shape[..]),
        ] {
            if let Some(dist) = dist {
                dist.check_shape(what, shape)?;
            }
        }

        let use_bias = config.use_bias || prior_b.is_some() || post_b.is_some();

        let w_store = store.pp("weight");
        let weight = ParamPair {
            prior: resolve_prior(prior_w, &w_store, &w_shape, config.reg)?,
            posterior: resolve_posterior(post_w, &w_store, &w_shape, config.reg, config.full, seeds)?,
        };

        let bias = if use_bias {
            let b_store = store.pp("bias");
            Some(ParamPair {
                prior: resolve_prior(prior_b, &b_store, &b_shape, config.reg)?,
                posterior: resolve_posterior(post_b, &b_store, &b_shape, config.reg, config.full, seeds)?,
            })
        } else {
            None
        };

        debug!(
            "dense layer {} -> {}: q(W) {}, bias {}",
            input_dim,
            output_dim,
            weight.posterior.kind(),
            use_bias
        );

        Ok(Self {
            input_dim,
            output_dim,
            weight,
            bias,
        })
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn output_dim(&self) -> usize {
        self.output_dim
    }

    pub fn weight_prior(&self) -> &WeightDistribution {
        &self.weight.prior
    }

    pub fn weight_posterior(&self) -> &WeightDistribution {
        &self.weight.posterior
    }

    pub fn bias_prior(&self) -> Option<&WeightDistribution> {
        self.bias.as_ref().map(|b| &b.prior)
    }

    pub fn bias_posterior(&self) -> Option<&WeightDistribution> {
        self.bias.as_ref().map(|b| &b.posterior)
    }

    /// Total KL penalty of the layer's parameters.
    pub fn kl(&self) -> Result<Tensor> {
        let kl = self.weight.kl()?;
        match &self.bias {
            Some(bias) => Ok((kl + bias.kl()?)?),
            None => Ok(kl),
        }
    }
}

impl VariationalLayer for DenseVariational {
    fn forward_kl(&self, x: &Tensor, seeds: &mut dyn SeedSource) -> Result<LayerOutput> {
        let (n_samples, input_dim) = sample_dims(x)?;
        if input_dim != self.input_dim {
            return Err(BnnError::ShapeMismatch {
                what: "input",
                expected: vec![n_samples, x.dim(1)?, self.input_dim],
                actual: x.dims().to_vec(),
            });
        }

        // weights: (S, I, O), one draw per ensemble member
        let mut kl = self.weight.kl()?;
        let w_sio = self.weight.posterior.sample_n(n_samples, seeds)?;
        let mut net = x.contiguous()?.matmul(&w_sio)?;

        if let Some(bias) = &self.bias {
            kl = (kl + bias.kl()?)?;
            // (S, O) -> (S, 1, O), broadcast over the batch
            let b_s1o = bias.posterior.sample_n(n_samples, seeds)?.unsqueeze(1)?;
            net = net.broadcast_add(&b_s1o)?;
        }

        Ok(LayerOutput { net, kl })
    }
}
