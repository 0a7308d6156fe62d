use candle_core::{DType, IndexOp, Tensor};
use log::debug;

use super::dense::{resolve_posterior, resolve_prior, ParamPair};
use super::{sample_dims, LayerOutput, VariationalLayer};
use crate::error::{BnnError, Result};
use crate::params::ParamStore;
use crate::random::SeedSource;
use crate::vb::WeightDistribution;

/// Configuration for a variational embedding layer.
#[derive(Debug, Clone)]
pub struct EmbedConfig {
    /// Embedding dimension
    pub output_dim: usize,
    /// Number of categories in the input column
    pub n_categories: usize,
    /// Initial prior variance τ² and initial posterior variance
    pub reg: f64,
    /// Full-covariance posterior per embedding column
    pub full: bool,
}

impl EmbedConfig {
    pub fn new(output_dim: usize, n_categories: usize) -> Self {
        Self {
            output_dim,
            n_categories,
            reg: 1.0,
            full: false,
        }
    }
}

/// Embedding layer with variational inference
///
/// Works directly on a column of category *indices*, shape
/// (n_samples, batch, 1), instead of one-hot inputs. Each ensemble member
/// looks its rows up in its own draw of the `(n_categories, output_dim)`
/// embedding matrix. There is no bias.
#[derive(Debug, Clone)]
pub struct EmbedVariational {
    n_categories: usize,
    output_dim: usize,
    weight: ParamPair,
}

impl EmbedVariational {
    pub fn new(config: &EmbedConfig, store: &ParamStore, seeds: &mut dyn SeedSource) -> Result<Self> {
        Self::with_distributions(config, None, None, store, seeds)
    }

    /// Create an embedding layer with an optional supplied prior/posterior
    /// of shape `(n_categories, output_dim)`.
    pub fn with_distributions(
        config: &EmbedConfig,
        prior_w: Option<WeightDistribution>,
        post_w: Option<WeightDistribution>,
        store: &ParamStore,
        seeds: &mut dyn SeedSource,
    ) -> Result<Self> {
        if config.n_categories < 2 {
            return Err(BnnError::InvalidConfiguration(format!(
                "need 2 or more categories for an embedding, got {}",
                config.n_categories
            )));
        }
        if config.output_dim == 0 {
            return Err(BnnError::InvalidConfiguration(
                "embedding dimension must be positive".into(),
            ));
        }

        let shape = [config.n_categories, config.output_dim];
        if let Some(prior) = &prior_w {
            prior.check_shape("embedding prior", &shape)?;
        }
        if let Some(posterior) = &post_w {
            posterior.check_shape("embedding posterior", &shape)?;
        }

        let w_store = store.pp("weight");
        let weight = ParamPair {
            prior: resolve_prior(prior_w, &w_store, &shape, config.reg)?,
            posterior: resolve_posterior(post_w, &w_store, &shape, config.reg, config.full, seeds)?,
        };

        debug!(
            "embedding layer {} categories -> {}: q(W) {}",
            config.n_categories,
            config.output_dim,
            weight.posterior.kind()
        );

        Ok(Self {
            n_categories: config.n_categories,
            output_dim: config.output_dim,
            weight,
        })
    }

    pub fn n_categories(&self) -> usize {
        self.n_categories
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

    pub fn kl(&self) -> Result<Tensor> {
        self.weight.kl()
    }

    /// Category indices of the first ensemble slice as a u32 tensor.
    /// Indices are replicated across samples.
    fn indices(&self, x: &Tensor) -> Result<Tensor> {
        let column = x.i((0, .., 0))?.to_dtype(DType::F64)?.to_vec1::<f64>()?;

        let indices = column
            .iter()
            .map(|&v| {
                if !v.is_finite() || v.fract() != 0.0 {
                    return Err(BnnError::InvalidConfiguration(format!(
                        "category index must be an integer, got {}",
                        v
                    )));
                }
                let index = v as i64;
                if index < 0 || index as usize >= self.n_categories {
                    return Err(BnnError::CategoryOutOfRange {
                        index,
                        n_categories: self.n_categories,
                    });
                }
                Ok(index as u32)
            })
            .collect::<Result<Vec<u32>>>()?;

        let batch = indices.len();
        Ok(Tensor::from_vec(indices, batch, x.device())?)
    }
}

impl VariationalLayer for EmbedVariational {
    fn forward_kl(&self, x: &Tensor, seeds: &mut dyn SeedSource) -> Result<LayerOutput> {
        let (n_samples, input_dim) = sample_dims(x)?;
        if input_dim != 1 {
            return Err(BnnError::InvalidConfiguration(format!(
                "embedding input must be a column of indices, got last dimension {}",
                input_dim
            )));
        }
        let indices = self.indices(x)?;

        let kl = self.weight.kl()?;

        // (S, C, O) -> gather categories -> (S, batch, O)
        let w_sco = self.weight.posterior.sample_n(n_samples, seeds)?;
        let net = w_sco.index_select(&indices, 1)?;

        Ok(LayerOutput { net, kl })
    }
}
