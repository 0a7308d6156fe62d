//! Variational Bayesian weight layers on candle.
//!
//! Weight priors and posteriors ([`vb`]), closed-form KL divergences between
//! them, and stochastic dense/embedding layers ([`layers`]) that evaluate an
//! ensemble of posterior draws and report their KL penalty for an ELBO.

pub mod cli;
pub mod error;
pub mod layers;
pub mod params;
pub mod random;
pub mod vb;

pub use error::{BnnError, Result};
pub use layers::{
    tile_samples, DenseConfig, DenseVariational, DistributionOverrides, EmbedConfig,
    EmbedVariational, LayerOutput, VariationalLayer, VariationalStack,
};
pub use params::ParamStore;
pub use random::{SeedSequence, SeedSource};
pub use vb::{
    kl_qp, make_posterior_diagonal, make_posterior_full, make_prior, FullCovarianceGaussian,
    IndependentGaussian, WeightDistribution,
};

pub use candle_core;
pub use candle_nn;
