//! Weight distributions for variational Bayesian layers.
//!
//! Priors and posteriors over weight matrices, their reparameterized
//! samplers, and closed-form KL divergences between them.
//!
//! # Key characteristics
//!
//! - Posterior draws use the reparameterization `W = μ + scale * ε`, so
//!   gradients flow into the variational parameters
//! - Priors are `N(0, τ² I)` with a learnable τ² (type-II maximum likelihood)
//! - `kl_qp` is evaluated in closed form once per layer evaluation
//!
//! # Example
//!
//! ```ignore
//! use candle_bnn::vb::{kl_qp, make_posterior_diagonal, make_prior};
//!
//! let p = make_prior(&store.pp("prior"), &[4, 2], 1.0)?;
//! let q = make_posterior_diagonal(&store.pp("post"), &[4, 2], 1.0, &mut seeds)?;
//! let kl = kl_qp(&q.clone().into(), &p.into())?;
//! let w = q.sample(&mut seeds)?;
//! ```

mod distributions;
mod divergence;
mod factories;
pub mod linalg;

pub use distributions::{
    itransform_w, positive, transform_w, FullCovarianceGaussian, IndependentGaussian,
    WeightDistribution, VAR_FLOOR,
};
pub use divergence::kl_qp;
pub use factories::{make_posterior_diagonal, make_posterior_full, make_prior, tril_indices};
