use candle_core::{Device, Tensor};
use log::debug;

use super::distributions::{FullCovarianceGaussian, IndependentGaussian};
use crate::error::{BnnError, Result};
use crate::params::ParamStore;
use crate::random::{randn_tensor, rgamma_tensor, SeedSource};

fn check_variance(variance: f64) -> Result<()> {
    if !(variance.is_finite() && variance > 0.0) {
        return Err(BnnError::InvalidConfiguration(format!(
            "variance must be positive and finite, got {}",
            variance
        )));
    }
    Ok(())
}

/// Row-major (row, col) positions of the lower triangle of a `d x d` matrix
pub fn tril_indices(d: usize) -> Vec<(usize, usize)> {
    (0..d).flat_map(|u| (0..=u).map(move |v| (u, v))).collect()
}

/// Learnable prior p(W) = N(0, τ² I)
///
/// The mean is fixed at zero. The variance τ² is a single trainable
/// scalar shared by every element (type-II maximum likelihood), stored raw
/// and passed through the positivity transform on use. Draws no seeds.
///
/// * `store` - parameter scope; registers `prior_var`
/// * `shape` - (rows, cols) or (cols,)
/// * `variance` - initial τ²
pub fn make_prior(store: &ParamStore, shape: &[usize], variance: f64) -> Result<IndependentGaussian> {
    check_variance(variance)?;

    let mean = Tensor::zeros(shape, store.dtype(), store.device())?;
    let raw_var = store.trainable("prior_var", &Tensor::new(variance, &Device::Cpu)?)?;

    debug!("prior N(0, {}) over {:?}", variance, shape);
    IndependentGaussian::new(mean, raw_var)
}

/// Mean-field posterior q(W) = N(μ, diag(σ²))
///
/// Seed order: μ ~ N(0, v₀) first, then raw σ² ~ Gamma(v₀, 1).
///
/// * `store` - parameter scope; registers `post_mean` and `post_var`
/// * `shape` - (rows, cols) or (cols,)
/// * `initial_variance` - v₀
pub fn make_posterior_diagonal(
    store: &ParamStore,
    shape: &[usize],
    initial_variance: f64,
    seeds: &mut dyn SeedSource,
) -> Result<IndependentGaussian> {
    check_variance(initial_variance)?;
    let (dtype, device) = (store.dtype(), store.device());

    let mean0 = randn_tensor(shape, initial_variance.sqrt(), seeds.next_seed(), dtype, device)?;
    let mean = store.trainable("post_mean", &mean0)?;

    let var0 = rgamma_tensor(shape, initial_variance, seeds.next_seed(), dtype, device)?;
    let raw_var = store.trainable("post_var", &var0)?;

    debug!("diagonal posterior over {:?}", shape);
    IndependentGaussian::new(mean, raw_var)
}

/// Full-covariance posterior, one `rows x rows` Cholesky factor per column
///
/// Only the `rows (rows + 1) / 2` lower-triangular entries per column are
/// trainable; they are scattered into `(cols, rows, rows)` by a constant
/// selection matrix, so the factor is triangular by construction. Entries
/// start as the identity pattern scaled by Gamma(√v₀, 1) draws.
///
/// Seed order: the Gamma draw first, then μ ~ N(0, v₀).
///
/// * `store` - parameter scope; registers `post_chol` and `post_mean`
/// * `shape` - (rows, cols)
/// * `initial_variance` - v₀
pub fn make_posterior_full(
    store: &ParamStore,
    shape: (usize, usize),
    initial_variance: f64,
    seeds: &mut dyn SeedSource,
) -> Result<FullCovarianceGaussian> {
    check_variance(initial_variance)?;
    let (rows, cols) = shape;
    if rows == 0 || cols == 0 {
        return Err(BnnError::InvalidConfiguration(format!(
            "full covariance needs a non-empty shape, got {:?}",
            shape
        )));
    }
    let (dtype, device) = (store.dtype(), store.device());
    let sig0 = initial_variance.sqrt();

    let tril = tril_indices(rows);
    let n_tril = tril.len();

    // identity pattern on the packed lower triangle, same for every column
    let mut eye_kj = vec![0f32; n_tril * cols];
    // scatter packed entries k into the flattened (u * rows + v) position
    let mut select_dk = vec![0f32; rows * rows * n_tril];
    for (k, &(u, v)) in tril.iter().enumerate() {
        if u == v {
            eye_kj[k * cols..(k + 1) * cols].fill(1.0);
        }
        select_dk[(u * rows + v) * n_tril + k] = 1.0;
    }

    let eye_kj = Tensor::from_vec(eye_kj, (n_tril, cols), &Device::Cpu)?
        .to_dtype(dtype)?
        .to_device(device)?;
    let gamma_kj = rgamma_tensor((n_tril, cols), sig0, seeds.next_seed(), dtype, device)?;
    let l_kj = store.trainable("post_chol", &(eye_kj * gamma_kj)?)?;

    let select_dk = Tensor::from_vec(select_dk, (rows * rows, n_tril), &Device::Cpu)?
        .to_dtype(dtype)?
        .to_device(device)?;

    let mean0 = randn_tensor((rows, cols), sig0, seeds.next_seed(), dtype, device)?;
    let mean = store.trainable("post_mean", &mean0)?;

    debug!("full-covariance posterior over ({}, {})", rows, cols);
    FullCovarianceGaussian::from_packed(mean, l_kj, select_dk)
}
