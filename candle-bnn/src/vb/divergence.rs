use candle_core::Tensor;

use super::distributions::{
    transform_w, FullCovarianceGaussian, IndependentGaussian, WeightDistribution,
};
use super::linalg::{batch_trace, cholesky_solve};
use crate::error::{BnnError, Result};

/// KL[q || p] between a posterior `q` and a prior `p`
///
/// Dispatches on the pair of distribution kinds:
///
/// | q \ p          | Independent | FullCovariance |
/// |----------------|-------------|----------------|
/// | Independent    | closed form | unsupported    |
/// | FullCovariance | closed form | closed form    |
///
/// # Returns
/// Scalar tensor, summed over every element/column, differentiable in the
/// parameters of both distributions.
pub fn kl_qp(q: &WeightDistribution, p: &WeightDistribution) -> Result<Tensor> {
    if q.shape() != p.shape() {
        return Err(BnnError::ShapeMismatch {
            what: "prior",
            expected: q.shape().to_vec(),
            actual: p.shape().to_vec(),
        });
    }

    match (q, p) {
        (WeightDistribution::Independent(q), WeightDistribution::Independent(p)) => {
            kl_independent(q, p)
        }
        (WeightDistribution::FullCovariance(q), WeightDistribution::Independent(p)) => {
            kl_full_independent(q, p)
        }
        (WeightDistribution::FullCovariance(q), WeightDistribution::FullCovariance(p)) => {
            kl_full_full(q, p)
        }
        (WeightDistribution::Independent(_), WeightDistribution::FullCovariance(_)) => {
            Err(BnnError::NoDivergenceRule {
                q: q.kind(),
                p: p.kind(),
            })
        }
    }
}

/// KL between two diagonal Gaussians
///
/// 0.5 * Σ [ln σ²_p - ln σ²_q + σ²_q/σ²_p - 1 + (μ_q - μ_p)²/σ²_p]
fn kl_independent(q: &IndependentGaussian, p: &IndependentGaussian) -> Result<Tensor> {
    let q_var = q.variance()?;
    let p_var = p.variance()?;

    let log_ratio = (p_var.log()? - q_var.log()?)?;
    let var_ratio = (q_var / &p_var)?;
    let dist = (q.mean() - p.mean())?.sqr()?.div(&p_var)?;

    let kl = ((log_ratio + var_ratio)? - 1.0)?.add(&dist)?.sum_all()?;
    Ok((kl * 0.5)?)
}

/// KL between per-column full-covariance q and a diagonal prior p
///
/// With D rows and n columns:
///   tr     = Σ_j Σ_i (L_j L_jᵗ)_ii / σ²_p,ij
///   dist   = Σ (μ_p - μ_q)² / σ²_p
///   logdet = Σ ln σ²_p - ln|Σ_q|
///   KL     = 0.5 * (tr + dist + logdet - n D)
///
/// With a shared scalar σ²_p, Σ ln σ²_p = n D ln σ²_p.
fn kl_full_independent(q: &FullCovarianceGaussian, p: &IndependentGaussian) -> Result<Tensor> {
    let (d, n) = q.mean().dims2()?;
    let p_var = p.variance()?;

    // diag(L Lᵗ) is the row-wise squared norm of L: (n, D) -> (D, n)
    let q_diag_cov = q.cholesky()?.sqr()?.sum(2)?.t()?;
    let tr = q_diag_cov.div(&p_var)?.sum_all()?;

    let dist = (p.mean() - q.mean())?.sqr()?.div(&p_var)?.sum_all()?;
    let logdet = (p_var.log()?.sum_all()? - q.logdet()?)?;

    combine(&tr, &dist, &logdet, n * d)
}

/// KL between two per-column full-covariance Gaussians
///
///   tr     = Σ_j tr(Σ_p,j⁻¹ Σ_q,j)
///   dist   = Σ_j Δ_jᵗ Σ_p,j⁻¹ Δ_j,  Δ = μ_p - μ_q
///   logdet = ln|Σ_p| - ln|Σ_q|
///   KL     = 0.5 * (tr + dist + logdet - n D)
///
/// Σ_p⁻¹ is applied through triangular solves against p's factor.
fn kl_full_full(q: &FullCovarianceGaussian, p: &FullCovarianceGaussian) -> Result<Tensor> {
    let (d, n) = q.mean().dims2()?;
    let p_chol = p.cholesky()?;

    let q_cov = q.covariance()?;
    let tr = batch_trace(&cholesky_solve(&p_chol, &q_cov)?)?;

    let md = transform_w(&(p.mean() - q.mean())?)?;
    let dist = (&md * cholesky_solve(&p_chol, &md)?)?.sum_all()?;

    let logdet = (p.logdet()? - q.logdet()?)?;

    combine(&tr, &dist, &logdet, n * d)
}

fn combine(tr: &Tensor, dist: &Tensor, logdet: &Tensor, nd: usize) -> Result<Tensor> {
    let kl = ((tr + dist)? + logdet)?;
    Ok(((kl - nd as f64)? * 0.5)?)
}
