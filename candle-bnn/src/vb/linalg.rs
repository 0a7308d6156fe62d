//! Batched triangular linear algebra on candle tensors.
//!
//! All routines take a leading batch dimension `B` and are built from
//! differentiable tensor ops (`narrow`, `matmul`, `cat`), so gradients
//! flow back into the triangular factors.

use candle_core::{Result, Tensor};

/// Floor applied to Cholesky diagonals before taking logs.
pub const CHOL_DIAG_FLOOR: f64 = 1e-15;

/// Diagonals of a batch of square matrices: (B, D, D) -> (B, D)
pub fn batch_diag(m_bdd: &Tensor) -> Result<Tensor> {
    let (_, d, d2) = m_bdd.dims3()?;
    if d != d2 {
        candle_core::bail!("expected square matrices, got {:?}", m_bdd.dims());
    }
    let eye = Tensor::eye(d, m_bdd.dtype(), m_bdd.device())?;
    m_bdd.broadcast_mul(&eye)?.sum(2)
}

/// Sum of traces of a batch of square matrices, as a scalar.
pub fn batch_trace(m_bdd: &Tensor) -> Result<Tensor> {
    batch_diag(m_bdd)?.sum_all()
}

/// log|Σ| summed over a batch of Cholesky factors `L`, Σ = L Lᵗ
///
/// logdet = 2 * Σ log(max(diag(L), ε))
pub fn cholesky_logdet(l_bdd: &Tensor) -> Result<Tensor> {
    let diag = batch_diag(l_bdd)?.maximum(CHOL_DIAG_FLOOR)?;
    diag.log()?.sum_all()? * 2.0
}

fn check_system(a_bdd: &Tensor, b_bdk: &Tensor) -> Result<(usize, usize)> {
    let (nb, d, d2) = a_bdd.dims3()?;
    let (nb2, db, k) = b_bdk.dims3()?;
    if d != d2 || nb != nb2 || d != db {
        candle_core::bail!(
            "incompatible triangular system: A {:?}, B {:?}",
            a_bdd.dims(),
            b_bdk.dims()
        );
    }
    Ok((d, k))
}

/// Solve `L X = B` by forward substitution.
///
/// * `l_bdd` - lower-triangular factors, shape (B, D, D)
/// * `b_bdk` - right-hand sides, shape (B, D, K)
///
/// Entries above the diagonal of `l_bdd` are ignored.
pub fn solve_lower_triangular(l_bdd: &Tensor, b_bdk: &Tensor) -> Result<Tensor> {
    let (d, _) = check_system(l_bdd, b_bdk)?;

    let mut rows: Vec<Tensor> = Vec::with_capacity(d);
    for i in 0..d {
        let l_i = l_bdd.narrow(1, i, 1)?;
        let l_ii = l_i.narrow(2, i, 1)?;
        let b_i = b_bdk.narrow(1, i, 1)?;

        let r_i = if i == 0 {
            b_i
        } else {
            let l_head = l_i.narrow(2, 0, i)?.contiguous()?;
            let x_head = Tensor::cat(&rows, 1)?;
            (b_i - l_head.matmul(&x_head)?)?
        };
        rows.push(r_i.broadcast_div(&l_ii)?);
    }
    Tensor::cat(&rows, 1)
}

/// Solve `U X = B` by back substitution.
///
/// * `u_bdd` - upper-triangular matrices, shape (B, D, D)
/// * `b_bdk` - right-hand sides, shape (B, D, K)
///
/// Entries below the diagonal of `u_bdd` are ignored.
pub fn solve_upper_triangular(u_bdd: &Tensor, b_bdk: &Tensor) -> Result<Tensor> {
    let (d, _) = check_system(u_bdd, b_bdk)?;

    // rows i+1..d of the solution, in order
    let mut tail: Vec<Tensor> = Vec::with_capacity(d);
    for i in (0..d).rev() {
        let u_i = u_bdd.narrow(1, i, 1)?;
        let u_ii = u_i.narrow(2, i, 1)?;
        let b_i = b_bdk.narrow(1, i, 1)?;

        let r_i = if i + 1 == d {
            b_i
        } else {
            let u_tail = u_i.narrow(2, i + 1, d - i - 1)?.contiguous()?;
            let x_tail = Tensor::cat(&tail, 1)?;
            (b_i - u_tail.matmul(&x_tail)?)?
        };
        tail.insert(0, r_i.broadcast_div(&u_ii)?);
    }
    Tensor::cat(&tail, 1)
}

/// Solve `(L Lᵗ) X = B` given the Cholesky factor `L`.
pub fn cholesky_solve(l_bdd: &Tensor, b_bdk: &Tensor) -> Result<Tensor> {
    let y = solve_lower_triangular(l_bdd, b_bdk)?;
    let lt = l_bdd.t()?.contiguous()?;
    solve_upper_triangular(&lt, &y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use candle_core::{DType, Device};

    fn lower_factor() -> Result<Tensor> {
        // two 3x3 lower-triangular factors
        Tensor::new(
            &[
                [[2.0f64, 0.0, 0.0], [0.5, 1.5, 0.0], [-1.0, 0.3, 0.8]],
                [[1.0, 0.0, 0.0], [0.2, 3.0, 0.0], [0.0, -0.7, 1.1]],
            ],
            &Device::Cpu,
        )
    }

    fn max_abs_diff(a: &Tensor, b: &Tensor) -> Result<f64> {
        (a - b)?.abs()?.flatten_all()?.max(0)?.to_scalar()
    }

    #[test]
    fn test_forward_substitution() -> Result<()> {
        let l = lower_factor()?;
        let b = Tensor::randn(0f64, 1f64, (2, 3, 4), &Device::Cpu)?;
        let x = solve_lower_triangular(&l, &b)?;
        assert_eq!(x.dims(), &[2, 3, 4]);
        assert_abs_diff_eq!(max_abs_diff(&l.matmul(&x)?, &b)?, 0.0, epsilon = 1e-10);
        Ok(())
    }

    #[test]
    fn test_back_substitution() -> Result<()> {
        let u = lower_factor()?.t()?.contiguous()?;
        let b = Tensor::randn(0f64, 1f64, (2, 3, 2), &Device::Cpu)?;
        let x = solve_upper_triangular(&u, &b)?;
        assert_abs_diff_eq!(max_abs_diff(&u.matmul(&x)?, &b)?, 0.0, epsilon = 1e-10);
        Ok(())
    }

    #[test]
    fn test_cholesky_solve_recovers_rhs() -> Result<()> {
        let l = lower_factor()?;
        let sigma = l.matmul(&l.t()?.contiguous()?)?;
        let b = Tensor::randn(0f64, 1f64, (2, 3, 1), &Device::Cpu)?;
        let x = cholesky_solve(&l, &b)?;
        assert_abs_diff_eq!(max_abs_diff(&sigma.matmul(&x)?, &b)?, 0.0, epsilon = 1e-10);
        Ok(())
    }

    #[test]
    fn test_logdet_and_trace() -> Result<()> {
        let l = lower_factor()?;
        let logdet: f64 = cholesky_logdet(&l)?.to_scalar()?;
        let expected = 2.0 * [2.0f64, 1.5, 0.8, 1.0, 3.0, 1.1].iter().map(|x| x.ln()).sum::<f64>();
        assert_abs_diff_eq!(logdet, expected, epsilon = 1e-10);

        let tr: f64 = batch_trace(&l)?.to_scalar()?;
        assert_abs_diff_eq!(tr, 2.0 + 1.5 + 0.8 + 1.0 + 3.0 + 1.1, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_logdet_floors_zero_diagonal() -> Result<()> {
        let l = Tensor::zeros((1, 2, 2), DType::F64, &Device::Cpu)?;
        let logdet: f64 = cholesky_logdet(&l)?.to_scalar()?;
        assert!(logdet.is_finite());
        assert_abs_diff_eq!(logdet, 4.0 * CHOL_DIAG_FLOOR.ln(), epsilon = 1e-9);
        Ok(())
    }
}
