use candle_core::{DType, Device, Tensor};

use super::linalg::cholesky_logdet;
use crate::error::{BnnError, Result};
use crate::random::{randn_tensor, SeedSource};

/// Lower bound of the positivity transform.
pub const VAR_FLOOR: f64 = 1e-15;

/// Positivity transform for variance parameters: max(|x|, ε)
pub fn positive(raw: &Tensor) -> candle_core::Result<Tensor> {
    raw.abs()?.maximum(VAR_FLOOR)
}

/// Independent (diagonal) Gaussian over a weight matrix or bias vector
///
/// q(W) = Π N(w_ij; μ_ij, σ²_ij)
///
/// The variance may be a single shared scalar (as in learned priors) or
/// carry the full shape of the mean. It is stored unconstrained and
/// passed through [`positive`] whenever it is read, so optimizer updates
/// to the underlying variable are always reflected.
#[derive(Clone, Debug)]
pub struct IndependentGaussian {
    /// mean: (rows, cols) or (cols,)
    mean: Tensor,
    /// unconstrained variance, broadcastable to `mean`
    raw_var: Tensor,
}

impl IndependentGaussian {
    /// * `mean` - mean tensor, shape (rows, cols) or (cols,)
    /// * `raw_var` - variance before the positivity transform, broadcastable to `mean`
    pub fn new(mean: Tensor, raw_var: Tensor) -> Result<Self> {
        if raw_var.broadcast_as(mean.shape()).is_err() {
            return Err(BnnError::ShapeMismatch {
                what: "variance",
                expected: mean.dims().to_vec(),
                actual: raw_var.dims().to_vec(),
            });
        }
        Ok(Self { mean, raw_var })
    }

    pub fn mean(&self) -> &Tensor {
        &self.mean
    }

    /// Positive variance as stored (possibly a shared scalar).
    pub fn var(&self) -> Result<Tensor> {
        Ok(positive(&self.raw_var)?)
    }

    /// Variance broadcast to the shape of the mean.
    pub fn variance(&self) -> Result<Tensor> {
        Ok(self.var()?.broadcast_as(self.mean.shape())?.contiguous()?)
    }

    pub fn std(&self) -> Result<Tensor> {
        Ok(self.var()?.sqrt()?)
    }

    pub fn shape(&self) -> &[usize] {
        self.mean.dims()
    }

    pub fn dtype(&self) -> DType {
        self.mean.dtype()
    }

    pub fn device(&self) -> &Device {
        self.mean.device()
    }

    /// Reparameterized draw x = μ + σ ε, ε ~ N(0, I); consumes one seed.
    pub fn sample(&self, seeds: &mut dyn SeedSource) -> Result<Tensor> {
        let eps = randn_tensor(
            self.mean.shape(),
            1.0,
            seeds.next_seed(),
            self.dtype(),
            self.device(),
        )?;
        Ok(self.mean.add(&eps.broadcast_mul(&self.std()?)?)?)
    }
}

/// Storage of per-column Cholesky factors.
#[derive(Clone, Debug)]
enum CholeskyFactor {
    /// explicit factors, (cols, rows, rows)
    Dense(Tensor),
    /// packed lower triangles (n_tril, cols) scattered by a constant
    /// selection matrix (rows * rows, n_tril)
    Packed {
        packed_kj: Tensor,
        select_dk: Tensor,
        rows: usize,
        cols: usize,
    },
}

impl CholeskyFactor {
    fn tensor(&self) -> candle_core::Result<Tensor> {
        match self {
            Self::Dense(l) => Ok(l.clone()),
            Self::Packed {
                packed_kj,
                select_dk,
                rows,
                cols,
            } => select_dk
                .matmul(packed_kj)?
                .t()?
                .contiguous()?
                .reshape((*cols, *rows, *rows)),
        }
    }
}

/// (rows, cols) of a full-covariance mean, which must be a matrix
fn matrix_dims(mean: &Tensor) -> Result<(usize, usize)> {
    match *mean.dims() {
        [rows, cols] => Ok((rows, cols)),
        _ => Err(BnnError::ShapeMismatch {
            what: "full-covariance mean rank",
            expected: vec![2],
            actual: vec![mean.rank()],
        }),
    }
}

/// Gaussian with a full covariance over the rows of each output column
///
/// w_{:,j} ~ N(μ_{:,j}, L_j L_jᵗ) for each column j, with independent
/// columns. The factors stack one lower-triangular matrix per column.
#[derive(Clone, Debug)]
pub struct FullCovarianceGaussian {
    /// mean: (rows, cols)
    mean: Tensor,
    factor: CholeskyFactor,
}

impl FullCovarianceGaussian {
    /// * `mean` - mean tensor, shape (rows, cols)
    /// * `cholesky` - lower-triangular factors, shape (cols, rows, rows)
    pub fn new(mean: Tensor, cholesky: Tensor) -> Result<Self> {
        let (rows, cols) = matrix_dims(&mean)?;
        if cholesky.dims() != &[cols, rows, rows] {
            return Err(BnnError::ShapeMismatch {
                what: "cholesky factor",
                expected: vec![cols, rows, rows],
                actual: cholesky.dims().to_vec(),
            });
        }
        Ok(Self {
            mean,
            factor: CholeskyFactor::Dense(cholesky),
        })
    }

    /// Build from packed lower-triangular entries.
    ///
    /// * `mean` - mean tensor, shape (rows, cols)
    /// * `packed_kj` - lower-triangular entries, shape (rows (rows + 1) / 2, cols)
    /// * `select_dk` - 0/1 scatter matrix, shape (rows * rows, rows (rows + 1) / 2)
    pub fn from_packed(mean: Tensor, packed_kj: Tensor, select_dk: Tensor) -> Result<Self> {
        let (rows, cols) = matrix_dims(&mean)?;
        let n_tril = rows * (rows + 1) / 2;
        if packed_kj.dims() != &[n_tril, cols] {
            return Err(BnnError::ShapeMismatch {
                what: "packed cholesky factor",
                expected: vec![n_tril, cols],
                actual: packed_kj.dims().to_vec(),
            });
        }
        if select_dk.dims() != &[rows * rows, n_tril] {
            return Err(BnnError::ShapeMismatch {
                what: "cholesky selection matrix",
                expected: vec![rows * rows, n_tril],
                actual: select_dk.dims().to_vec(),
            });
        }
        Ok(Self {
            mean,
            factor: CholeskyFactor::Packed {
                packed_kj,
                select_dk,
                rows,
                cols,
            },
        })
    }

    pub fn mean(&self) -> &Tensor {
        &self.mean
    }

    /// Lower-triangular factors: (cols, rows, rows)
    pub fn cholesky(&self) -> Result<Tensor> {
        Ok(self.factor.tensor()?)
    }

    /// Per-column covariance matrices L Lᵗ: (cols, rows, rows)
    pub fn covariance(&self) -> Result<Tensor> {
        let l = self.cholesky()?;
        let lt = l.t()?.contiguous()?;
        Ok(l.matmul(&lt)?)
    }

    /// Sum over columns of log|L_j L_jᵗ|
    pub fn logdet(&self) -> Result<Tensor> {
        Ok(cholesky_logdet(&self.cholesky()?)?)
    }

    pub fn shape(&self) -> &[usize] {
        self.mean.dims()
    }

    pub fn dtype(&self) -> DType {
        self.mean.dtype()
    }

    pub fn device(&self) -> &Device {
        self.mean.device()
    }

    /// Reparameterized draw x = μ + L ε, applied column by column;
    /// consumes one seed.
    pub fn sample(&self, seeds: &mut dyn SeedSource) -> Result<Tensor> {
        let mean_t = transform_w(&self.mean)?;
        let eps = randn_tensor(
            mean_t.shape(),
            1.0,
            seeds.next_seed(),
            self.dtype(),
            self.device(),
        )?;
        let x_t = (mean_t + self.cholesky()?.matmul(&eps)?)?;
        Ok(itransform_w(&x_t)?)
    }
}

/// Transform a weight matrix, (rows, cols) -> (cols, rows, 1)
pub fn transform_w(w: &Tensor) -> candle_core::Result<Tensor> {
    w.t()?.contiguous()?.unsqueeze(2)
}

/// Undo [`transform_w`], (cols, rows, 1) -> (rows, cols)
pub fn itransform_w(wt: &Tensor) -> candle_core::Result<Tensor> {
    wt.squeeze(2)?.t()?.contiguous()
}

/// Prior or posterior over a layer's weights.
#[derive(Clone, Debug)]
pub enum WeightDistribution {
    Independent(IndependentGaussian),
    FullCovariance(FullCovarianceGaussian),
}

impl WeightDistribution {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Independent(_) => "IndependentGaussian",
            Self::FullCovariance(_) => "FullCovarianceGaussian",
        }
    }

    pub fn mean(&self) -> &Tensor {
        match self {
            Self::Independent(d) => d.mean(),
            Self::FullCovariance(d) => d.mean(),
        }
    }

    /// Shape of the modelled weights: (rows, cols) or (cols,)
    pub fn shape(&self) -> &[usize] {
        self.mean().dims()
    }

    pub fn sample(&self, seeds: &mut dyn SeedSource) -> Result<Tensor> {
        match self {
            Self::Independent(d) => d.sample(seeds),
            Self::FullCovariance(d) => d.sample(seeds),
        }
    }

    /// Stack `n_samples` independent draws along a new leading axis.
    pub fn sample_n(&self, n_samples: usize, seeds: &mut dyn SeedSource) -> Result<Tensor> {
        if n_samples == 0 {
            return Err(BnnError::InvalidConfiguration(
                "need at least one sample".into(),
            ));
        }
        let draws = (0..n_samples)
            .map(|_| self.sample(seeds))
            .collect::<Result<Vec<_>>>()?;
        Ok(Tensor::stack(&draws, 0)?)
    }

    /// Fail with `ShapeMismatch` unless the mean has shape `expected`.
    pub fn check_shape(&self, what: &'static str, expected: &[usize]) -> Result<()> {
        if self.shape() != expected {
            return Err(BnnError::ShapeMismatch {
                what,
                expected: expected.to_vec(),
                actual: self.shape().to_vec(),
            });
        }
        Ok(())
    }
}

impl From<IndependentGaussian> for WeightDistribution {
    fn from(d: IndependentGaussian) -> Self {
        Self::Independent(d)
    }
}

impl From<FullCovarianceGaussian> for WeightDistribution {
    fn from(d: FullCovarianceGaussian) -> Self {
        Self::FullCovariance(d)
    }
}
