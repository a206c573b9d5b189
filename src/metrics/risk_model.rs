//! # Risk Model
//!
//! $$
//! \mu_i = k\,\bar r_i,\qquad \Sigma = k\,\frac{1}{T-1}\sum_t (r_t-\bar r)(r_t-\bar r)^\top
//! $$
//!
//! Annualized expected returns and covariance derived from the returns table.

use nalgebra::DMatrix;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView2;
use ndarray::Axis;
use ndarray_stats::CorrelationExt;

use crate::error::PortfolioError;
use crate::error::Result;

const PIVOT_TOLERANCE: f64 = 1e-10;

/// Expected-return vector and covariance, both annualized.
#[derive(Clone, Debug)]
pub struct RiskModel {
  pub expected_returns: Array1<f64>,
  pub covariance: Array2<f64>,
}

impl RiskModel {
  /// Wrap user-supplied moments.
  pub fn new(expected_returns: Array1<f64>, covariance: Array2<f64>) -> Result<Self> {
    let n = expected_returns.len();
    if covariance.dim() != (n, n) {
      return Err(PortfolioError::data(format!(
        "covariance is {:?}, expected ({n}, {n})",
        covariance.dim()
      )));
    }
    if expected_returns.iter().chain(covariance.iter()).any(|v| !v.is_finite()) {
      return Err(PortfolioError::data("risk model contains non-finite values"));
    }
    Ok(Self {
      expected_returns,
      covariance,
    })
  }

  /// Sample moments of a T x N returns table scaled by `periods_per_year`.
  pub fn from_returns(returns: ArrayView2<f64>, periods_per_year: f64) -> Result<Self> {
    if returns.nrows() < 2 {
      return Err(PortfolioError::data(
        "at least 2 observations are needed for a covariance",
      ));
    }

    let mean = returns
      .mean_axis(Axis(0))
      .ok_or_else(|| PortfolioError::data("returns table is empty"))?;
    let cov = returns
      .t()
      .cov(1.0)
      .map_err(|e| PortfolioError::data(e.to_string()))?;

    Ok(Self {
      expected_returns: mean * periods_per_year,
      covariance: cov * periods_per_year,
    })
  }

  pub fn n_assets(&self) -> usize {
    self.expected_returns.len()
  }

  /// Replace the historical means with caller views (already annualized).
  pub fn with_expected_returns(mut self, expected_returns: Vec<f64>) -> Result<Self> {
    if expected_returns.len() != self.n_assets() {
      return Err(PortfolioError::config(
        "expectedReturns",
        format!(
          "{} values for {} assets",
          expected_returns.len(),
          self.n_assets()
        ),
      ));
    }
    if expected_returns.iter().any(|v| !v.is_finite()) {
      return Err(PortfolioError::config(
        "expectedReturns",
        "values must be finite",
      ));
    }
    self.expected_returns = Array1::from(expected_returns);
    Ok(self)
  }

  /// Shrink toward a scaled identity: `Σ + δ·mean(diag Σ)·I`.
  ///
  /// The added term is positive definite, so the regularized model never
  /// reports less variance than the original for any weight vector.
  pub fn regularized(&self, intensity: f64) -> Self {
    let n = self.n_assets();
    let avg_var = if n == 0 {
      0.0
    } else {
      self.covariance.diag().iter().map(|v| v.max(0.0)).sum::<f64>() / n as f64
    };
    let ridge = intensity * avg_var.max(f64::EPSILON);

    let mut covariance = self.covariance.clone();
    for i in 0..n {
      covariance[[i, i]] += ridge;
    }

    Self {
      expected_returns: self.expected_returns.clone(),
      covariance,
    }
  }

  /// Lower Cholesky factor `L` with `Σ = L Lᵀ`, or `None` when Σ is not
  /// numerically positive definite.
  pub fn cholesky_factor(&self) -> Option<Array2<f64>> {
    let n = self.n_assets();
    let sym = DMatrix::<f64>::from_fn(n, n, |i, j| {
      0.5 * (self.covariance[[i, j]] + self.covariance[[j, i]])
    });
    let max_diag = (0..n).map(|i| sym[(i, i)]).fold(0.0_f64, f64::max);
    let chol = sym.cholesky()?;
    let l = chol.l();

    // pivots this small mean a (near) rank-deficient covariance
    let pivot_floor = PIVOT_TOLERANCE * max_diag;
    if l.iter().any(|v| !v.is_finite()) || (0..n).any(|i| l[(i, i)].powi(2) <= pivot_floor) {
      return None;
    }
    Some(Array2::from_shape_fn((n, n), |(i, j)| l[(i, j)]))
  }

  /// `wᵀ Σ w`.
  pub fn variance(&self, weights: &Array1<f64>) -> f64 {
    weights.dot(&self.covariance.dot(weights))
  }
}
