//! # Metrics
//!
//! $$
//! \mu_p = \mathbf{w}^\top\mu,\qquad \sigma_p = \sqrt{\mathbf{w}^\top \Sigma \mathbf{w}}
//! $$
//!
//! Realized portfolio metrics computed from the historical returns table.
//! Every function is a pure function of the engine's returns and the weights
//! passed in.

pub mod drawdown;
pub mod risk_model;
pub mod tail;

use std::collections::BTreeMap;

use ndarray::Array1;
use ndarray::ArrayView1;
use serde::Serialize;

pub use drawdown::DrawdownReport;
pub use risk_model::RiskModel;

use crate::error::PortfolioError;
use crate::error::Result;
use crate::universe::AssetUniverse;
use crate::universe::ReturnsMatrix;

/// Default annualization factor for daily data.
pub const TRADING_DAYS: f64 = 252.0;

/// Invested fraction below which a portfolio counts as all cash.
const EMPTY_PORTFOLIO: f64 = 1e-12;

/// Realized metrics of one weight vector.
#[derive(Clone, Debug, Default, Serialize)]
pub struct PortfolioMetrics {
  /// Annualized arithmetic expected return.
  pub expected_return: f64,
  /// `(1 + mean periodic return)^k - 1`.
  pub compounded_return: f64,
  /// Annualized volatility.
  pub volatility: f64,
  /// Per-period historical CVaR at `cvar_confidence`.
  pub cvar: f64,
  pub cvar_confidence: f64,
  pub max_drawdown: f64,
  #[serde(skip)]
  pub drawdown: DrawdownReport,
  /// Carbon intensity of the holdings, averaged by weight; cash is excluded.
  pub carbon_intensity: f64,
  /// Sum of absolute changes against the reference, when one is given.
  pub turnover: Option<f64>,
  pub sector_exposure: BTreeMap<String, f64>,
}

/// Computes return and risk metrics over a fixed returns table.
#[derive(Clone, Debug)]
pub struct MetricsEngine {
  returns: ReturnsMatrix,
  periods_per_year: f64,
  risk_model: RiskModel,
}

impl MetricsEngine {
  /// Take ownership of the returns table and derive the risk model once.
  pub fn new(returns: ReturnsMatrix, periods_per_year: f64) -> Result<Self> {
    if !periods_per_year.is_finite() || periods_per_year <= 0.0 {
      return Err(PortfolioError::param(
        "periods_per_year",
        format!("must be finite and positive, got {periods_per_year}"),
      ));
    }
    let risk_model = RiskModel::from_returns(returns.values(), periods_per_year)?;

    Ok(Self {
      returns,
      periods_per_year,
      risk_model,
    })
  }

  pub fn returns(&self) -> &ReturnsMatrix {
    &self.returns
  }

  pub fn periods_per_year(&self) -> f64 {
    self.periods_per_year
  }

  /// Historical moments, annualized.
  pub fn risk_model(&self) -> &RiskModel {
    &self.risk_model
  }

  pub fn n_assets(&self) -> usize {
    self.returns.n_assets()
  }

  fn check_weights(&self, weights: &Array1<f64>) -> Result<()> {
    if weights.len() != self.n_assets() {
      return Err(PortfolioError::param(
        "weights",
        format!("{} weights for {} assets", weights.len(), self.n_assets()),
      ));
    }
    if weights.iter().any(|w| !w.is_finite()) {
      return Err(PortfolioError::param("weights", "weights must be finite"));
    }
    Ok(())
  }

  /// Annualized expected return: `Σ wᵢ r̄ᵢ k`.
  pub fn expected_return(&self, weights: &Array1<f64>) -> Result<f64> {
    self.check_weights(weights)?;
    Ok(weights.dot(&self.risk_model.expected_returns))
  }

  /// Annualized volatility: `sqrt(wᵀ Σ w)`.
  pub fn volatility(&self, weights: &Array1<f64>) -> Result<f64> {
    self.check_weights(weights)?;
    Ok(self.risk_model.variance(weights).max(0.0).sqrt())
  }

  /// Realized periodic returns of the static portfolio.
  pub fn portfolio_returns(&self, weights: &Array1<f64>) -> Result<Array1<f64>> {
    self.check_weights(weights)?;
    Ok(self.returns.values().dot(weights))
  }

  /// Historical CVaR at confidence `alpha`, per period.
  pub fn cvar(&self, weights: &Array1<f64>, alpha: f64) -> Result<f64> {
    tail::check_confidence(alpha)?;
    let port = self.portfolio_returns(weights)?;
    tail::historical_cvar(&port.to_vec(), alpha)
  }

  /// Maximum drawdown of the buy-and-hold path.
  pub fn max_drawdown(&self, weights: &Array1<f64>) -> Result<f64> {
    Ok(self.drawdown(weights)?.max_drawdown)
  }

  /// Drawdown with peak and trough dates.
  pub fn drawdown(&self, weights: &Array1<f64>) -> Result<DrawdownReport> {
    self.check_weights(weights)?;
    Ok(drawdown::drawdown_report(
      self.returns.values(),
      self.returns.dates(),
      weights,
    ))
  }

  /// Geometric annualization of the mean periodic portfolio return.
  pub fn compounded_return(&self, weights: &Array1<f64>) -> Result<f64> {
    let port = self.portfolio_returns(weights)?;
    let mean = port.mean().unwrap_or(0.0);
    Ok((1.0 + mean).powf(self.periods_per_year) - 1.0)
  }

  /// Evaluate every metric for `weights` in one pass.
  pub fn evaluate(
    &self,
    weights: &Array1<f64>,
    universe: &AssetUniverse,
    reference: Option<&Array1<f64>>,
    alpha: f64,
  ) -> Result<PortfolioMetrics> {
    self.check_weights(weights)?;
    if universe.len() != self.n_assets() {
      return Err(PortfolioError::data(format!(
        "universe has {} assets, returns table has {}",
        universe.len(),
        self.n_assets()
      )));
    }
    let drawdown = self.drawdown(weights)?;

    Ok(PortfolioMetrics {
      expected_return: self.expected_return(weights)?,
      compounded_return: self.compounded_return(weights)?,
      volatility: self.volatility(weights)?,
      cvar: self.cvar(weights, alpha)?,
      cvar_confidence: alpha,
      max_drawdown: drawdown.max_drawdown,
      drawdown,
      carbon_intensity: carbon_intensity(weights, universe.carbon_intensities()),
      turnover: reference.map(|r| turnover(weights, r)),
      sector_exposure: sector_exposure(weights, universe),
    })
  }
}

/// `Σ cᵢ wᵢ / Σ wᵢ`; equal to `Σ cᵢ wᵢ` when fully invested and zero for an
/// all-cash portfolio.
pub fn carbon_intensity(weights: &Array1<f64>, carbon: ArrayView1<f64>) -> f64 {
  let invested = weights.sum();
  if invested.abs() <= EMPTY_PORTFOLIO {
    return 0.0;
  }
  weights.dot(&carbon) / invested
}

/// `Σ |wᵢ - refᵢ|`.
pub fn turnover(weights: &Array1<f64>, reference: &Array1<f64>) -> f64 {
  weights
    .iter()
    .zip(reference.iter())
    .map(|(w, r)| (w - r).abs())
    .sum()
}

/// Total weight per sector label; untagged assets are left out.
pub fn sector_exposure(weights: &Array1<f64>, universe: &AssetUniverse) -> BTreeMap<String, f64> {
  let mut out = BTreeMap::new();
  for (asset, w) in universe.assets().iter().zip(weights.iter()) {
    if let Some(sector) = &asset.sector {
      *out.entry(sector.clone()).or_insert(0.0) += w;
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::universe::Asset;
  use approx::assert_abs_diff_eq;
  use chrono::NaiveDate;
  use ndarray::array;
  use ndarray::Array2;

  fn engine(values: Array2<f64>) -> MetricsEngine {
    let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
    let dates = (0..values.nrows())
      .map(|i| start + chrono::Days::new(i as u64))
      .collect();
    let tickers = (0..values.ncols()).map(|i| format!("A{i}")).collect();
    MetricsEngine::new(ReturnsMatrix::new(dates, tickers, values).unwrap(), 252.0).unwrap()
  }

  #[test]
  fn expected_return_and_volatility_are_annualized() {
    let eng = engine(array![[0.01, 0.0], [0.03, 0.002], [0.02, -0.002]]);
    let w = array![1.0, 0.0];

    assert_abs_diff_eq!(eng.expected_return(&w).unwrap(), 0.02 * 252.0, epsilon = 1e-12);
    assert_abs_diff_eq!(
      eng.volatility(&w).unwrap(),
      0.01 * 252.0_f64.sqrt(),
      epsilon = 1e-12
    );
  }

  #[test]
  fn cvar_matches_worst_five_of_hundred() {
    let values = Array2::from_shape_fn((100, 1), |(t, _)| ((t * 37) % 100) as f64 / 1000.0 - 0.05);
    let eng = engine(values.clone());
    let w = array![1.0];

    let mut sorted: Vec<f64> = values.column(0).to_vec();
    sorted.sort_by(f64::total_cmp);
    let expected = -sorted[..5].iter().sum::<f64>() / 5.0;

    assert_abs_diff_eq!(eng.cvar(&w, 0.95).unwrap(), expected, epsilon = 1e-12);
  }

  #[test]
  fn bad_inputs_are_parameter_errors() {
    let eng = engine(array![[0.01, 0.0], [0.03, 0.002]]);

    let err = eng.expected_return(&array![1.0]).unwrap_err();
    assert!(matches!(err, PortfolioError::Parameter { .. }));

    let err = eng.cvar(&array![0.5, 0.5], 1.0).unwrap_err();
    assert!(matches!(err, PortfolioError::Parameter { .. }));

    let returns = eng.returns().clone();
    assert!(MetricsEngine::new(returns, 0.0).is_err());
  }

  #[test]
  fn evaluate_bundles_carbon_turnover_and_sectors() {
    let eng = engine(array![[0.01, 0.0], [-0.01, 0.002], [0.02, 0.001]]);
    let universe = AssetUniverse::new(vec![
      Asset {
        ticker: "A0".into(),
        sector: Some("Energy".into()),
        carbon_intensity: 200.0,
      },
      Asset {
        ticker: "A1".into(),
        sector: Some("Tech".into()),
        carbon_intensity: 20.0,
      },
    ])
    .unwrap();
    let w = array![0.25, 0.75];
    let reference = array![0.5, 0.5];

    let m = eng.evaluate(&w, &universe, Some(&reference), 0.95).unwrap();

    assert_abs_diff_eq!(m.carbon_intensity, 65.0, epsilon = 1e-12);
    assert_abs_diff_eq!(m.turnover.unwrap(), 0.5, epsilon = 1e-12);
    assert_abs_diff_eq!(m.sector_exposure["Tech"], 0.75, epsilon = 1e-12);
    assert!(m.max_drawdown >= 0.0);
    assert_eq!(m.cvar_confidence, 0.95);
  }

  #[test]
  fn carbon_intensity_averages_over_holdings() {
    let carbon = array![50.0, 10.0];
    assert_abs_diff_eq!(
      carbon_intensity(&array![0.25, 0.75], carbon.view()),
      20.0,
      epsilon = 1e-12
    );
    // half in cash: same mix, same intensity
    assert_abs_diff_eq!(
      carbon_intensity(&array![0.125, 0.375], carbon.view()),
      20.0,
      epsilon = 1e-12
    );
    assert_eq!(carbon_intensity(&array![0.0, 0.0], carbon.view()), 0.0);
  }

  #[test]
  fn metrics_do_not_mutate_inputs() {
    let values = array![[0.01, 0.0], [-0.01, 0.002], [0.02, 0.001]];
    let eng = engine(values.clone());
    let w = array![0.4, 0.6];
    let _ = eng.max_drawdown(&w).unwrap();
    let _ = eng.cvar(&w, 0.9).unwrap();

    assert_eq!(eng.returns().values(), values.view());
    assert_eq!(w, array![0.4, 0.6]);
  }
}
