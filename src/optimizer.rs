//! # Optimizer
//!
//! $$
//! \max_{\mathbf w}\ \mu^\top \mathbf w \quad\text{s.t.}\quad
//! \mathbf w^\top\Sigma\mathbf w \le \bar\sigma^2,\
//! z + \frac{1}{(1-\alpha)T}\sum_t u_t \le \overline{\mathrm{CVaR}},\
//! u_t \ge -r_t^\top\mathbf w - z,\ u_t \ge 0,\ \dots
//! $$
//!
//! Return maximization under the full constraint set, solved as a linear /
//! second-order cone program with Clarabel. Solver failures are reported as
//! a status, never as an error.

pub mod program;

use std::fmt;
use std::time::Instant;

use ndarray::Array1;
use ndarray::ArrayView2;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use self::program::ConicProgram;
use crate::constraints::ConstraintBuilder;
use crate::constraints::ConstraintConfig;
use crate::constraints::Constraints;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::metrics::MetricsEngine;
use crate::metrics::PortfolioMetrics;
use crate::metrics::RiskModel;
use crate::universe::AssetUniverse;

/// Tolerance on sums, bounds and caps when checking a solution.
pub const FEASIBILITY_TOLERANCE: f64 = 1e-6;

/// Turnover caps at or below this pin the portfolio to the reference.
const PINNED_TURNOVER: f64 = 1e-12;

/// Outcome of one optimization call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OptimizationStatus {
  Optimal,
  Infeasible,
  NumericalError,
}

impl fmt::Display for OptimizationStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      OptimizationStatus::Optimal => write!(f, "OPTIMAL"),
      OptimizationStatus::Infeasible => write!(f, "INFEASIBLE"),
      OptimizationStatus::NumericalError => write!(f, "NUMERICAL_ERROR"),
    }
  }
}

/// Interior-point solver settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SolverSettings {
  pub max_iterations: u32,
  /// Wall-clock limit per solve in seconds.
  pub time_limit_secs: Option<f64>,
  /// Feasibility and gap tolerance handed to the solver.
  pub tolerance: f64,
  /// Ridge intensity used by the retry after a numerical failure.
  pub regularization: f64,
}

impl Default for SolverSettings {
  fn default() -> Self {
    Self {
      max_iterations: 200,
      time_limit_secs: None,
      tolerance: 1e-8,
      regularization: 1e-3,
    }
  }
}

/// Raw solver answer before metric verification.
#[derive(Clone, Debug)]
pub struct SolverOutcome {
  pub status: OptimizationStatus,
  pub weights: Option<Array1<f64>>,
  pub iterations: u32,
  pub solve_time: f64,
}

impl SolverOutcome {
  fn failed(status: OptimizationStatus) -> Self {
    Self {
      status,
      weights: None,
      iterations: 0,
      solve_time: 0.0,
    }
  }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct SolverDiagnostics {
  pub iterations: u32,
  pub solve_time: f64,
  /// Whether the answer comes from the retry on a regularized covariance.
  pub regularized: bool,
  /// Constraint violations found when re-checking the solver's weights.
  pub violations: Vec<String>,
}

/// Weights, status and independently recomputed metrics.
#[derive(Clone, Debug, Serialize)]
pub struct OptimizationResult {
  pub tickers: Vec<String>,
  pub status: OptimizationStatus,
  pub weights: Option<Vec<f64>>,
  pub metrics: Option<PortfolioMetrics>,
  pub diagnostics: SolverDiagnostics,
}

impl OptimizationResult {
  pub fn is_optimal(&self) -> bool {
    self.status == OptimizationStatus::Optimal
  }

  pub fn weight_of(&self, ticker: &str) -> Option<f64> {
    let idx = self.tickers.iter().position(|t| t == ticker)?;
    self.weights.as_ref().map(|w| w[idx])
  }
}

/// Solves the constrained return-maximization problem.
#[derive(Clone, Debug, Default)]
pub struct Optimizer {
  settings: SolverSettings,
}

impl Optimizer {
  pub fn new(settings: SolverSettings) -> Self {
    Self { settings }
  }

  pub fn settings(&self) -> &SolverSettings {
    &self.settings
  }

  /// Solve the conic program for `risk` and `constraints`. `scenarios` holds
  /// the historical returns used by the CVaR block.
  pub fn solve(
    &self,
    risk: &RiskModel,
    scenarios: ArrayView2<f64>,
    constraints: &Constraints,
  ) -> SolverOutcome {
    let factor = match constraints.volatility {
      Some(_) => match risk.cholesky_factor() {
        Some(l) => Some(l),
        None => {
          debug!("covariance is not positive definite");
          return SolverOutcome::failed(OptimizationStatus::NumericalError);
        }
      },
      None => None,
    };

    let program = ConicProgram::build(risk, scenarios, constraints, factor.as_ref());
    self.solve_program(&program)
  }

  fn solve_program(&self, program: &ConicProgram) -> SolverOutcome {
    use clarabel::algebra::*;
    use clarabel::solver::*;

    let n_vars = program.layout.n_vars;
    let (colptr, rowval, nzval, b) = program.to_csc();
    let a = CscMatrix::new(program.n_rows(), n_vars, colptr, rowval, nzval);
    let p = CscMatrix::new(n_vars, n_vars, vec![0; n_vars + 1], Vec::new(), Vec::new());

    let mut cones = Vec::with_capacity(3);
    if !program.zero.is_empty() {
      cones.push(ZeroConeT(program.zero.len()));
    }
    if !program.nonneg.is_empty() {
      cones.push(NonnegativeConeT(program.nonneg.len()));
    }
    if !program.soc.is_empty() {
      cones.push(SecondOrderConeT(program.soc.len()));
    }

    let settings = match DefaultSettingsBuilder::default()
      .verbose(false)
      .max_iter(self.settings.max_iterations)
      .time_limit(self.settings.time_limit_secs.unwrap_or(f64::INFINITY))
      .tol_feas(self.settings.tolerance)
      .tol_gap_abs(self.settings.tolerance)
      .tol_gap_rel(self.settings.tolerance)
      .build()
    {
      Ok(s) => s,
      Err(e) => {
        warn!(error = %e, "invalid solver settings");
        return SolverOutcome::failed(OptimizationStatus::NumericalError);
      }
    };

    let mut solver = match DefaultSolver::new(&p, &program.q, &a, &b, &cones, settings) {
      Ok(s) => s,
      Err(e) => {
        warn!(error = ?e, "solver rejected the problem data");
        return SolverOutcome::failed(OptimizationStatus::NumericalError);
      }
    };

    let started = Instant::now();
    solver.solve();
    let solve_time = started.elapsed().as_secs_f64();

    let status = match solver.solution.status {
      SolverStatus::Solved | SolverStatus::AlmostSolved => OptimizationStatus::Optimal,
      SolverStatus::PrimalInfeasible | SolverStatus::AlmostPrimalInfeasible => {
        OptimizationStatus::Infeasible
      }
      other => {
        debug!(status = ?other, "solver did not converge");
        OptimizationStatus::NumericalError
      }
    };

    let weights = (status == OptimizationStatus::Optimal)
      .then(|| Array1::from(solver.solution.x[..program.layout.n_assets].to_vec()));

    SolverOutcome {
      status,
      weights,
      iterations: solver.solution.iterations,
      solve_time,
    }
  }

  /// Build the constraint set from `config` and optimize against the
  /// engine's historical risk model.
  pub fn run(
    &self,
    engine: &MetricsEngine,
    universe: &AssetUniverse,
    config: &ConstraintConfig,
  ) -> Result<OptimizationResult> {
    let constraints = ConstraintBuilder::new(universe).build(config)?;
    self.optimize(engine, engine.risk_model(), universe, &constraints)
  }

  /// Solve, retry once on a regularized covariance after a numerical
  /// failure, and recompute realized metrics on the answer.
  pub fn optimize(
    &self,
    engine: &MetricsEngine,
    risk: &RiskModel,
    universe: &AssetUniverse,
    constraints: &Constraints,
  ) -> Result<OptimizationResult> {
    let n = engine.n_assets();
    if risk.n_assets() != n || universe.len() != n || constraints.n_assets() != n {
      return Err(PortfolioError::data(format!(
        "dimension mismatch: returns {n}, risk model {}, universe {}, constraints {}",
        risk.n_assets(),
        universe.len(),
        constraints.n_assets()
      )));
    }

    if let Some(turnover) = &constraints.turnover {
      if turnover.cap <= PINNED_TURNOVER {
        return self.pinned(engine, universe, constraints, turnover.reference.clone());
      }
    }

    let mut diagnostics = SolverDiagnostics::default();
    let mut attempt = self.attempt(engine, risk, universe, constraints, &mut diagnostics)?;

    if attempt.0 == OptimizationStatus::NumericalError {
      warn!("numerical failure; retrying with a regularized covariance");
      let regularized = risk.regularized(self.settings.regularization);
      diagnostics.regularized = true;
      attempt = self.attempt(engine, &regularized, universe, constraints, &mut diagnostics)?;
    }

    let (status, weights, metrics) = attempt;
    debug!(%status, iterations = diagnostics.iterations, "optimization finished");

    Ok(OptimizationResult {
      tickers: universe.tickers(),
      status,
      weights: weights.map(|w| w.to_vec()),
      metrics,
      diagnostics,
    })
  }

  #[allow(clippy::type_complexity)]
  fn attempt(
    &self,
    engine: &MetricsEngine,
    risk: &RiskModel,
    universe: &AssetUniverse,
    constraints: &Constraints,
    diagnostics: &mut SolverDiagnostics,
  ) -> Result<(OptimizationStatus, Option<Array1<f64>>, Option<PortfolioMetrics>)> {
    let outcome = self.solve(risk, engine.returns().values(), constraints);
    diagnostics.iterations += outcome.iterations;
    diagnostics.solve_time += outcome.solve_time;

    let Some(raw) = outcome.weights else {
      return Ok((outcome.status, None, None));
    };

    let weights = clip_to_bounds(raw, constraints);
    let metrics = engine.evaluate(
      &weights,
      universe,
      constraints.reference(),
      constraints.cvar_confidence,
    )?;

    let violations = violations(&weights, &metrics, constraints);
    if !violations.is_empty() {
      warn!(?violations, "solver answer violates the declared constraints");
      diagnostics.violations = violations;
      return Ok((OptimizationStatus::NumericalError, None, None));
    }
    diagnostics.violations.clear();

    Ok((OptimizationStatus::Optimal, Some(weights), Some(metrics)))
  }

  /// A zero turnover cap admits only the reference portfolio.
  fn pinned(
    &self,
    engine: &MetricsEngine,
    universe: &AssetUniverse,
    constraints: &Constraints,
    reference: Array1<f64>,
  ) -> Result<OptimizationResult> {
    let metrics = engine.evaluate(
      &reference,
      universe,
      Some(&reference),
      constraints.cvar_confidence,
    )?;
    let violations = violations(&reference, &metrics, constraints);

    let (status, weights, metrics) = if violations.is_empty() {
      (OptimizationStatus::Optimal, Some(reference.to_vec()), Some(metrics))
    } else {
      debug!(?violations, "reference portfolio violates the other constraints");
      (OptimizationStatus::Infeasible, None, None)
    };

    Ok(OptimizationResult {
      tickers: universe.tickers(),
      status,
      weights,
      metrics,
      diagnostics: SolverDiagnostics {
        violations,
        ..Default::default()
      },
    })
  }
}

fn clip_to_bounds(mut weights: Array1<f64>, constraints: &Constraints) -> Array1<f64> {
  for ((w, lo), hi) in weights
    .iter_mut()
    .zip(constraints.lower.iter())
    .zip(constraints.upper.iter())
  {
    *w = w.clamp(*lo, *hi);
  }
  weights
}

fn exceeds(value: f64, cap: f64) -> bool {
  value > cap + FEASIBILITY_TOLERANCE * cap.abs().max(1.0)
}

/// Every declared constraint that `weights` breaks, in readable form.
pub fn violations(
  weights: &Array1<f64>,
  metrics: &PortfolioMetrics,
  constraints: &Constraints,
) -> Vec<String> {
  let mut out = Vec::new();

  let sum = weights.sum();
  if !constraints.budget.holds(sum, FEASIBILITY_TOLERANCE) {
    out.push(format!("weights sum to {sum}, budget {:?}", constraints.budget));
  }

  for (i, w) in weights.iter().enumerate() {
    let (lo, hi) = (constraints.lower[i], constraints.upper[i]);
    if *w < lo - FEASIBILITY_TOLERANCE || *w > hi + FEASIBILITY_TOLERANCE {
      out.push(format!("weight {i} = {w} outside [{lo}, {hi}]"));
    }
  }

  if let Some(cap) = constraints.volatility {
    if exceeds(metrics.volatility, cap) {
      out.push(format!("volatility {} above {cap}", metrics.volatility));
    }
  }

  if let Some(cvar) = &constraints.cvar {
    if exceeds(metrics.cvar, cvar.cap) {
      out.push(format!("cvar {} above {}", metrics.cvar, cvar.cap));
    }
  }

  if let Some(carbon) = &constraints.carbon {
    if exceeds(metrics.carbon_intensity, carbon.cap) {
      out.push(format!(
        "carbon intensity {} above {}",
        metrics.carbon_intensity, carbon.cap
      ));
    }
  }

  if let Some(turnover) = &constraints.turnover {
    let realized = crate::metrics::turnover(weights, &turnover.reference);
    if exceeds(realized, turnover.cap) {
      out.push(format!("turnover {realized} above {}", turnover.cap));
    }
  }

  for sector in &constraints.sectors {
    let exposure: f64 = sector.members.iter().map(|&i| weights[i]).sum();
    if exceeds(exposure, sector.cap) {
      out.push(format!(
        "sector {} exposure {exposure} above {}",
        sector.sector, sector.cap
      ));
    }
  }

  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::constraints::Budget;
  use crate::universe::Asset;
  use crate::universe::ReturnsMatrix;
  use approx::assert_abs_diff_eq;
  use chrono::NaiveDate;
  use ndarray::array;
  use ndarray::Array2;
  use std::collections::BTreeMap;
  use tracing_test::traced_test;

  const K: f64 = 252.0;

  fn dates(t: usize) -> Vec<NaiveDate> {
    let start = NaiveDate::from_ymd_opt(2022, 1, 3).unwrap();
    (0..t).map(|i| start + chrono::Days::new(i as u64)).collect()
  }

  /// Two-row table whose column means are exactly `annual / K`.
  fn engine_with_means(annual: &[f64], spread: &[f64]) -> MetricsEngine {
    let n = annual.len();
    let values = Array2::from_shape_fn((2, n), |(t, i)| {
      let sign = if t == 0 { 1.0 } else { -1.0 };
      annual[i] / K + sign * spread[i]
    });
    let tickers = (0..n).map(|i| format!("A{i}")).collect();
    MetricsEngine::new(ReturnsMatrix::new(dates(2), tickers, values).unwrap(), K).unwrap()
  }

  fn universe(carbon: &[f64]) -> AssetUniverse {
    AssetUniverse::new(
      carbon
        .iter()
        .enumerate()
        .map(|(i, &c)| Asset {
          ticker: format!("A{i}"),
          sector: Some(if i == 0 { "Energy" } else { "Other" }.to_string()),
          carbon_intensity: c,
        })
        .collect(),
    )
    .unwrap()
  }

  /// Deterministic table whose column means are exactly `means`: rows come
  /// in mirrored pairs around the mean. `t` must be even.
  fn noisy_engine(t: usize) -> MetricsEngine {
    let means = [0.0008, 0.0005, 0.0002, 0.0003];
    let values = Array2::from_shape_fn((t, 4), |(s, i)| {
      let pair = s / 2;
      let phase = ((pair * (7 + 3 * i) + 11 * i) % 23) as f64 / 23.0 - 0.5;
      let sign = if s % 2 == 0 { 1.0 } else { -1.0 };
      means[i] + sign * 0.02 * phase * (1.0 + i as f64 * 0.3)
    });
    let tickers = (0..4).map(|i| format!("A{i}")).collect();
    MetricsEngine::new(ReturnsMatrix::new(dates(t), tickers, values).unwrap(), K).unwrap()
  }

  fn assert_feasible(result: &OptimizationResult, config: &ConstraintConfig) {
    let w = result.weights.as_ref().expect("optimal result carries weights");
    let sum: f64 = w.iter().sum();
    assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-6);
    for (ticker, &x) in result.tickers.iter().zip(w) {
      let (lo, hi) = config.asset_bounds.get(ticker).copied().unwrap_or((0.0, 1.0));
      assert!(x >= lo - 1e-6 && x <= hi + 1e-6, "{ticker} = {x}");
    }
  }

  #[test]
  fn unconstrained_optimum_concentrates_in_best_asset() {
    let engine = engine_with_means(&[0.05, 0.09, 0.02], &[0.01, 0.02, 0.005]);
    let u = universe(&[1.0, 1.0, 1.0]);
    let config = ConstraintConfig::default();

    let result = Optimizer::default().run(&engine, &u, &config).unwrap();

    assert!(result.is_optimal());
    assert_feasible(&result, &config);
    assert_abs_diff_eq!(result.weight_of("A1").unwrap(), 1.0, epsilon = 1e-6);
  }

  #[test]
  fn carbon_cap_binds_at_the_boundary() {
    let engine = engine_with_means(&[0.08, 0.05, 0.03], &[0.01, 0.01, 0.01]);
    let u = universe(&[50.0, 10.0, 5.0]);
    let config = ConstraintConfig {
      carbon_cap: Some(20.0),
      ..Default::default()
    };

    let result = Optimizer::default().run(&engine, &u, &config).unwrap();
    let w = result.weights.clone().unwrap();
    let metrics = result.metrics.unwrap();

    assert_abs_diff_eq!(metrics.carbon_intensity, 20.0, epsilon = 1e-5);
    assert_abs_diff_eq!(w[0], 0.25, epsilon = 1e-5);
    assert_abs_diff_eq!(w[1], 0.75, epsilon = 1e-5);
    assert_abs_diff_eq!(w[2], 0.0, epsilon = 1e-5);
    assert_abs_diff_eq!(metrics.expected_return, 0.0575, epsilon = 1e-5);
  }

  #[test]
  fn impossible_carbon_cap_is_infeasible_not_an_error() {
    let engine = engine_with_means(&[0.08, 0.05, 0.03], &[0.01, 0.01, 0.01]);
    let u = universe(&[50.0, 10.0, 5.0]);
    let config = ConstraintConfig {
      carbon_cap: Some(1.0),
      ..Default::default()
    };

    let result = Optimizer::default().run(&engine, &u, &config).unwrap();

    assert_eq!(result.status, OptimizationStatus::Infeasible);
    assert!(result.weights.is_none() && result.metrics.is_none());
  }

  #[test]
  fn zero_turnover_returns_the_reference() {
    let engine = noisy_engine(60);
    let u = universe(&[100.0, 150.0, 90.0, 200.0]);
    let reference = vec![0.1, 0.2, 0.3, 0.4];
    let config = ConstraintConfig {
      turnover_cap: Some(0.0),
      reference_weights: Some(reference.clone()),
      ..Default::default()
    };

    let result = Optimizer::default().run(&engine, &u, &config).unwrap();

    assert!(result.is_optimal());
    assert_eq!(result.weights.unwrap(), reference);
    assert_eq!(result.metrics.unwrap().turnover, Some(0.0));
  }

  #[test]
  fn zero_turnover_with_infeasible_reference() {
    let engine = noisy_engine(60);
    let u = universe(&[100.0, 150.0, 90.0, 200.0]);
    let config = ConstraintConfig {
      turnover_cap: Some(0.0),
      reference_weights: Some(vec![0.1, 0.2, 0.3, 0.4]),
      carbon_cap: Some(100.0),
      ..Default::default()
    };

    let result = Optimizer::default().run(&engine, &u, &config).unwrap();
    assert_eq!(result.status, OptimizationStatus::Infeasible);
  }

  #[test]
  fn turnover_cap_limits_distance_to_reference() {
    let engine = noisy_engine(60);
    let u = universe(&[100.0, 150.0, 90.0, 200.0]);
    let config = ConstraintConfig {
      turnover_cap: Some(0.3),
      reference_weights: Some(vec![0.25; 4]),
      ..Default::default()
    };

    let result = Optimizer::default().run(&engine, &u, &config).unwrap();
    assert_feasible(&result, &config);
    let turnover = result.metrics.unwrap().turnover.unwrap();
    assert!(turnover <= 0.3 + 1e-6);
    // best asset gains the full allowed shift
    assert_abs_diff_eq!(result.weights.unwrap()[0], 0.4, epsilon = 1e-5);
  }

  #[test]
  fn cvar_cap_is_honoured_by_realized_cvar() {
    let engine = noisy_engine(120);
    let u = universe(&[1.0; 4]);
    // the equally weighted portfolio meets the cap, so the program is feasible
    let cap = engine.cvar(&Array1::from_elem(4, 0.25), 0.9).unwrap();
    let config = ConstraintConfig {
      cvar_cap: Some(cap),
      cvar_confidence: 0.9,
      ..Default::default()
    };

    let result = Optimizer::default().run(&engine, &u, &config).unwrap();

    assert!(result.is_optimal(), "{:?}", result.diagnostics);
    assert_feasible(&result, &config);
    let m = result.metrics.unwrap();
    assert!(m.cvar <= cap + 1e-6);
    assert_eq!(m.cvar_confidence, 0.9);
  }

  #[test]
  fn volatility_cap_is_honoured() {
    let engine = noisy_engine(120);
    let u = universe(&[1.0; 4]);
    let cap = engine.volatility(&Array1::from_elem(4, 0.25)).unwrap();
    let config = ConstraintConfig {
      volatility_cap: Some(cap),
      ..Default::default()
    };

    let result = Optimizer::default().run(&engine, &u, &config).unwrap();

    assert!(result.is_optimal());
    assert_feasible(&result, &config);
    assert!(result.metrics.unwrap().volatility <= cap * (1.0 + 1e-6));
    assert!(!result.diagnostics.regularized);
  }

  #[test]
  #[traced_test]
  fn singular_covariance_retries_with_regularization() {
    // third column duplicates the first: Σ is singular
    let values = array![
      [0.010, 0.002, 0.010],
      [-0.004, 0.001, -0.004],
      [0.006, -0.003, 0.006],
      [0.001, 0.004, 0.001]
    ];
    let tickers = vec!["A0".into(), "A1".into(), "A2".into()];
    let engine = MetricsEngine::new(ReturnsMatrix::new(dates(4), tickers, values).unwrap(), K)
      .unwrap();
    let u = universe(&[1.0; 3]);
    let config = ConstraintConfig {
      volatility_cap: Some(1.0),
      ..Default::default()
    };

    let result = Optimizer::default().run(&engine, &u, &config).unwrap();

    assert!(result.is_optimal());
    assert!(result.diagnostics.regularized);
    assert!(logs_contain("regularized covariance"));
  }

  #[test]
  fn sector_cap_and_bounds_are_respected() {
    let engine = noisy_engine(60);
    let u = universe(&[1.0; 4]);
    let config = ConstraintConfig {
      sector_caps: BTreeMap::from([("Energy".to_string(), 0.3)]),
      asset_bounds: BTreeMap::from([("A2".to_string(), (0.1, 0.5))]),
      ..Default::default()
    };

    let result = Optimizer::default().run(&engine, &u, &config).unwrap();

    assert_feasible(&result, &config);
    let m = result.metrics.as_ref().unwrap();
    assert!(m.sector_exposure["Energy"] <= 0.3 + 1e-6);
    assert!(result.weight_of("A2").unwrap() >= 0.1 - 1e-6);
  }

  #[test]
  fn allow_cash_budget_holds_cash_when_every_asset_loses() {
    let engine = engine_with_means(&[-0.02, -0.05], &[0.01, 0.01]);
    let u = universe(&[50.0, 40.0]);
    let config = ConstraintConfig {
      budget: Budget::AllowCash,
      ..Default::default()
    };

    let result = Optimizer::default().run(&engine, &u, &config).unwrap();

    assert!(result.is_optimal());
    assert!(result.weights.unwrap().iter().sum::<f64>() < 1e-6);
  }

  #[test]
  fn allow_cash_budget_caps_average_carbon_of_holdings() {
    let engine = engine_with_means(&[0.08, 0.05], &[0.01, 0.01]);
    let u = universe(&[50.0, 10.0]);
    let config = ConstraintConfig {
      carbon_cap: Some(20.0),
      budget: Budget::AllowCash,
      ..Default::default()
    };

    let result = Optimizer::default().run(&engine, &u, &config).unwrap();
    let w = result.weights.clone().unwrap();

    // parking weight in cash cannot dilute the intensity of the holdings
    assert_abs_diff_eq!(w[0], 0.25, epsilon = 1e-5);
    assert_abs_diff_eq!(w[1], 0.75, epsilon = 1e-5);
    assert_abs_diff_eq!(result.metrics.unwrap().carbon_intensity, 20.0, epsilon = 1e-5);
  }

  #[test]
  fn reference_without_cap_still_reports_turnover() {
    let engine = noisy_engine(60);
    let u = universe(&[100.0, 150.0, 90.0, 200.0]);
    let config = ConstraintConfig {
      reference_weights: Some(vec![0.25; 4]),
      ..Default::default()
    };

    let result = Optimizer::default().run(&engine, &u, &config).unwrap();

    assert!(result.is_optimal());
    // everything moves into the best asset: |1 - 0.25| + 3 * 0.25
    let turnover = result.metrics.unwrap().turnover.unwrap();
    assert_abs_diff_eq!(turnover, 1.5, epsilon = 1e-5);
  }

  #[test]
  fn tightening_cvar_never_raises_return() {
    let engine = noisy_engine(120);
    let u = universe(&[1.0; 4]);
    let floor = engine.cvar(&Array1::from_elem(4, 0.25), 0.9).unwrap();
    let mut previous = f64::INFINITY;

    for scale in [3.0, 2.0, 1.5, 1.2, 1.0] {
      let config = ConstraintConfig {
        cvar_cap: Some(floor * scale),
        cvar_confidence: 0.9,
        ..Default::default()
      };
      let result = Optimizer::default().run(&engine, &u, &config).unwrap();
      assert!(result.is_optimal(), "scale {scale}: {:?}", result.diagnostics);
      let ret = result.metrics.unwrap().expected_return;
      assert!(ret <= previous + 1e-7, "scale {scale}: {ret} > {previous}");
      previous = ret;
    }
  }

  #[test]
  fn tightening_turnover_never_raises_return() {
    let engine = noisy_engine(60);
    let u = universe(&[1.0; 4]);
    let mut previous = f64::INFINITY;

    for cap in [1.5, 1.0, 0.6, 0.3, 0.1, 0.0] {
      let config = ConstraintConfig {
        turnover_cap: Some(cap),
        reference_weights: Some(vec![0.25; 4]),
        ..Default::default()
      };
      let result = Optimizer::default().run(&engine, &u, &config).unwrap();
      let ret = result.metrics.unwrap().expected_return;
      assert!(ret <= previous + 1e-7, "cap {cap}: {ret} > {previous}");
      previous = ret;
    }
  }

  #[test]
  #[traced_test]
  fn failed_retry_reports_numerical_error() {
    let engine = noisy_engine(60);
    let u = universe(&[1.0; 4]);
    let config = ConstraintConfig {
      cvar_cap: Some(0.05),
      ..Default::default()
    };
    let optimizer = Optimizer::new(SolverSettings {
      max_iterations: 1,
      ..Default::default()
    });

    let result = optimizer.run(&engine, &u, &config).unwrap();

    assert_eq!(result.status, OptimizationStatus::NumericalError);
    assert!(result.diagnostics.regularized);
    assert!(result.weights.is_none() && result.metrics.is_none());
    assert!(logs_contain("regularized covariance"));
  }

  #[test]
  fn tightening_carbon_never_raises_return() {
    let engine = noisy_engine(80);
    let u = universe(&[100.0, 150.0, 90.0, 200.0]);
    let mut previous = f64::INFINITY;

    for cap in [200.0, 160.0, 130.0, 110.0, 95.0] {
      let config = ConstraintConfig {
        carbon_cap: Some(cap),
        ..Default::default()
      };
      let result = Optimizer::default().run(&engine, &u, &config).unwrap();
      let ret = result.metrics.unwrap().expected_return;
      assert!(ret <= previous + 1e-7, "cap {cap}: {ret} > {previous}");
      previous = ret;
    }
  }

  #[test]
  fn dimension_mismatch_is_a_data_error() {
    let engine = noisy_engine(10);
    let u = universe(&[1.0; 3]);
    let constraints = ConstraintBuilder::new(&u)
      .build(&ConstraintConfig::default())
      .unwrap();

    let err = Optimizer::default()
      .optimize(&engine, engine.risk_model(), &u, &constraints)
      .unwrap_err();
    assert!(matches!(err, PortfolioError::Data(_)));
  }

  #[test]
  fn violations_report_each_broken_cap() {
    let u = universe(&[50.0, 10.0]);
    let constraints = ConstraintBuilder::new(&u)
      .build(&ConstraintConfig {
        carbon_cap: Some(20.0),
        ..Default::default()
      })
      .unwrap();
    let w = array![0.9, 0.2];
    let metrics = PortfolioMetrics {
      carbon_intensity: 47.0,
      ..Default::default()
    };

    let found = violations(&w, &metrics, &constraints);
    assert_eq!(found.len(), 2);
  }
}
