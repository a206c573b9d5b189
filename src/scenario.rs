//! # Scenario Sweep
//!
//! $$
//! \mathcal G = \{\bar c_i\} \times \{\overline{\mathrm{CVaR}}_j\} \times \{\tau_k\},\qquad
//! (\bar c, \overline{\mathrm{CVaR}}, \tau) \mapsto \mathbf w^\star
//! $$
//!
//! Batch optimization over a grid of constraint thresholds. Grid points are
//! independent and evaluated in parallel; the table is ordered by thresholds.

use impl_new_derive::ImplNew;
use ordered_float::OrderedFloat;
use rayon::prelude::*;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::info;

use crate::constraints::ConstraintBuilder;
use crate::constraints::ConstraintConfig;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::metrics::MetricsEngine;
use crate::metrics::PortfolioMetrics;
use crate::metrics::RiskModel;
use crate::optimizer::OptimizationStatus;
use crate::optimizer::Optimizer;
use crate::universe::AssetUniverse;

/// Upper limit on the number of values one axis may expand to.
pub const MAX_AXIS_POINTS: usize = 10_000;

/// Upper limit on the number of points in the whole grid.
pub const MAX_GRID_POINTS: usize = 100_000;

/// Inclusive arithmetic range `start, start + step, ..., end`.
#[derive(ImplNew, Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridAxis {
  pub start: f64,
  pub end: f64,
  pub step: f64,
}

impl GridAxis {
  /// `non_negative` rejects ranges reaching below zero, for caps that have
  /// no meaning there.
  fn validate(&self, field: &str, non_negative: bool) -> Result<()> {
    let (start, end, step) = (self.start, self.end, self.step);
    if !(start.is_finite() && end.is_finite() && step.is_finite()) {
      return Err(PortfolioError::config(field, "start, end and step must be finite"));
    }
    if step <= 0.0 {
      return Err(PortfolioError::config(
        field,
        format!("step must be positive, got {step}"),
      ));
    }
    if end < start {
      return Err(PortfolioError::config(
        field,
        format!("end {end} lies below start {start}"),
      ));
    }
    if non_negative && start < 0.0 {
      return Err(PortfolioError::config(
        field,
        format!("caps cannot be negative, got {start}"),
      ));
    }
    let steps = self.steps();
    if !steps.is_finite() || steps >= MAX_AXIS_POINTS as f64 {
      return Err(PortfolioError::config(
        field,
        format!("{:.0} points exceed the limit of {MAX_AXIS_POINTS}", steps + 1.0),
      ));
    }
    Ok(())
  }

  /// Whole steps between `start` and `end`, kept in floating point so huge
  /// ranges cannot overflow.
  fn steps(&self) -> f64 {
    ((self.end - self.start) / self.step + 1e-9).floor()
  }

  /// Number of values; only meaningful on a validated axis.
  fn count(&self) -> usize {
    self.steps() as usize + 1
  }

  /// Expanded axis values; the last one never overshoots `end`.
  pub fn values(&self) -> Vec<f64> {
    (0..self.count())
      .map(|k| (self.start + k as f64 * self.step).min(self.end))
      .collect()
  }
}

/// Optional sweep axes. A missing axis keeps the base configuration's value.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GridSpec {
  pub carbon_cap: Option<GridAxis>,
  pub cvar_cap: Option<GridAxis>,
  pub turnover_cap: Option<GridAxis>,
}

impl GridSpec {
  pub fn validate(&self) -> Result<()> {
    // only CVaR caps may be negative
    let axes = [
      ("grid.carbonCap", &self.carbon_cap, true),
      ("grid.cvarCap", &self.cvar_cap, false),
      ("grid.turnoverCap", &self.turnover_cap, true),
    ];
    let mut total = 1usize;
    for (field, axis, non_negative) in axes {
      if let Some(axis) = axis {
        axis.validate(field, non_negative)?;
        total = total.saturating_mul(axis.count());
      }
    }
    if total > MAX_GRID_POINTS {
      return Err(PortfolioError::config(
        "grid",
        format!("{total} grid points exceed the limit of {MAX_GRID_POINTS}"),
      ));
    }
    Ok(())
  }

  /// Cartesian product of the axes, each missing axis contributing the base
  /// value.
  pub fn points(&self, base: &ConstraintConfig) -> Result<Vec<GridPoint>> {
    self.validate()?;

    let expand = |axis: &Option<GridAxis>, fallback: Option<f64>| -> Vec<Option<f64>> {
      match axis {
        Some(a) => a.values().into_iter().map(Some).collect(),
        None => vec![fallback],
      }
    };
    let carbon = expand(&self.carbon_cap, base.carbon_cap);
    let cvar = expand(&self.cvar_cap, base.cvar_cap);
    let turnover = expand(&self.turnover_cap, base.turnover_cap);

    let mut points = Vec::with_capacity(carbon.len() * cvar.len() * turnover.len());
    for &c in &carbon {
      for &v in &cvar {
        for &t in &turnover {
          points.push(GridPoint {
            carbon_cap: c,
            cvar_cap: v,
            turnover_cap: t,
          });
        }
      }
    }
    Ok(points)
  }
}

/// One set of thresholds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridPoint {
  pub carbon_cap: Option<f64>,
  pub cvar_cap: Option<f64>,
  pub turnover_cap: Option<f64>,
}

impl GridPoint {
  fn apply(&self, base: &ConstraintConfig) -> ConstraintConfig {
    ConstraintConfig {
      carbon_cap: self.carbon_cap,
      cvar_cap: self.cvar_cap,
      turnover_cap: self.turnover_cap,
      ..base.clone()
    }
  }

  fn key(&self) -> [Option<OrderedFloat<f64>>; 3] {
    [
      self.carbon_cap.map(OrderedFloat),
      self.cvar_cap.map(OrderedFloat),
      self.turnover_cap.map(OrderedFloat),
    ]
  }
}

/// Outcome of one grid point.
#[derive(Clone, Debug, Serialize)]
pub struct ScenarioRow {
  #[serde(flatten)]
  pub point: GridPoint,
  pub status: OptimizationStatus,
  pub weights: Option<Vec<f64>>,
  pub metrics: Option<PortfolioMetrics>,
}

impl ScenarioRow {
  pub fn is_optimal(&self) -> bool {
    self.status == OptimizationStatus::Optimal
  }
}

/// Sweep results ordered by (carbon cap, CVaR cap, turnover cap).
#[derive(Clone, Debug, Serialize)]
pub struct ScenarioTable {
  pub tickers: Vec<String>,
  pub rows: Vec<ScenarioRow>,
}

impl ScenarioTable {
  pub fn len(&self) -> usize {
    self.rows.len()
  }

  pub fn is_empty(&self) -> bool {
    self.rows.is_empty()
  }

  /// Rows that reached an optimal portfolio.
  pub fn frontier(&self) -> impl Iterator<Item = &ScenarioRow> {
    self.rows.iter().filter(|r| r.is_optimal())
  }

  pub fn count_status(&self, status: OptimizationStatus) -> usize {
    self.rows.iter().filter(|r| r.status == status).count()
  }
}

/// Runs the optimizer over every grid point against shared read-only inputs.
#[derive(Clone, Copy, Debug)]
pub struct ScenarioRunner<'a> {
  optimizer: &'a Optimizer,
  engine: &'a MetricsEngine,
  risk: &'a RiskModel,
  universe: &'a AssetUniverse,
}

impl<'a> ScenarioRunner<'a> {
  pub fn new(
    optimizer: &'a Optimizer,
    engine: &'a MetricsEngine,
    risk: &'a RiskModel,
    universe: &'a AssetUniverse,
  ) -> Self {
    Self {
      optimizer,
      engine,
      risk,
      universe,
    }
  }

  /// Sweep `grid` on top of `base`. Configuration problems abort the whole
  /// sweep; infeasible points are recorded as rows.
  pub fn run(&self, base: &ConstraintConfig, grid: &GridSpec) -> Result<ScenarioTable> {
    let points = grid.points(base)?;
    info!(points = points.len(), "starting scenario sweep");

    let mut rows = points
      .par_iter()
      .map(|point| self.evaluate(base, point))
      .collect::<Result<Vec<_>>>()?;

    rows.sort_by_key(|row| row.point.key());

    let table = ScenarioTable {
      tickers: self.universe.tickers(),
      rows,
    };
    info!(
      points = table.len(),
      optimal = table.count_status(OptimizationStatus::Optimal),
      infeasible = table.count_status(OptimizationStatus::Infeasible),
      numerical = table.count_status(OptimizationStatus::NumericalError),
      "scenario sweep finished"
    );
    Ok(table)
  }

  fn evaluate(&self, base: &ConstraintConfig, point: &GridPoint) -> Result<ScenarioRow> {
    let config = point.apply(base);
    let constraints = ConstraintBuilder::new(self.universe).build(&config)?;
    let result = self
      .optimizer
      .optimize(self.engine, self.risk, self.universe, &constraints)?;

    debug!(
      carbon_cap = ?point.carbon_cap,
      cvar_cap = ?point.cvar_cap,
      turnover_cap = ?point.turnover_cap,
      status = %result.status,
      "grid point solved"
    );

    Ok(ScenarioRow {
      point: *point,
      status: result.status,
      weights: result.weights,
      metrics: result.metrics,
    })
  }
}
