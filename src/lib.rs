//! # Sustainable Portfolio
//!
//! $$
//! \max_{\mathbf w \ge 0,\ \mathbf 1^\top\mathbf w = 1}\ \mu^\top\mathbf w
//! \quad\text{s.t.}\quad c^\top\mathbf w \le \bar c,\ \mathrm{CVaR}_\alpha(\mathbf w) \le \overline{\mathrm{CVaR}},\
//! \|\mathbf w - \mathbf w_0\|_1 \le \tau
//! $$
//!
//! Long-only allocation under carbon, tail-risk, turnover and sector limits,
//! with parallel threshold sweeps.

pub mod config;
pub mod constraints;
pub mod demo;
pub mod error;
pub mod io;
pub mod metrics;
pub mod optimizer;
pub mod report;
pub mod scenario;
pub mod universe;

pub use config::RunConfig;
pub use constraints::ConstraintBuilder;
pub use constraints::ConstraintConfig;
pub use constraints::Constraints;
pub use error::PortfolioError;
pub use error::Result;
pub use metrics::MetricsEngine;
pub use metrics::PortfolioMetrics;
pub use metrics::RiskModel;
pub use optimizer::OptimizationResult;
pub use optimizer::OptimizationStatus;
pub use optimizer::Optimizer;
pub use scenario::GridSpec;
pub use scenario::ScenarioRunner;
pub use scenario::ScenarioTable;
pub use universe::AssetUniverse;
pub use universe::ReturnsMatrix;

/// Engine, risk model and universe prepared from the data tables and a run
/// configuration.
pub struct Workspace {
  pub engine: MetricsEngine,
  pub risk: RiskModel,
  pub universe: AssetUniverse,
}

impl Workspace {
  /// Align the tables, attach sector labels and apply any expected-return
  /// override.
  pub fn prepare(
    returns: ReturnsMatrix,
    carbon: &universe::CarbonTable,
    config: &RunConfig,
  ) -> Result<Self> {
    let universe = AssetUniverse::aligned(&returns, carbon)?.with_sectors(&config.sectors)?;
    let engine = MetricsEngine::new(returns, config.periods_per_year)?;
    let risk = match &config.expected_returns {
      Some(mu) => engine.risk_model().clone().with_expected_returns(mu.clone())?,
      None => engine.risk_model().clone(),
    };

    Ok(Self {
      engine,
      risk,
      universe,
    })
  }

  pub fn optimize(&self, config: &RunConfig) -> Result<OptimizationResult> {
    let constraints = ConstraintBuilder::new(&self.universe).build(&config.constraints)?;
    Optimizer::new(config.solver.clone()).optimize(
      &self.engine,
      &self.risk,
      &self.universe,
      &constraints,
    )
  }

  pub fn sweep(&self, config: &RunConfig) -> Result<ScenarioTable> {
    let optimizer = Optimizer::new(config.solver.clone());
    ScenarioRunner::new(&optimizer, &self.engine, &self.risk, &self.universe)
      .run(&config.constraints, &config.grid)
  }
}
