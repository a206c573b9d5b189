//! # Run Configuration
//!
//! $$
//! \text{json} \to (\text{constraints}, \text{grid}, \text{solver})
//! $$
//!
//! Everything a run needs besides the two data tables.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;

use crate::constraints::ConstraintConfig;
use crate::error::Result;
use crate::metrics::TRADING_DAYS;
use crate::optimizer::SolverSettings;
use crate::scenario::GridSpec;

fn default_periods_per_year() -> f64 {
  TRADING_DAYS
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
  #[serde(default = "default_periods_per_year")]
  pub periods_per_year: f64,
  #[serde(default)]
  pub constraints: ConstraintConfig,
  /// Ticker to sector label.
  #[serde(default)]
  pub sectors: BTreeMap<String, String>,
  /// Annualized expected returns in universe order, replacing the
  /// historical means.
  pub expected_returns: Option<Vec<f64>>,
  #[serde(default)]
  pub grid: GridSpec,
  #[serde(default)]
  pub solver: SolverSettings,
}

impl Default for RunConfig {
  fn default() -> Self {
    Self {
      periods_per_year: TRADING_DAYS,
      constraints: ConstraintConfig::default(),
      sectors: BTreeMap::new(),
      expected_returns: None,
      grid: GridSpec::default(),
      solver: SolverSettings::default(),
    }
  }
}

impl RunConfig {
  pub fn from_json_str(raw: &str) -> Result<Self> {
    Ok(serde_json::from_str(raw)?)
  }

  pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
    Self::from_json_str(&fs::read_to_string(path)?)
  }
}
