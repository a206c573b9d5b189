//! # Demo Data
//!
//! $$
//! r_{t,i} \overset{iid}{\sim} \mathcal N(\mu, \sigma^2)
//! $$
//!
//! Seeded synthetic universe used when no data files are supplied.

use chrono::Datelike;
use chrono::NaiveDate;
use chrono::Weekday;
use ndarray::Array2;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::Normal;

use crate::config::RunConfig;
use crate::constraints::ConstraintConfig;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::universe::CarbonTable;
use crate::universe::ReturnsMatrix;

pub const DEMO_TICKERS: [&str; 4] = ["AAA", "BBB", "CCC", "DDD"];
pub const DEMO_CARBON: [f64; 4] = [100.0, 150.0, 90.0, 200.0];
pub const DEMO_PERIODS: usize = 252;
pub const DEMO_SEED: u64 = 42;

const DAILY_MEAN: f64 = 0.0005;
const DAILY_SD: f64 = 0.01;

/// First `n` weekdays on or after `start`.
pub fn business_days(start: NaiveDate, n: usize) -> Vec<NaiveDate> {
  start
    .iter_days()
    .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
    .take(n)
    .collect()
}

/// Normal daily returns for four tickers over one trading year from
/// 2020-01-01, together with their carbon intensities.
pub fn demo_dataset() -> Result<(ReturnsMatrix, CarbonTable)> {
  let start = NaiveDate::from_ymd_opt(2020, 1, 1)
    .ok_or_else(|| PortfolioError::data("invalid demo start date"))?;
  let dates = business_days(start, DEMO_PERIODS);

  let normal = Normal::new(DAILY_MEAN, DAILY_SD)
    .map_err(|e| PortfolioError::param("sigma", e.to_string()))?;
  let mut rng = StdRng::seed_from_u64(DEMO_SEED);
  let values = Array2::random_using((DEMO_PERIODS, DEMO_TICKERS.len()), normal, &mut rng);

  let tickers = DEMO_TICKERS.iter().map(|t| t.to_string()).collect();
  let returns = ReturnsMatrix::new(dates, tickers, values)?;

  let carbon = CarbonTable {
    entries: DEMO_TICKERS
      .iter()
      .zip(DEMO_CARBON)
      .map(|(t, c)| (t.to_string(), c))
      .collect(),
  };
  Ok((returns, carbon))
}

/// Thresholds matching the demo dataset: carbon 150, CVaR 0.2 at 95% and
/// turnover 0.3 away from equal weights.
pub fn demo_config() -> RunConfig {
  let n = DEMO_TICKERS.len();
  RunConfig {
    constraints: ConstraintConfig {
      carbon_cap: Some(150.0),
      cvar_cap: Some(0.2),
      cvar_confidence: 0.95,
      turnover_cap: Some(0.3),
      reference_weights: Some(vec![1.0 / n as f64; n]),
      ..Default::default()
    },
    ..Default::default()
  }
}
