//! # Universe
//!
//! $$
//! R \in \mathbb{R}^{T \times N}, \qquad c \in \mathbb{R}_{\ge 0}^{N}
//! $$
//!
//! Read-only inputs of a run: the historical returns table and the static
//! per-asset data (sector label, carbon intensity), aligned on one ticker order.

use std::collections::BTreeMap;
use std::collections::HashSet;

use chrono::NaiveDate;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView1;
use ndarray::ArrayView2;

use crate::error::PortfolioError;
use crate::error::Result;

/// T x N table of periodic returns with ascending, unique dates.
#[derive(Clone, Debug)]
pub struct ReturnsMatrix {
  dates: Vec<NaiveDate>,
  tickers: Vec<String>,
  values: Array2<f64>,
}

impl ReturnsMatrix {
  /// Validate and wrap a returns table. Rows are dates, columns are tickers.
  pub fn new(dates: Vec<NaiveDate>, tickers: Vec<String>, values: Array2<f64>) -> Result<Self> {
    let (t, n) = values.dim();
    if n == 0 || tickers.is_empty() {
      return Err(PortfolioError::data("returns table has no asset columns"));
    }
    if t < 2 {
      return Err(PortfolioError::data(format!(
        "returns table needs at least 2 observations, got {t}"
      )));
    }
    if tickers.len() != n {
      return Err(PortfolioError::data(format!(
        "{} tickers for {n} return columns",
        tickers.len()
      )));
    }
    if dates.len() != t {
      return Err(PortfolioError::data(format!(
        "{} dates for {t} return rows",
        dates.len()
      )));
    }

    let mut seen = HashSet::with_capacity(n);
    for ticker in &tickers {
      if !seen.insert(ticker.as_str()) {
        return Err(PortfolioError::data(format!("duplicate ticker {ticker}")));
      }
    }

    for pair in dates.windows(2) {
      if pair[1] <= pair[0] {
        return Err(PortfolioError::data(format!(
          "dates must be strictly ascending: {} follows {}",
          pair[1], pair[0]
        )));
      }
    }

    if let Some(((row, col), _)) = values.indexed_iter().find(|(_, v)| !v.is_finite()) {
      return Err(PortfolioError::data(format!(
        "non-finite return for {} on {}",
        tickers[col], dates[row]
      )));
    }

    Ok(Self {
      dates,
      tickers,
      values,
    })
  }

  pub fn dates(&self) -> &[NaiveDate] {
    &self.dates
  }

  pub fn tickers(&self) -> &[String] {
    &self.tickers
  }

  /// Raw T x N view; one row per historical scenario.
  pub fn values(&self) -> ArrayView2<'_, f64> {
    self.values.view()
  }

  pub fn n_periods(&self) -> usize {
    self.values.nrows()
  }

  pub fn n_assets(&self) -> usize {
    self.values.ncols()
  }
}

/// Carbon intensity per ticker as read from the carbon table.
#[derive(Clone, Debug, Default)]
pub struct CarbonTable {
  pub entries: Vec<(String, f64)>,
}

/// One asset of the universe.
#[derive(Clone, Debug, PartialEq)]
pub struct Asset {
  pub ticker: String,
  pub sector: Option<String>,
  pub carbon_intensity: f64,
}

/// Ordered asset universe aligned with the returns columns.
#[derive(Clone, Debug)]
pub struct AssetUniverse {
  assets: Vec<Asset>,
  carbon: Array1<f64>,
}

impl AssetUniverse {
  /// Build a universe from explicit assets.
  pub fn new(assets: Vec<Asset>) -> Result<Self> {
    if assets.is_empty() {
      return Err(PortfolioError::data("asset universe is empty"));
    }

    let mut seen = HashSet::with_capacity(assets.len());
    for asset in &assets {
      if !seen.insert(asset.ticker.as_str()) {
        return Err(PortfolioError::data(format!(
          "duplicate ticker {}",
          asset.ticker
        )));
      }
      if !asset.carbon_intensity.is_finite() || asset.carbon_intensity < 0.0 {
        return Err(PortfolioError::data(format!(
          "carbon intensity of {} must be finite and non-negative, got {}",
          asset.ticker, asset.carbon_intensity
        )));
      }
    }

    let carbon = assets.iter().map(|a| a.carbon_intensity).collect();
    Ok(Self { assets, carbon })
  }

  /// Align the carbon table on the returns column order.
  ///
  /// Both tables must carry the identical ticker set.
  pub fn aligned(returns: &ReturnsMatrix, carbon: &CarbonTable) -> Result<Self> {
    let mut by_ticker: BTreeMap<&str, f64> = BTreeMap::new();
    for (ticker, value) in &carbon.entries {
      if by_ticker.insert(ticker.as_str(), *value).is_some() {
        return Err(PortfolioError::data(format!(
          "duplicate ticker {ticker} in carbon table"
        )));
      }
    }

    let missing: Vec<&str> = returns
      .tickers()
      .iter()
      .map(String::as_str)
      .filter(|t| !by_ticker.contains_key(t))
      .collect();
    let returns_set: HashSet<&str> = returns.tickers().iter().map(String::as_str).collect();
    let extra: Vec<&str> = by_ticker
      .keys()
      .copied()
      .filter(|t| !returns_set.contains(t))
      .collect();

    if !missing.is_empty() || !extra.is_empty() {
      return Err(PortfolioError::data(format!(
        "ticker mismatch between tables: missing carbon for {missing:?}, no returns for {extra:?}"
      )));
    }

    let assets = returns
      .tickers()
      .iter()
      .map(|t| Asset {
        ticker: t.clone(),
        sector: None,
        carbon_intensity: by_ticker[t.as_str()],
      })
      .collect();

    Self::new(assets)
  }

  /// Attach sector labels. Unknown tickers are a data error.
  pub fn with_sectors(mut self, sectors: &BTreeMap<String, String>) -> Result<Self> {
    for (ticker, sector) in sectors {
      let asset = self
        .assets
        .iter_mut()
        .find(|a| &a.ticker == ticker)
        .ok_or_else(|| PortfolioError::data(format!("sector given for unknown ticker {ticker}")))?;
      asset.sector = Some(sector.clone());
    }
    Ok(self)
  }

  pub fn assets(&self) -> &[Asset] {
    &self.assets
  }

  pub fn len(&self) -> usize {
    self.assets.len()
  }

  pub fn is_empty(&self) -> bool {
    self.assets.is_empty()
  }

  pub fn tickers(&self) -> Vec<String> {
    self.assets.iter().map(|a| a.ticker.clone()).collect()
  }

  pub fn index_of(&self, ticker: &str) -> Option<usize> {
    self.assets.iter().position(|a| a.ticker == ticker)
  }

  pub fn carbon_intensities(&self) -> ArrayView1<'_, f64> {
    self.carbon.view()
  }

  pub fn has_sectors(&self) -> bool {
    self.assets.iter().any(|a| a.sector.is_some())
  }

  /// Indices of the assets tagged with `sector`.
  pub fn sector_members(&self, sector: &str) -> Vec<usize> {
    self
      .assets
      .iter()
      .enumerate()
      .filter(|(_, a)| a.sector.as_deref() == Some(sector))
      .map(|(i, _)| i)
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::array;

  fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
  }

  fn returns() -> ReturnsMatrix {
    ReturnsMatrix::new(
      vec![day(2), day(3), day(4)],
      vec!["AAA".into(), "BBB".into()],
      array![[0.01, 0.0], [-0.02, 0.01], [0.005, 0.002]],
    )
    .unwrap()
  }

  #[test]
  fn rejects_unsorted_dates() {
    let err = ReturnsMatrix::new(
      vec![day(3), day(2)],
      vec!["AAA".into()],
      array![[0.01], [0.02]],
    )
    .unwrap_err();
    assert!(matches!(err, PortfolioError::Data(_)));
  }

  #[test]
  fn rejects_non_finite_returns() {
    let err = ReturnsMatrix::new(
      vec![day(2), day(3)],
      vec!["AAA".into()],
      array![[0.01], [f64::NAN]],
    )
    .unwrap_err();
    assert!(err.to_string().contains("non-finite"));
  }

  #[test]
  fn aligns_carbon_to_returns_order() {
    let carbon = CarbonTable {
      entries: vec![("BBB".into(), 10.0), ("AAA".into(), 50.0)],
    };
    let universe = AssetUniverse::aligned(&returns(), &carbon).unwrap();

    assert_eq!(universe.tickers(), vec!["AAA".to_string(), "BBB".to_string()]);
    assert_eq!(universe.carbon_intensities().to_vec(), vec![50.0, 10.0]);
  }

  #[test]
  fn mismatched_tickers_are_a_data_error() {
    let carbon = CarbonTable {
      entries: vec![("AAA".into(), 50.0), ("CCC".into(), 10.0)],
    };
    let err = AssetUniverse::aligned(&returns(), &carbon).unwrap_err();

    assert!(matches!(err, PortfolioError::Data(_)));
    assert!(err.to_string().contains("CCC"));
  }

  #[test]
  fn negative_carbon_is_rejected() {
    let carbon = CarbonTable {
      entries: vec![("AAA".into(), -1.0), ("BBB".into(), 10.0)],
    };
    assert!(AssetUniverse::aligned(&returns(), &carbon).is_err());
  }

  #[test]
  fn sector_membership() {
    let carbon = CarbonTable {
      entries: vec![("AAA".into(), 50.0), ("BBB".into(), 10.0)],
    };
    let sectors = BTreeMap::from([("BBB".to_string(), "Utilities".to_string())]);
    let universe = AssetUniverse::aligned(&returns(), &carbon)
      .unwrap()
      .with_sectors(&sectors)
      .unwrap();

    assert!(universe.has_sectors());
    assert_eq!(universe.sector_members("Utilities"), vec![1]);
    assert!(universe.sector_members("Energy").is_empty());
  }
}
