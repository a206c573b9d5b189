//! # Constraints
//!
//! $$
//! \mathbf 1^\top\mathbf w = 1,\quad l \le \mathbf w \le u,\quad c^\top\mathbf w \le \bar c,\quad
//! \|\mathbf w-\mathbf w_0\|_1 \le \tau,\quad \sum_{i\in S}w_i \le s_S
//! $$
//!
//! User thresholds validated and normalized into an index-based constraint set.

use std::collections::BTreeMap;

use ndarray::Array1;
use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

use crate::error::PortfolioError;
use crate::error::Result;
use crate::universe::AssetUniverse;

fn default_confidence() -> f64 {
  0.95
}

/// How the weights must add up.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Budget {
  /// `Σ w = 1`.
  #[default]
  FullyInvested,
  /// `Σ w ≤ 1`, the remainder held as cash.
  AllowCash,
}

impl Budget {
  /// Whether `sum` honors the budget within `tol`.
  pub fn holds(&self, sum: f64, tol: f64) -> bool {
    match self {
      Budget::FullyInvested => (sum - 1.0).abs() <= tol,
      Budget::AllowCash => sum <= 1.0 + tol,
    }
  }
}

/// Raw thresholds as supplied by the caller. Every cap is optional.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintConfig {
  pub carbon_cap: Option<f64>,
  pub cvar_cap: Option<f64>,
  #[serde(default = "default_confidence")]
  pub cvar_confidence: f64,
  pub turnover_cap: Option<f64>,
  pub volatility_cap: Option<f64>,
  #[serde(default)]
  pub sector_caps: BTreeMap<String, f64>,
  pub reference_weights: Option<Vec<f64>>,
  #[serde(default)]
  pub asset_bounds: BTreeMap<String, (f64, f64)>,
  #[serde(default)]
  pub budget: Budget,
}

impl Default for ConstraintConfig {
  fn default() -> Self {
    Self {
      carbon_cap: None,
      cvar_cap: None,
      cvar_confidence: default_confidence(),
      turnover_cap: None,
      volatility_cap: None,
      sector_caps: BTreeMap::new(),
      reference_weights: None,
      asset_bounds: BTreeMap::new(),
      budget: Budget::FullyInvested,
    }
  }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CvarLimit {
  pub cap: f64,
  pub confidence: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CarbonLimit {
  pub intensities: Array1<f64>,
  pub cap: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TurnoverLimit {
  pub reference: Array1<f64>,
  pub cap: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SectorLimit {
  pub sector: String,
  pub members: Vec<usize>,
  pub cap: f64,
}

/// Validated constraint set in universe order.
#[derive(Clone, Debug, PartialEq)]
pub struct Constraints {
  pub budget: Budget,
  pub lower: Array1<f64>,
  pub upper: Array1<f64>,
  pub volatility: Option<f64>,
  pub cvar: Option<CvarLimit>,
  pub carbon: Option<CarbonLimit>,
  pub turnover: Option<TurnoverLimit>,
  pub sectors: Vec<SectorLimit>,
  /// Confidence used when reporting CVaR, even without a CVaR cap.
  pub cvar_confidence: f64,
  /// Caller's reference portfolio, kept for turnover reporting with or
  /// without a turnover cap.
  pub reference: Option<Array1<f64>>,
}

impl Constraints {
  pub fn n_assets(&self) -> usize {
    self.lower.len()
  }

  /// Portfolio realized turnover is measured against: the caller's reference,
  /// else the all-cash start of a turnover cap.
  pub fn reference(&self) -> Option<&Array1<f64>> {
    self
      .reference
      .as_ref()
      .or_else(|| self.turnover.as_ref().map(|t| &t.reference))
  }
}

fn finite(field: &str, value: f64) -> Result<f64> {
  if value.is_finite() {
    Ok(value)
  } else {
    Err(PortfolioError::config(field, format!("must be finite, got {value}")))
  }
}

fn non_negative(field: &str, value: f64) -> Result<f64> {
  finite(field, value)?;
  if value < 0.0 {
    return Err(PortfolioError::config(
      field,
      format!("must be non-negative, got {value}"),
    ));
  }
  Ok(value)
}

/// Merges user thresholds with the static universe data.
#[derive(Clone, Copy, Debug)]
pub struct ConstraintBuilder<'a> {
  universe: &'a AssetUniverse,
}

impl<'a> ConstraintBuilder<'a> {
  pub fn new(universe: &'a AssetUniverse) -> Self {
    Self { universe }
  }

  /// Validate `config` and produce the constraint set.
  pub fn build(&self, config: &ConstraintConfig) -> Result<Constraints> {
    let n = self.universe.len();

    let confidence = finite("cvarConfidence", config.cvar_confidence)?;
    if !(confidence > 0.0 && confidence < 1.0) {
      return Err(PortfolioError::config(
        "cvarConfidence",
        format!("must lie in (0, 1), got {confidence}"),
      ));
    }

    let mut lower = Array1::zeros(n);
    let mut upper = Array1::ones(n);
    for (ticker, &(lo, hi)) in &config.asset_bounds {
      let field = format!("assetBounds.{ticker}");
      let idx = self
        .universe
        .index_of(ticker)
        .ok_or_else(|| PortfolioError::config(&field, "unknown ticker"))?;
      finite(&field, lo)?;
      finite(&field, hi)?;
      if lo > hi {
        return Err(PortfolioError::config(
          &field,
          format!("lower bound {lo} exceeds upper bound {hi}"),
        ));
      }
      lower[idx] = lo;
      upper[idx] = hi;
    }

    let volatility = config
      .volatility_cap
      .map(|v| non_negative("volatilityCap", v))
      .transpose()?;

    let cvar = config
      .cvar_cap
      .map(|cap| finite("cvarCap", cap))
      .transpose()?
      .map(|cap| CvarLimit { cap, confidence });

    let carbon = config
      .carbon_cap
      .map(|cap| non_negative("carbonCap", cap))
      .transpose()?
      .map(|cap| CarbonLimit {
        intensities: self.universe.carbon_intensities().to_owned(),
        cap,
      });

    let reference = match &config.reference_weights {
      Some(weights) => {
        if weights.len() != n {
          return Err(PortfolioError::config(
            "referenceWeights",
            format!("{} weights for {n} assets", weights.len()),
          ));
        }
        for &w in weights {
          finite("referenceWeights", w)?;
        }
        Some(Array1::from(weights.clone()))
      }
      None => None,
    };

    let turnover = match config.turnover_cap {
      Some(cap) => {
        let cap = non_negative("turnoverCap", cap)?;
        let reference = reference.clone().unwrap_or_else(|| {
          warn!("turnover cap without reference weights; measuring turnover from cash");
          Array1::zeros(n)
        });
        Some(TurnoverLimit { reference, cap })
      }
      None => None,
    };

    let mut sectors = Vec::with_capacity(config.sector_caps.len());
    if !config.sector_caps.is_empty() && !self.universe.has_sectors() {
      return Err(PortfolioError::config(
        "sectorCaps",
        "sector caps given but no asset carries a sector label",
      ));
    }
    for (sector, &cap) in &config.sector_caps {
      let field = format!("sectorCaps.{sector}");
      finite(&field, cap)?;
      if !(0.0..=1.0).contains(&cap) {
        return Err(PortfolioError::config(
          &field,
          format!("must lie in [0, 1], got {cap}"),
        ));
      }
      let members = self.universe.sector_members(sector);
      if members.is_empty() {
        warn!(sector = %sector, "sector cap names a sector without members; skipped");
        continue;
      }
      sectors.push(SectorLimit {
        sector: sector.clone(),
        members,
        cap,
      });
    }

    Ok(Constraints {
      budget: config.budget,
      lower,
      upper,
      volatility,
      cvar,
      carbon,
      turnover,
      sectors,
      cvar_confidence: confidence,
      reference,
    })
  }
}
