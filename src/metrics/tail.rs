//! # Tail Risk
//!
//! $$
//! \mathrm{CVaR}_\alpha = -\frac{1}{k}\Big(\sum_{i<\lfloor k\rfloor} r_{(i)} + (k-\lfloor k\rfloor)\,r_{(\lfloor k\rfloor)}\Big),\quad k=(1-\alpha)T
//! $$
//!
//! Historical-simulation CVaR on sorted portfolio returns. With the fractional
//! weight on the cutoff order statistic this equals the optimum of the
//! Rockafellar-Uryasev program the optimizer embeds.

use crate::error::PortfolioError;
use crate::error::Result;

/// Counts this close to an integer are treated as integers.
const INTEGER_SNAP: f64 = 1e-9;

pub(crate) fn check_confidence(alpha: f64) -> Result<()> {
  if !(alpha > 0.0 && alpha < 1.0) {
    return Err(PortfolioError::param(
      "alpha",
      format!("confidence must lie in (0, 1), got {alpha}"),
    ));
  }
  Ok(())
}

/// Size of the tail, `(1 - alpha) * T`, snapped to the nearest integer when
/// the product only misses it by rounding noise.
pub(crate) fn tail_size(alpha: f64, n: usize) -> f64 {
  let k = (1.0 - alpha) * n as f64;
  let rounded = k.round();
  if (k - rounded).abs() < INTEGER_SNAP {
    rounded
  } else {
    k
  }
}

/// Expected loss in the worst `(1 - alpha)` fraction of `returns`.
pub fn historical_cvar(returns: &[f64], alpha: f64) -> Result<f64> {
  check_confidence(alpha)?;
  if returns.is_empty() {
    return Err(PortfolioError::param("returns", "series cannot be empty"));
  }

  let mut sorted = returns.to_vec();
  sorted.sort_by(f64::total_cmp);

  let k = tail_size(alpha, sorted.len());
  let whole = k.floor() as usize;
  let frac = k - whole as f64;

  let mut acc: f64 = sorted[..whole.min(sorted.len())].iter().sum();
  if frac > 0.0 && whole < sorted.len() {
    acc += frac * sorted[whole];
  }

  Ok(-acc / k)
}

/// Historical VaR: the loss at the tail cutoff.
pub fn historical_var(returns: &[f64], alpha: f64) -> Result<f64> {
  check_confidence(alpha)?;
  if returns.is_empty() {
    return Err(PortfolioError::param("returns", "series cannot be empty"));
  }

  let mut sorted = returns.to_vec();
  sorted.sort_by(f64::total_cmp);
  let k = tail_size(alpha, sorted.len());
  let idx = (k.ceil() as usize).clamp(1, sorted.len()) - 1;
  Ok(-sorted[idx])
}
