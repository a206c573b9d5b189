//! # Drawdown
//!
//! $$
//! V_t = \Big(1-\sum_i w_i\Big) + \sum_i w_i \prod_{s\le t}(1+r_{s,i}),\qquad
//! \mathrm{MDD} = \max_t \frac{\max_{u\le t}V_u - V_t}{\max_{u\le t}V_u}
//! $$
//!
//! Maximum drawdown of the buy-and-hold path implied by a static weight vector.

use chrono::NaiveDate;
use ndarray::Array1;
use ndarray::ArrayView2;

/// Worst peak-to-trough decline of a value path.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DrawdownReport {
  /// Decline as a non-negative fraction of the peak.
  pub max_drawdown: f64,
  /// Date of the peak; `None` when the peak is the starting value.
  pub peak: Option<NaiveDate>,
  /// Date of the trough; `None` when the path never declines.
  pub trough: Option<NaiveDate>,
}

/// Index-based drawdown of a value path whose element 0 is the start value.
/// Returns `(drawdown, peak_index, trough_index)`.
pub(crate) fn path_drawdown(path: &[f64]) -> (f64, usize, usize) {
  let mut peak_idx = 0;
  let mut best = (0.0, 0, 0);

  for (t, &v) in path.iter().enumerate() {
    if v > path[peak_idx] {
      peak_idx = t;
    }
    let peak = path[peak_idx];
    if peak > 0.0 {
      let dd = (peak - v) / peak;
      if dd > best.0 {
        best = (dd, peak_idx, t);
      }
    }
  }

  best
}

/// Value path starting at 1, one point per period plus the start.
pub(crate) fn buy_and_hold_path(returns: ArrayView2<f64>, weights: &Array1<f64>) -> Vec<f64> {
  let cash = 1.0 - weights.sum();
  let mut holdings = weights.clone();

  let mut path = Vec::with_capacity(returns.nrows() + 1);
  path.push(1.0);
  for row in returns.rows() {
    holdings.zip_mut_with(&row, |h, r| *h *= 1.0 + r);
    path.push(cash + holdings.sum());
  }
  path
}

pub(crate) fn drawdown_report(
  returns: ArrayView2<f64>,
  dates: &[NaiveDate],
  weights: &Array1<f64>,
) -> DrawdownReport {
  let path = buy_and_hold_path(returns, weights);
  let (max_drawdown, peak, trough) = path_drawdown(&path);

  // path index t > 0 corresponds to dates[t - 1]
  let date_at = |idx: usize| idx.checked_sub(1).and_then(|i| dates.get(i)).copied();

  DrawdownReport {
    max_drawdown,
    peak: if max_drawdown > 0.0 { date_at(peak) } else { None },
    trough: if max_drawdown > 0.0 { date_at(trough) } else { None },
  }
}
