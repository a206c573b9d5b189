//! # Conic Program
//!
//! $$
//! \min_x\ q^\top x \quad\text{s.t.}\quad Ax + s = b,\ s \in \{0\}^{m_0}\times\mathbb R_+^{m_1}\times\mathcal Q^{m_2}
//! $$
//!
//! Assembly of the return-maximization program in the standard form consumed
//! by Clarabel. Variables are laid out as `[w | d | z | u]`: weights, turnover
//! slacks, the VaR threshold and one shortfall per historical scenario.

use ndarray::Array2;
use ndarray::ArrayView2;

use crate::constraints::Budget;
use crate::constraints::Constraints;
use crate::metrics::tail;
use crate::metrics::RiskModel;

/// One linear row `Σ aⱼ xⱼ (op) b`.
#[derive(Clone, Debug, Default)]
pub(crate) struct Row {
  pub coeffs: Vec<(usize, f64)>,
  pub rhs: f64,
}

impl Row {
  fn new(coeffs: Vec<(usize, f64)>, rhs: f64) -> Self {
    Self { coeffs, rhs }
  }
}

/// Offsets of each variable block.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Layout {
  pub n_assets: usize,
  pub turnover: Option<usize>,
  pub var: Option<usize>,
  pub shortfall: Option<usize>,
  pub n_vars: usize,
}

impl Layout {
  fn new(n_assets: usize, n_scenarios: usize, constraints: &Constraints) -> Self {
    let mut next = n_assets;
    let turnover = constraints.turnover.as_ref().map(|_| {
      let at = next;
      next += n_assets;
      at
    });
    let (var, shortfall) = match constraints.cvar {
      Some(_) => {
        let z = next;
        let u = next + 1;
        next += 1 + n_scenarios;
        (Some(z), Some(u))
      }
      None => (None, None),
    };

    Self {
      n_assets,
      turnover,
      var,
      shortfall,
      n_vars: next,
    }
  }
}

/// The program split by cone: equalities, inequalities (`Ax ≤ b`) and an
/// optional second-order cone block.
#[derive(Clone, Debug)]
pub(crate) struct ConicProgram {
  pub layout: Layout,
  pub q: Vec<f64>,
  pub zero: Vec<Row>,
  pub nonneg: Vec<Row>,
  pub soc: Vec<Row>,
}

impl ConicProgram {
  /// `factor` is the lower Cholesky factor of the covariance and is required
  /// when a volatility cap is present.
  pub fn build(
    risk: &RiskModel,
    scenarios: ArrayView2<f64>,
    constraints: &Constraints,
    factor: Option<&Array2<f64>>,
  ) -> Self {
    let n = risk.n_assets();
    let t = scenarios.nrows();
    let layout = Layout::new(n, t, constraints);

    let mut q = vec![0.0; layout.n_vars];
    for (i, mu) in risk.expected_returns.iter().enumerate() {
      q[i] = -mu;
    }

    let mut zero = Vec::new();
    let mut nonneg = Vec::new();
    let mut soc = Vec::new();

    let all: Vec<(usize, f64)> = (0..n).map(|i| (i, 1.0)).collect();
    match constraints.budget {
      Budget::FullyInvested => zero.push(Row::new(all, 1.0)),
      Budget::AllowCash => nonneg.push(Row::new(all, 1.0)),
    }

    for i in 0..n {
      nonneg.push(Row::new(vec![(i, -1.0)], -constraints.lower[i]));
      nonneg.push(Row::new(vec![(i, 1.0)], constraints.upper[i]));
    }

    if let Some(carbon) = &constraints.carbon {
      // average over holdings: Σ cᵢwᵢ ≤ cap·Σ wᵢ, which is Σ cᵢwᵢ ≤ cap when fully invested
      let row = match constraints.budget {
        Budget::FullyInvested => {
          let coeffs = carbon.intensities.iter().copied().enumerate().collect();
          Row::new(coeffs, carbon.cap)
        }
        Budget::AllowCash => {
          let coeffs = carbon
            .intensities
            .iter()
            .enumerate()
            .map(|(i, &c)| (i, c - carbon.cap))
            .collect();
          Row::new(coeffs, 0.0)
        }
      };
      nonneg.push(row);
    }

    for sector in &constraints.sectors {
      let coeffs = sector.members.iter().map(|&i| (i, 1.0)).collect();
      nonneg.push(Row::new(coeffs, sector.cap));
    }

    if let (Some(turnover), Some(d)) = (&constraints.turnover, layout.turnover) {
      for i in 0..n {
        let r = turnover.reference[i];
        nonneg.push(Row::new(vec![(i, 1.0), (d + i, -1.0)], r));
        nonneg.push(Row::new(vec![(i, -1.0), (d + i, -1.0)], -r));
      }
      let slacks = (0..n).map(|i| (d + i, 1.0)).collect();
      nonneg.push(Row::new(slacks, turnover.cap));
    }

    if let (Some(cvar), Some(z), Some(u)) = (&constraints.cvar, layout.var, layout.shortfall) {
      // u_t ≥ -r_tᵀw - z and u_t ≥ 0
      for (s, row) in scenarios.rows().into_iter().enumerate() {
        let mut coeffs: Vec<(usize, f64)> = row
          .iter()
          .enumerate()
          .filter(|(_, r)| **r != 0.0)
          .map(|(i, &r)| (i, -r))
          .collect();
        coeffs.push((z, -1.0));
        coeffs.push((u + s, -1.0));
        nonneg.push(Row::new(coeffs, 0.0));
        nonneg.push(Row::new(vec![(u + s, -1.0)], 0.0));
      }

      let tail = tail::tail_size(cvar.confidence, t);
      let mut coeffs = vec![(z, 1.0)];
      coeffs.extend((0..t).map(|s| (u + s, 1.0 / tail)));
      nonneg.push(Row::new(coeffs, cvar.cap));
    }

    if let (Some(cap), Some(l)) = (constraints.volatility, factor) {
      // (cap, Lᵀw) ∈ Q: the slack is b - Ax, so the Lᵀ rows enter negated
      soc.push(Row::new(Vec::new(), cap));
      for k in 0..n {
        let coeffs = (0..n)
          .map(|i| (i, -l[[i, k]]))
          .filter(|(_, v)| *v != 0.0)
          .collect();
        soc.push(Row::new(coeffs, 0.0));
      }
    }

    Self {
      layout,
      q,
      zero,
      nonneg,
      soc,
    }
  }

  pub fn n_rows(&self) -> usize {
    self.zero.len() + self.nonneg.len() + self.soc.len()
  }

  /// Stack the rows (zero, then non-negative, then SOC) into CSC arrays
  /// `(colptr, rowval, nzval)` and the right-hand side.
  pub fn to_csc(&self) -> (Vec<usize>, Vec<usize>, Vec<f64>, Vec<f64>) {
    let mut triplets: Vec<(usize, usize, f64)> = Vec::new();
    let mut b = Vec::with_capacity(self.n_rows());

    let rows = self.zero.iter().chain(&self.nonneg).chain(&self.soc);
    for (r, row) in rows.enumerate() {
      for &(col, val) in &row.coeffs {
        if val != 0.0 {
          triplets.push((col, r, val));
        }
      }
      b.push(row.rhs);
    }

    triplets.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut colptr = vec![0usize; self.layout.n_vars + 1];
    for &(col, _, _) in &triplets {
      colptr[col + 1] += 1;
    }
    for j in 0..self.layout.n_vars {
      colptr[j + 1] += colptr[j];
    }
    let rowval = triplets.iter().map(|&(_, r, _)| r).collect();
    let nzval = triplets.iter().map(|&(_, _, v)| v).collect();

    (colptr, rowval, nzval, b)
  }
}
