//! # Report
//!
//! $$
//! (\mathbf w^\star, \text{metrics}) \to \text{text}
//! $$
//!
//! Plain-text rendering of single results and sweep tables. A run that did
//! not reach an optimum renders as a banner naming its status.

use prettytable::format;
use prettytable::row;
use prettytable::Cell;
use prettytable::Row;
use prettytable::Table;

use crate::metrics::PortfolioMetrics;
use crate::optimizer::OptimizationResult;
use crate::optimizer::OptimizationStatus;
use crate::scenario::ScenarioTable;

fn banner(status: OptimizationStatus) -> String {
  let text = match status {
    OptimizationStatus::Infeasible => "INFEASIBLE: no portfolio satisfies every constraint",
    OptimizationStatus::NumericalError => {
      "NUMERICAL_ERROR: the solver could not reach a reliable optimum"
    }
    OptimizationStatus::Optimal => "OPTIMAL",
  };
  let rule = "=".repeat(text.len() + 4);
  format!("{rule}\n| {text} |\n{rule}\n")
}

fn pct(x: f64) -> String {
  format!("{:.2}%", 100.0 * x)
}

fn cap(x: Option<f64>) -> String {
  x.map_or_else(|| "-".to_string(), |v| format!("{v:.4}"))
}

fn metrics_table(m: &PortfolioMetrics) -> Table {
  let mut table = Table::new();
  table.set_format(*format::consts::FORMAT_NO_LINESEP_WITH_TITLE);
  table.set_titles(row!["Metric", "Value"]);
  table.add_row(row!["Expected return", pct(m.expected_return)]);
  table.add_row(row!["Compounded return", pct(m.compounded_return)]);
  table.add_row(row!["Volatility", pct(m.volatility)]);
  table.add_row(row![
    format!("CVaR ({:.0}%)", 100.0 * m.cvar_confidence),
    pct(m.cvar)
  ]);
  table.add_row(row!["Max drawdown", pct(m.max_drawdown)]);
  if let (Some(peak), Some(trough)) = (m.drawdown.peak, m.drawdown.trough) {
    table.add_row(row!["Drawdown window", format!("{peak} -> {trough}")]);
  }
  table.add_row(row!["Carbon intensity", format!("{:.2}", m.carbon_intensity)]);
  if let Some(t) = m.turnover {
    table.add_row(row!["Turnover", format!("{t:.4}")]);
  }
  for (sector, exposure) in &m.sector_exposure {
    table.add_row(row![format!("Sector {sector}"), pct(*exposure)]);
  }
  table
}

/// Weights and metrics of one optimization, or its status banner.
pub fn render_result(result: &OptimizationResult) -> String {
  let (Some(weights), Some(metrics)) = (&result.weights, &result.metrics) else {
    return banner(result.status);
  };

  let mut out = format!("Status: {}\n\n", result.status);

  let mut table = Table::new();
  table.set_format(*format::consts::FORMAT_NO_LINESEP_WITH_TITLE);
  table.set_titles(row!["Ticker", "Weight"]);
  for (ticker, w) in result.tickers.iter().zip(weights) {
    table.add_row(row![ticker, format!("{w:.4}")]);
  }
  out.push_str(&table.to_string());
  out.push('\n');
  out.push_str(&metrics_table(metrics).to_string());

  if result.diagnostics.regularized {
    out.push_str("\nnote: solved on a regularized covariance\n");
  }
  out
}

/// One line per grid point; non-optimal points show their status in place of
/// metrics.
pub fn render_sweep(table: &ScenarioTable) -> String {
  let mut out = Table::new();
  out.set_format(*format::consts::FORMAT_NO_LINESEP_WITH_TITLE);

  let mut titles = vec![
    Cell::new("Carbon cap"),
    Cell::new("CVaR cap"),
    Cell::new("Turnover cap"),
    Cell::new("Status"),
    Cell::new("Return"),
    Cell::new("Volatility"),
    Cell::new("CVaR"),
    Cell::new("Carbon"),
  ];
  titles.extend(table.tickers.iter().map(|t| Cell::new(t)));
  out.set_titles(Row::new(titles));

  for r in &table.rows {
    let mut cells = vec![
      Cell::new(&cap(r.point.carbon_cap)),
      Cell::new(&cap(r.point.cvar_cap)),
      Cell::new(&cap(r.point.turnover_cap)),
      Cell::new(&r.status.to_string()),
    ];
    match (&r.metrics, &r.weights) {
      (Some(m), Some(w)) => {
        cells.push(Cell::new(&pct(m.expected_return)));
        cells.push(Cell::new(&pct(m.volatility)));
        cells.push(Cell::new(&pct(m.cvar)));
        cells.push(Cell::new(&format!("{:.2}", m.carbon_intensity)));
        cells.extend(w.iter().map(|x| Cell::new(&format!("{x:.4}"))));
      }
      _ => {
        cells.extend((0..4 + table.tickers.len()).map(|_| Cell::new("-")));
      }
    }
    out.add_row(Row::new(cells));
  }

  let frontier = table.frontier().count();
  format!(
    "{out}\n{frontier} of {} grid points reached an optimum\n",
    table.len()
  )
}
