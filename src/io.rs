//! # Table I/O
//!
//! $$
//! \text{csv} \to (R, c)
//! $$
//!
//! Readers for the two persisted inputs: the returns table and the carbon
//! intensity table.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::NaiveDate;
use chrono::NaiveDateTime;
use ndarray::Array2;

use crate::error::PortfolioError;
use crate::error::Result;
use crate::universe::CarbonTable;
use crate::universe::ReturnsMatrix;

fn parse_date(raw: &str) -> Result<NaiveDate> {
  let raw = raw.trim();
  NaiveDate::parse_from_str(raw, "%Y-%m-%d")
    .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|dt| dt.date()))
    .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S").map(|dt| dt.date()))
    .map_err(|_| PortfolioError::data(format!("unparseable date {raw:?}")))
}

fn parse_value(raw: &str, what: &str) -> Result<f64> {
  raw
    .trim()
    .parse::<f64>()
    .map_err(|_| PortfolioError::data(format!("unparseable {what} {raw:?}")))
}

/// Read a returns table: first column dates, remaining columns one ticker each.
pub fn read_returns<R: Read>(reader: R) -> Result<ReturnsMatrix> {
  let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
  let headers = rdr.headers()?.clone();
  if headers.len() < 2 {
    return Err(PortfolioError::data(
      "returns table needs a date column and at least one ticker column",
    ));
  }
  let tickers: Vec<String> = headers.iter().skip(1).map(|h| h.trim().to_string()).collect();
  let n = tickers.len();

  let mut dates = Vec::new();
  let mut flat = Vec::new();
  for (line, record) in rdr.records().enumerate() {
    let record = record?;
    if record.len() != n + 1 {
      return Err(PortfolioError::data(format!(
        "row {} has {} cells, expected {}",
        line + 1,
        record.len(),
        n + 1
      )));
    }
    dates.push(parse_date(&record[0])?);
    for cell in record.iter().skip(1) {
      if cell.trim().is_empty() {
        return Err(PortfolioError::data(format!(
          "missing return on row {}; gaps must be resolved upstream",
          line + 1
        )));
      }
      flat.push(parse_value(cell, "return")?);
    }
  }

  let values = Array2::from_shape_vec((dates.len(), n), flat)
    .map_err(|e| PortfolioError::data(e.to_string()))?;
  ReturnsMatrix::new(dates, tickers, values)
}

/// Read a carbon table: one row per ticker, one numeric column.
pub fn read_carbon<R: Read>(reader: R) -> Result<CarbonTable> {
  let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
  let headers = rdr.headers()?.clone();
  if headers.len() != 2 {
    return Err(PortfolioError::data(format!(
      "carbon table must contain a single value column, found {}",
      headers.len().saturating_sub(1)
    )));
  }

  let mut entries = Vec::new();
  for record in rdr.records() {
    let record = record?;
    let ticker = record[0].trim().to_string();
    let value = parse_value(&record[1], "carbon intensity")?;
    entries.push((ticker, value));
  }

  Ok(CarbonTable { entries })
}

pub fn read_returns_file(path: impl AsRef<Path>) -> Result<ReturnsMatrix> {
  read_returns(File::open(path)?)
}

pub fn read_carbon_file(path: impl AsRef<Path>) -> Result<CarbonTable> {
  read_carbon(File::open(path)?)
}
