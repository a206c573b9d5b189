//! # Errors
//!
//! $$
//! \text{input} \to \text{Data} \mid \text{Configuration} \mid \text{Parameter}
//! $$
//!
//! Failure taxonomy of the optimization kernel. Solver outcomes such as
//! infeasibility are not errors; they travel inside
//! [`OptimizationResult`](crate::optimizer::OptimizationResult).

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, PortfolioError>;

#[derive(Debug, Error)]
pub enum PortfolioError {
  /// Malformed or misaligned input tables.
  #[error("data error: {0}")]
  Data(String),

  /// Invalid or contradictory threshold values.
  #[error("configuration error: {field}: {reason}")]
  Configuration { field: String, reason: String },

  /// Invalid numeric parameter passed to a single call.
  #[error("parameter error: {name}: {reason}")]
  Parameter { name: String, reason: String },

  #[error("i/o error: {0}")]
  Io(#[from] std::io::Error),
}

impl PortfolioError {
  pub(crate) fn data(msg: impl Into<String>) -> Self {
    PortfolioError::Data(msg.into())
  }

  pub(crate) fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
    PortfolioError::Configuration {
      field: field.into(),
      reason: reason.into(),
    }
  }

  pub(crate) fn param(name: impl Into<String>, reason: impl Into<String>) -> Self {
    PortfolioError::Parameter {
      name: name.into(),
      reason: reason.into(),
    }
  }
}

impl From<csv::Error> for PortfolioError {
  fn from(e: csv::Error) -> Self {
    PortfolioError::Data(e.to_string())
  }
}

impl From<serde_json::Error> for PortfolioError {
  fn from(e: serde_json::Error) -> Self {
    PortfolioError::config("config", e.to_string())
  }
}
