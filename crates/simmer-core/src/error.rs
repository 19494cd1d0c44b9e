//! Error types for `simmer-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid video url {url:?}: {reason}")]
  InvalidUrl { url: String, reason: String },

  #[error("unsupported url scheme: {0:?}")]
  UnsupportedScheme(String),

  #[error("unknown recipe status: {0:?}")]
  UnknownStatus(String),

  #[error("unknown progress step: {0:?}")]
  UnknownStep(String),

  #[error("unknown progress detail: {0:?}")]
  UnknownDetail(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
