//! Error type for `simmer-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] simmer_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("recipe not found: {0}")]
  RecipeNotFound(uuid::Uuid),

  #[error("user {user_id} has {balance} credits, {requested} requested")]
  InsufficientCredit {
    user_id:   uuid::Uuid,
    balance:   i64,
    requested: i64,
  },

  /// Credit amounts must be strictly positive.
  #[error("invalid credit amount: {0}")]
  InvalidAmount(i64),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
