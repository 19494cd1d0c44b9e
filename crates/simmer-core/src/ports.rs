//! External collaborators the pipeline calls: the caption service, the
//! generation service and the credit ledger.

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::recipe::{DetailMeta, Ingredient, RecipeStep};

// ─── Captions ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caption {
  pub text:     String,
  pub language: Option<String>,
}

#[derive(Debug, Clone, Error)]
pub enum CaptionError {
  /// The video was readable but is not a recipe.
  #[error("source is not a recipe: {0}")]
  NotARecipe(String),

  #[error("caption fetch failed: {0}")]
  FetchFailed(String),
}

pub trait CaptionClient: Send + Sync {
  fn fetch<'a>(
    &'a self,
    video_id: &'a str,
  ) -> impl Future<Output = Result<Caption, CaptionError>> + Send + 'a;
}

// ─── Generation ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Error)]
pub enum GenerationError {
  #[error("generation request failed: {0}")]
  Request(String),

  #[error("generation response was unusable: {0}")]
  InvalidResponse(String),
}

/// Structured generation from a caption. Every method is independently
/// failable; the pipeline calls them concurrently.
pub trait GenerationClient: Send + Sync {
  fn ingredients<'a>(
    &'a self,
    video_id: &'a str,
    caption: &'a Caption,
  ) -> impl Future<Output = Result<Vec<Ingredient>, GenerationError>> + Send + 'a;

  fn tags<'a>(
    &'a self,
    video_id: &'a str,
    caption: &'a Caption,
  ) -> impl Future<Output = Result<Vec<String>, GenerationError>> + Send + 'a;

  fn detail_meta<'a>(
    &'a self,
    video_id: &'a str,
    caption: &'a Caption,
  ) -> impl Future<Output = Result<DetailMeta, GenerationError>> + Send + 'a;

  fn steps<'a>(
    &'a self,
    video_id: &'a str,
    caption: &'a Caption,
  ) -> impl Future<Output = Result<Vec<RecipeStep>, GenerationError>> + Send + 'a;

  fn briefing<'a>(
    &'a self,
    video_id: &'a str,
    caption: &'a Caption,
  ) -> impl Future<Output = Result<Vec<String>, GenerationError>> + Send + 'a;
}

// ─── Credits ─────────────────────────────────────────────────────────────────

/// The credit ledger. `spend` and `refund` are compensating pairs keyed by
/// (user, recipe).
pub trait CreditLedger: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn spend(
    &self,
    user_id: Uuid,
    recipe_id: Uuid,
    amount: i64,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn refund(
    &self,
    user_id: Uuid,
    recipe_id: Uuid,
    amount: i64,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}
