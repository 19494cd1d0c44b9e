//! Recipe: the subject the pipeline creates asynchronously.
//!
//! A recipe row is a placeholder from the moment a creation is reserved. Its
//! generated content is committed in one piece once every generation branch
//! has succeeded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

// ─── Status ──────────────────────────────────────────────────────────────────

/// Lifecycle status of a recipe.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RecipeStatus {
  Ready,
  InProgress,
  Completed,
  Failed,
  Banned,
}

impl RecipeStatus {
  /// A closed recipe accepts no further history attachments.
  pub fn is_closed(self) -> bool { matches!(self, Self::Failed | Self::Banned) }
}

// ─── Subject ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
  pub recipe_id:   Uuid,
  pub status:      RecipeStatus,
  /// Credits charged to each user who attaches; fixed at creation.
  pub credit_cost: i64,
  /// Normalized source URL.
  pub video_url:   String,
  pub video_id:    String,
  pub created_at:  DateTime<Utc>,
  pub updated_at:  DateTime<Utc>,
}

// ─── Generated content ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ingredient {
  pub name:   String,
  pub amount: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetailMeta {
  pub description:  String,
  pub servings:     Option<u32>,
  pub cook_minutes: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeStep {
  pub order:      u32,
  pub text:       String,
  /// Offset into the source video where this step is shown.
  pub start_secs: Option<f64>,
}

/// Everything the generation branches produce for one recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeContent {
  pub ingredients: Vec<Ingredient>,
  pub tags:        Vec<String>,
  pub meta:        DetailMeta,
  pub steps:       Vec<RecipeStep>,
  pub briefing:    Vec<String>,
}
