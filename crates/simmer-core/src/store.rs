//! The `RecipeStore` trait and its outcome types.
//!
//! The trait is implemented by storage backends (e.g. `simmer-store-sqlite`).
//! The pipeline depends on this abstraction, not on any concrete backend.
//!
//! Reservations are backed by a uniqueness constraint in the store rather than
//! an in-process lock: creation requests for the same URL may arrive on
//! different processes sharing one database.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  history::{AttachOutcome, HistoryEntry},
  progress::{ProgressDetail, ProgressEntry, ProgressStep},
  recipe::{Recipe, RecipeContent, RecipeStatus},
  source::{SourceMetadata, VideoUrl},
};

// ─── Outcome types ───────────────────────────────────────────────────────────

/// An active identify reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
  pub video_url:   String,
  pub recipe_id:   Uuid,
  pub reserved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveOutcome {
  Acquired(Reservation),
  /// Another creation holds the URL. `holder` is `None` if the competing
  /// reservation disappeared before it could be read back.
  AlreadyReserved { holder: Option<Uuid> },
}

#[derive(Debug, Clone)]
pub enum CreateOutcome {
  /// Recipe, reservation and source metadata were written together.
  Created(Recipe),
  /// A concurrent creation owns the reservation; nothing was written.
  AlreadyReserved,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a recipe-creation store backend.
///
/// Progress entries are append-only. History rows are the only records ever
/// deleted, and only by recovery. Recipes are never deleted.
pub trait RecipeStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Creation ──────────────────────────────────────────────────────────

  /// Atomically insert a `Ready` recipe, its identify reservation and a
  /// source-metadata row. Returns [`CreateOutcome::AlreadyReserved`] with no
  /// partial state if the URL is already reserved.
  fn create_with_reservation<'a>(
    &'a self,
    source: &'a VideoUrl,
    credit_cost: i64,
  ) -> impl Future<Output = Result<CreateOutcome, Self::Error>> + Send + 'a;

  // ── Identify reservations ─────────────────────────────────────────────

  /// Reserve `video_url` for `recipe_id` by inserting against the unique key.
  fn reserve<'a>(
    &'a self,
    video_url: &'a str,
    recipe_id: Uuid,
  ) -> impl Future<Output = Result<ReserveOutcome, Self::Error>> + Send + 'a;

  /// Remove the reservation for `video_url` if it still points at
  /// `recipe_id`. Returns whether a row was removed; never errors on absence.
  fn release<'a>(
    &'a self,
    video_url: &'a str,
    recipe_id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  fn reservation<'a>(
    &'a self,
    video_url: &'a str,
  ) -> impl Future<Output = Result<Option<Reservation>, Self::Error>> + Send + 'a;

  /// Reservations taken before `cutoff`, oldest first.
  fn stale_reservations(
    &self,
    cutoff: DateTime<Utc>,
  ) -> impl Future<Output = Result<Vec<Reservation>, Self::Error>> + Send + '_;

  // ── Recipes ───────────────────────────────────────────────────────────

  fn get_recipe(
    &self,
    recipe_id: Uuid,
  ) -> impl Future<Output = Result<Option<Recipe>, Self::Error>> + Send + '_;

  /// Every recipe ever created for a URL, oldest first.
  fn recipes_for_url<'a>(
    &'a self,
    video_url: &'a str,
  ) -> impl Future<Output = Result<Vec<Recipe>, Self::Error>> + Send + 'a;

  /// Move an open (`Ready` or `InProgress`) recipe to `status`. Returns
  /// `false` and leaves the row alone if the recipe is already terminal.
  fn set_status(
    &self,
    recipe_id: Uuid,
    status: RecipeStatus,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Mark an open recipe `Banned` and ban its source metadata, in one
  /// transaction. Returns `false` without writing if the recipe is terminal.
  fn ban(
    &self,
    recipe_id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Write the generated content and mark the recipe `Completed`, in one
  /// transaction. Content for the recipe is overwritten if present.
  ///
  /// Returns `false` and writes nothing if the recipe was already closed,
  /// e.g. by recovery of an abandoned run.
  fn complete(
    &self,
    recipe_id: Uuid,
    content: RecipeContent,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  fn get_content(
    &self,
    recipe_id: Uuid,
  ) -> impl Future<Output = Result<Option<RecipeContent>, Self::Error>> + Send + '_;

  // ── Source metadata ───────────────────────────────────────────────────

  /// The most recent metadata row for a URL, banned or not.
  fn latest_source<'a>(
    &'a self,
    video_url: &'a str,
  ) -> impl Future<Output = Result<Option<SourceMetadata>, Self::Error>> + Send + 'a;

  // ── History ───────────────────────────────────────────────────────────

  /// Attach `user_id` to `recipe_id` at `credit`. Never attaches to a recipe
  /// that is failed or banned.
  fn attach_history(
    &self,
    user_id: Uuid,
    recipe_id: Uuid,
    credit: i64,
  ) -> impl Future<Output = Result<AttachOutcome, Self::Error>> + Send + '_;

  /// Flag the user's row as charged. Returns `false` if the row is gone,
  /// meaning recovery took it before the charge landed.
  fn mark_billed(
    &self,
    user_id: Uuid,
    recipe_id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Remove a single user's row; returns it if one existed.
  fn detach_history(
    &self,
    user_id: Uuid,
    recipe_id: Uuid,
  ) -> impl Future<Output = Result<Option<HistoryEntry>, Self::Error>> + Send + '_;

  /// Delete and return every history row for the recipe.
  fn take_history(
    &self,
    recipe_id: Uuid,
  ) -> impl Future<Output = Result<Vec<HistoryEntry>, Self::Error>> + Send + '_;

  fn list_history(
    &self,
    recipe_id: Uuid,
  ) -> impl Future<Output = Result<Vec<HistoryEntry>, Self::Error>> + Send + '_;

  // ── Progress ──────────────────────────────────────────────────────────

  /// Append an entry. Returns `None` and appends nothing once the recipe's
  /// log already holds a `Finished` entry.
  fn append_progress(
    &self,
    recipe_id: Uuid,
    step: ProgressStep,
    detail: ProgressDetail,
  ) -> impl Future<Output = Result<Option<ProgressEntry>, Self::Error>> + Send + '_;

  /// All entries for the recipe in append order.
  fn list_progress(
    &self,
    recipe_id: Uuid,
  ) -> impl Future<Output = Result<Vec<ProgressEntry>, Self::Error>> + Send + '_;
}
