//! History entries: a user's billable attachment to a recipe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One row per (user, recipe). `credit` is what the user owes; `billed` is
/// set once the ledger has actually taken it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
  pub history_id: Uuid,
  pub user_id:    Uuid,
  pub recipe_id:  Uuid,
  pub credit:     i64,
  pub billed:     bool,
  pub created_at: DateTime<Utc>,
}

impl HistoryEntry {
  /// Whether recovery owes this user a refund.
  pub fn refundable(&self) -> bool { self.billed && self.credit > 0 }
}

/// Result of trying to attach a user to a recipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachOutcome {
  /// A new history row was written; the user should be billed.
  Inserted(HistoryEntry),
  /// The user already had a row for this recipe; nothing to bill.
  AlreadyAttached,
  /// The recipe is failed or banned and accepts no new attachments.
  Closed,
}
