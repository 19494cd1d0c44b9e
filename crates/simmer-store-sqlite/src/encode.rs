//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings (microsecond
//! precision, `Z` suffix) so they sort lexicographically. Enums use their
//! snake_case names. UUIDs are stored as hyphenated lowercase strings.

use chrono::{DateTime, SecondsFormat, SubsecRound as _, Utc};
use simmer_core::{
  history::HistoryEntry,
  progress::{ProgressDetail, ProgressEntry, ProgressStep},
  recipe::{Recipe, RecipeContent, RecipeStatus},
  source::SourceMetadata,
  store::Reservation,
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ────────────────────────────────────────────────────────────

/// The current time at the precision stored in the database.
pub fn now() -> DateTime<Utc> { Utc::now().trunc_subsecs(6) }

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Enums ────────────────────────────────────────────────────────────────────

pub fn encode_status(status: RecipeStatus) -> String { status.to_string() }

pub fn decode_status(s: &str) -> Result<RecipeStatus> {
  s.parse()
    .map_err(|_| simmer_core::Error::UnknownStatus(s.to_owned()).into())
}

pub fn decode_step(s: &str) -> Result<ProgressStep> {
  s.parse()
    .map_err(|_| simmer_core::Error::UnknownStep(s.to_owned()).into())
}

pub fn decode_detail(s: &str) -> Result<ProgressDetail> {
  s.parse()
    .map_err(|_| simmer_core::Error::UnknownDetail(s.to_owned()).into())
}

// ─── Raw row types ───────────────────────────────────────────────────────────

/// Raw column values for a `recipes` row, before decoding.
pub struct RawRecipe {
  pub recipe_id:   String,
  pub status:      String,
  pub credit_cost: i64,
  pub video_url:   String,
  pub video_id:    String,
  pub created_at:  String,
  pub updated_at:  String,
}

pub const RECIPE_COLUMNS: &str =
  "recipe_id, status, credit_cost, video_url, video_id, created_at, updated_at";

impl RawRecipe {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      recipe_id:   row.get(0)?,
      status:      row.get(1)?,
      credit_cost: row.get(2)?,
      video_url:   row.get(3)?,
      video_id:    row.get(4)?,
      created_at:  row.get(5)?,
      updated_at:  row.get(6)?,
    })
  }

  pub fn into_recipe(self) -> Result<Recipe> {
    Ok(Recipe {
      recipe_id:   decode_uuid(&self.recipe_id)?,
      status:      decode_status(&self.status)?,
      credit_cost: self.credit_cost,
      video_url:   self.video_url,
      video_id:    self.video_id,
      created_at:  decode_dt(&self.created_at)?,
      updated_at:  decode_dt(&self.updated_at)?,
    })
  }
}

pub struct RawSource {
  pub metadata_id: String,
  pub recipe_id:   String,
  pub video_url:   String,
  pub video_id:    String,
  pub banned:      bool,
  pub created_at:  String,
}

pub const SOURCE_COLUMNS: &str =
  "metadata_id, recipe_id, video_url, video_id, banned, created_at";

impl RawSource {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      metadata_id: row.get(0)?,
      recipe_id:   row.get(1)?,
      video_url:   row.get(2)?,
      video_id:    row.get(3)?,
      banned:      row.get(4)?,
      created_at:  row.get(5)?,
    })
  }

  pub fn into_source(self) -> Result<SourceMetadata> {
    Ok(SourceMetadata {
      metadata_id: decode_uuid(&self.metadata_id)?,
      recipe_id:   decode_uuid(&self.recipe_id)?,
      video_url:   self.video_url,
      video_id:    self.video_id,
      banned:      self.banned,
      created_at:  decode_dt(&self.created_at)?,
    })
  }
}

pub struct RawHistory {
  pub history_id: String,
  pub user_id:    String,
  pub recipe_id:  String,
  pub credit:     i64,
  pub billed:     bool,
  pub created_at: String,
}

pub const HISTORY_COLUMNS: &str = "history_id, user_id, recipe_id, credit, billed, created_at";

impl RawHistory {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      history_id: row.get(0)?,
      user_id:    row.get(1)?,
      recipe_id:  row.get(2)?,
      credit:     row.get(3)?,
      billed:     row.get(4)?,
      created_at: row.get(5)?,
    })
  }

  pub fn into_entry(self) -> Result<HistoryEntry> {
    Ok(HistoryEntry {
      history_id: decode_uuid(&self.history_id)?,
      user_id:    decode_uuid(&self.user_id)?,
      recipe_id:  decode_uuid(&self.recipe_id)?,
      credit:     self.credit,
      billed:     self.billed,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

pub struct RawProgress {
  pub sequence:    i64,
  pub recipe_id:   String,
  pub step:        String,
  pub detail:      String,
  pub recorded_at: String,
}

impl RawProgress {
  pub fn into_entry(self) -> Result<ProgressEntry> {
    Ok(ProgressEntry {
      sequence:    self.sequence,
      recipe_id:   decode_uuid(&self.recipe_id)?,
      step:        decode_step(&self.step)?,
      detail:      decode_detail(&self.detail)?,
      recorded_at: decode_dt(&self.recorded_at)?,
    })
  }
}

pub struct RawReservation {
  pub video_url:   String,
  pub recipe_id:   String,
  pub reserved_at: String,
}

impl RawReservation {
  pub fn into_reservation(self) -> Result<Reservation> {
    Ok(Reservation {
      video_url:   self.video_url,
      recipe_id:   decode_uuid(&self.recipe_id)?,
      reserved_at: decode_dt(&self.reserved_at)?,
    })
  }
}

/// JSON columns of a `recipe_contents` row.
pub struct RawContent {
  pub ingredients: String,
  pub tags:        String,
  pub meta:        String,
  pub steps:       String,
  pub briefing:    String,
}

impl RawContent {
  pub fn encode(content: &RecipeContent) -> Result<Self> {
    Ok(Self {
      ingredients: serde_json::to_string(&content.ingredients)?,
      tags:        serde_json::to_string(&content.tags)?,
      meta:        serde_json::to_string(&content.meta)?,
      steps:       serde_json::to_string(&content.steps)?,
      briefing:    serde_json::to_string(&content.briefing)?,
    })
  }

  pub fn into_content(self) -> Result<RecipeContent> {
    Ok(RecipeContent {
      ingredients: serde_json::from_str(&self.ingredients)?,
      tags:        serde_json::from_str(&self.tags)?,
      meta:        serde_json::from_str(&self.meta)?,
      steps:       serde_json::from_str(&self.steps)?,
      briefing:    serde_json::from_str(&self.briefing)?,
    })
  }
}

/// True for PRIMARY KEY and UNIQUE violations; foreign-key and CHECK
/// failures are not conflicts.
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
  matches!(
    err,
    rusqlite::Error::SqliteFailure(e, _)
      if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn timestamps_sort_lexicographically() {
    let early = DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
      .unwrap()
      .with_timezone(&Utc);
    let late = early + chrono::Duration::microseconds(1_500_000);
    assert!(encode_dt(early) < encode_dt(late));
    assert_eq!(decode_dt(&encode_dt(late)).unwrap(), late);
  }

  #[test]
  fn unknown_status_is_a_core_error() {
    let err = decode_status("simmering").unwrap_err();
    assert!(matches!(err, Error::Core(simmer_core::Error::UnknownStatus(_))));
  }
}
