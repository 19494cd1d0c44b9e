//! [`SqliteStore`]: the SQLite implementation of [`RecipeStore`].

use std::{path::Path, time::Duration};

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension as _, TransactionBehavior};
use uuid::Uuid;

use simmer_core::{
  history::{AttachOutcome, HistoryEntry},
  progress::{ProgressDetail, ProgressEntry, ProgressStep},
  recipe::{Recipe, RecipeContent, RecipeStatus},
  source::{SourceMetadata, VideoUrl},
  store::{CreateOutcome, RecipeStore, Reservation, ReserveOutcome},
};

use crate::{
  encode::{
    decode_uuid, encode_dt, now, encode_status, encode_uuid, is_unique_violation, RawContent,
    RawHistory, RawProgress, RawRecipe, RawReservation, RawSource,
    HISTORY_COLUMNS, RECIPE_COLUMNS, SOURCE_COLUMNS,
  },
  schema::SCHEMA,
  Error, Result,
};

/// How long a connection waits on another process's write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// ─── Store ───────────────────────────────────────────────────────────────────

/// A recipe store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  pub(crate) conn: tokio_rusqlite::Connection,
}

/// What happened to a `reserve` insert, before decoding.
enum ReserveRow {
  Inserted,
  Held(Option<String>),
}

/// What a guarded status `UPDATE` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
  Applied,
  /// The recipe exists but is already completed, failed or banned.
  Terminal,
  Missing,
}

/// Move an open recipe to `status`. Terminal recipes are left untouched.
fn transition(
  conn: &rusqlite::Connection,
  id_str: &str,
  status: RecipeStatus,
  at_str: &str,
) -> rusqlite::Result<Transition> {
  let changed = conn.execute(
    "UPDATE recipes SET status = ?1, updated_at = ?2
     WHERE recipe_id = ?3 AND status IN (?4, ?5)",
    rusqlite::params![
      encode_status(status),
      at_str,
      id_str,
      encode_status(RecipeStatus::Ready),
      encode_status(RecipeStatus::InProgress),
    ],
  )?;
  if changed > 0 {
    return Ok(Transition::Applied);
  }
  let exists = conn
    .query_row("SELECT 1 FROM recipes WHERE recipe_id = ?1", rusqlite::params![id_str], |_| Ok(()))
    .optional()?
    .is_some();
  Ok(if exists { Transition::Terminal } else { Transition::Missing })
}

impl Transition {
  fn applied(self, recipe_id: Uuid) -> Result<bool> {
    match self {
      Self::Applied  => Ok(true),
      Self::Terminal => Ok(false),
      Self::Missing  => Err(Error::RecipeNotFound(recipe_id)),
    }
  }
}

/// What happened to an `attach_history` call, before decoding.
enum AttachRow {
  Missing,
  Closed,
  AlreadyAttached,
  Inserted,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, mostly for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── RecipeStore impl ────────────────────────────────────────────────────────

impl RecipeStore for SqliteStore {
  type Error = Error;

  // ── Creation ──────────────────────────────────────────────────────────────

  async fn create_with_reservation(
    &self,
    source:      &VideoUrl,
    credit_cost: i64,
  ) -> Result<CreateOutcome> {
    let now = now();
    let recipe = Recipe {
      recipe_id: Uuid::new_v4(),
      status: RecipeStatus::Ready,
      credit_cost,
      video_url: source.as_str().to_owned(),
      video_id: source.video_id().to_owned(),
      created_at: now,
      updated_at: now,
    };

    let id_str       = encode_uuid(recipe.recipe_id);
    let meta_id_str  = encode_uuid(Uuid::new_v4());
    let status_str   = encode_status(recipe.status);
    let url          = recipe.video_url.clone();
    let video_id     = recipe.video_id.clone();
    let at_str       = encode_dt(now);

    let created = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
          "INSERT INTO recipes (
             recipe_id, status, credit_cost, video_url, video_id, created_at, updated_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
          rusqlite::params![id_str, status_str, credit_cost, url, video_id, at_str],
        )?;

        // Dropping `tx` on conflict rolls back the recipe insert.
        match tx.execute(
          "INSERT INTO identify_reservations (video_url, recipe_id, reserved_at)
           VALUES (?1, ?2, ?3)",
          rusqlite::params![url, id_str, at_str],
        ) {
          Ok(_) => {}
          Err(e) if is_unique_violation(&e) => return Ok(false),
          Err(e) => return Err(e.into()),
        }

        tx.execute(
          "INSERT INTO source_metadata (
             metadata_id, recipe_id, video_url, video_id, banned, created_at
           ) VALUES (?1, ?2, ?3, ?4, 0, ?5)",
          rusqlite::params![meta_id_str, id_str, url, video_id, at_str],
        )?;

        tx.commit()?;
        Ok(true)
      })
      .await?;

    if created {
      Ok(CreateOutcome::Created(recipe))
    } else {
      tracing::debug!(url = %source, "creation lost the reservation race");
      Ok(CreateOutcome::AlreadyReserved)
    }
  }

  // ── Identify reservations ─────────────────────────────────────────────────

  async fn reserve(&self, video_url: &str, recipe_id: Uuid) -> Result<ReserveOutcome> {
    let url    = video_url.to_owned();
    let id_str = encode_uuid(recipe_id);
    let now    = now();
    let at_str = encode_dt(now);

    let row = self
      .conn
      .call(move |conn| {
        match conn.execute(
          "INSERT INTO identify_reservations (video_url, recipe_id, reserved_at)
           VALUES (?1, ?2, ?3)",
          rusqlite::params![url, id_str, at_str],
        ) {
          Ok(_) => Ok(ReserveRow::Inserted),
          Err(e) if is_unique_violation(&e) => {
            let holder: Option<String> = conn
              .query_row(
                "SELECT recipe_id FROM identify_reservations WHERE video_url = ?1",
                rusqlite::params![url],
                |r| r.get(0),
              )
              .optional()?;
            Ok(ReserveRow::Held(holder))
          }
          Err(e) => Err(e.into()),
        }
      })
      .await?;

    match row {
      ReserveRow::Inserted => Ok(ReserveOutcome::Acquired(Reservation {
        video_url: video_url.to_owned(),
        recipe_id,
        reserved_at: now,
      })),
      ReserveRow::Held(holder) => Ok(ReserveOutcome::AlreadyReserved {
        holder: holder.as_deref().map(decode_uuid).transpose()?,
      }),
    }
  }

  async fn release(&self, video_url: &str, recipe_id: Uuid) -> Result<bool> {
    let url    = video_url.to_owned();
    let id_str = encode_uuid(recipe_id);

    let removed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM identify_reservations WHERE video_url = ?1 AND recipe_id = ?2",
          rusqlite::params![url, id_str],
        )?)
      })
      .await?;

    Ok(removed > 0)
  }

  async fn reservation(&self, video_url: &str) -> Result<Option<Reservation>> {
    let url = video_url.to_owned();

    let raw: Option<RawReservation> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT video_url, recipe_id, reserved_at
             FROM identify_reservations WHERE video_url = ?1",
            rusqlite::params![url],
            |row| {
              Ok(RawReservation {
                video_url:   row.get(0)?,
                recipe_id:   row.get(1)?,
                reserved_at: row.get(2)?,
              })
            },
          )
          .optional()?)
      })
      .await?;

    raw.map(RawReservation::into_reservation).transpose()
  }

  async fn stale_reservations(&self, cutoff: DateTime<Utc>) -> Result<Vec<Reservation>> {
    let cutoff_str = encode_dt(cutoff);

    let raws: Vec<RawReservation> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT video_url, recipe_id, reserved_at
           FROM identify_reservations
           WHERE reserved_at < ?1
           ORDER BY reserved_at",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![cutoff_str], |row| {
            Ok(RawReservation {
              video_url:   row.get(0)?,
              recipe_id:   row.get(1)?,
              reserved_at: row.get(2)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawReservation::into_reservation).collect()
  }

  // ── Recipes ───────────────────────────────────────────────────────────────

  async fn get_recipe(&self, recipe_id: Uuid) -> Result<Option<Recipe>> {
    let id_str = encode_uuid(recipe_id);

    let raw: Option<RawRecipe> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!("SELECT {RECIPE_COLUMNS} FROM recipes WHERE recipe_id = ?1"),
            rusqlite::params![id_str],
            RawRecipe::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawRecipe::into_recipe).transpose()
  }

  async fn recipes_for_url(&self, video_url: &str) -> Result<Vec<Recipe>> {
    let url = video_url.to_owned();

    let raws: Vec<RawRecipe> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {RECIPE_COLUMNS} FROM recipes
           WHERE video_url = ?1
           ORDER BY created_at, rowid"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![url], RawRecipe::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawRecipe::into_recipe).collect()
  }

  async fn set_status(&self, recipe_id: Uuid, status: RecipeStatus) -> Result<bool> {
    let id_str = encode_uuid(recipe_id);
    let at_str = encode_dt(now());

    let outcome = self
      .conn
      .call(move |conn| Ok(transition(conn, &id_str, status, &at_str)?))
      .await?;

    outcome.applied(recipe_id)
  }

  async fn ban(&self, recipe_id: Uuid) -> Result<bool> {
    let id_str = encode_uuid(recipe_id);
    let at_str = encode_dt(now());

    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let outcome = transition(&tx, &id_str, RecipeStatus::Banned, &at_str)?;
        if outcome != Transition::Applied {
          return Ok(outcome);
        }
        tx.execute(
          "UPDATE source_metadata SET banned = 1 WHERE recipe_id = ?1",
          rusqlite::params![id_str],
        )?;
        tx.commit()?;
        Ok(outcome)
      })
      .await?;

    outcome.applied(recipe_id)
  }

  async fn complete(&self, recipe_id: Uuid, content: RecipeContent) -> Result<bool> {
    let raw    = RawContent::encode(&content)?;
    let id_str = encode_uuid(recipe_id);
    let at_str = encode_dt(now());

    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let outcome = transition(&tx, &id_str, RecipeStatus::Completed, &at_str)?;
        if outcome != Transition::Applied {
          return Ok(outcome);
        }
        tx.execute(
          "INSERT INTO recipe_contents (
             recipe_id, ingredients, tags, meta, steps, briefing, completed_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
           ON CONFLICT (recipe_id) DO UPDATE SET
             ingredients  = excluded.ingredients,
             tags         = excluded.tags,
             meta         = excluded.meta,
             steps        = excluded.steps,
             briefing     = excluded.briefing,
             completed_at = excluded.completed_at",
          rusqlite::params![
            id_str,
            raw.ingredients,
            raw.tags,
            raw.meta,
            raw.steps,
            raw.briefing,
            at_str,
          ],
        )?;
        tx.commit()?;
        Ok(outcome)
      })
      .await?;

    outcome.applied(recipe_id)
  }

  async fn get_content(&self, recipe_id: Uuid) -> Result<Option<RecipeContent>> {
    let id_str = encode_uuid(recipe_id);

    let raw: Option<RawContent> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT ingredients, tags, meta, steps, briefing
             FROM recipe_contents WHERE recipe_id = ?1",
            rusqlite::params![id_str],
            |row| {
              Ok(RawContent {
                ingredients: row.get(0)?,
                tags:        row.get(1)?,
                meta:        row.get(2)?,
                steps:       row.get(3)?,
                briefing:    row.get(4)?,
              })
            },
          )
          .optional()?)
      })
      .await?;

    raw.map(RawContent::into_content).transpose()
  }

  // ── Source metadata ───────────────────────────────────────────────────────

  async fn latest_source(&self, video_url: &str) -> Result<Option<SourceMetadata>> {
    let url = video_url.to_owned();

    let raw: Option<RawSource> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!(
              "SELECT {SOURCE_COLUMNS} FROM source_metadata
               WHERE video_url = ?1
               ORDER BY seq DESC
               LIMIT 1"
            ),
            rusqlite::params![url],
            RawSource::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawSource::into_source).transpose()
  }

  // ── History ───────────────────────────────────────────────────────────────

  async fn attach_history(
    &self,
    user_id:   Uuid,
    recipe_id: Uuid,
    credit:    i64,
  ) -> Result<AttachOutcome> {
    let entry = HistoryEntry {
      history_id: Uuid::new_v4(),
      user_id,
      recipe_id,
      credit,
      billed: false,
      created_at: now(),
    };

    let history_id_str = encode_uuid(entry.history_id);
    let user_id_str    = encode_uuid(user_id);
    let recipe_id_str  = encode_uuid(recipe_id);
    let at_str         = encode_dt(entry.created_at);
    let closed         = [
      encode_status(RecipeStatus::Failed),
      encode_status(RecipeStatus::Banned),
    ];

    let row = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let status: Option<String> = tx
          .query_row(
            "SELECT status FROM recipes WHERE recipe_id = ?1",
            rusqlite::params![recipe_id_str],
            |r| r.get(0),
          )
          .optional()?;

        let row = match status {
          None => AttachRow::Missing,
          Some(s) if closed.contains(&s) => AttachRow::Closed,
          Some(_) => {
            let inserted = tx.execute(
              "INSERT OR IGNORE INTO history (history_id, user_id, recipe_id, credit, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5)",
              rusqlite::params![history_id_str, user_id_str, recipe_id_str, credit, at_str],
            )?;
            if inserted == 0 { AttachRow::AlreadyAttached } else { AttachRow::Inserted }
          }
        };

        tx.commit()?;
        Ok(row)
      })
      .await?;

    match row {
      AttachRow::Missing         => Err(Error::RecipeNotFound(recipe_id)),
      AttachRow::Closed          => Ok(AttachOutcome::Closed),
      AttachRow::AlreadyAttached => Ok(AttachOutcome::AlreadyAttached),
      AttachRow::Inserted        => Ok(AttachOutcome::Inserted(entry)),
    }
  }

  async fn mark_billed(&self, user_id: Uuid, recipe_id: Uuid) -> Result<bool> {
    let user_id_str   = encode_uuid(user_id);
    let recipe_id_str = encode_uuid(recipe_id);

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE history SET billed = 1 WHERE user_id = ?1 AND recipe_id = ?2",
          rusqlite::params![user_id_str, recipe_id_str],
        )?)
      })
      .await?;

    Ok(changed > 0)
  }

  async fn detach_history(
    &self,
    user_id:   Uuid,
    recipe_id: Uuid,
  ) -> Result<Option<HistoryEntry>> {
    let user_id_str   = encode_uuid(user_id);
    let recipe_id_str = encode_uuid(recipe_id);

    let raw: Option<RawHistory> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let raw = tx
          .query_row(
            &format!(
              "SELECT {HISTORY_COLUMNS} FROM history WHERE user_id = ?1 AND recipe_id = ?2"
            ),
            rusqlite::params![user_id_str, recipe_id_str],
            RawHistory::from_row,
          )
          .optional()?;
        if raw.is_some() {
          tx.execute(
            "DELETE FROM history WHERE user_id = ?1 AND recipe_id = ?2",
            rusqlite::params![user_id_str, recipe_id_str],
          )?;
        }
        tx.commit()?;
        Ok(raw)
      })
      .await?;

    raw.map(RawHistory::into_entry).transpose()
  }

  async fn take_history(&self, recipe_id: Uuid) -> Result<Vec<HistoryEntry>> {
    let recipe_id_str = encode_uuid(recipe_id);

    let raws: Vec<RawHistory> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let rows = {
          let mut stmt = tx.prepare(&format!(
            "SELECT {HISTORY_COLUMNS} FROM history
             WHERE recipe_id = ?1
             ORDER BY created_at, rowid"
          ))?;
          stmt
            .query_map(rusqlite::params![recipe_id_str], RawHistory::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };
        tx.execute(
          "DELETE FROM history WHERE recipe_id = ?1",
          rusqlite::params![recipe_id_str],
        )?;
        tx.commit()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawHistory::into_entry).collect()
  }

  async fn list_history(&self, recipe_id: Uuid) -> Result<Vec<HistoryEntry>> {
    let recipe_id_str = encode_uuid(recipe_id);

    let raws: Vec<RawHistory> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {HISTORY_COLUMNS} FROM history
           WHERE recipe_id = ?1
           ORDER BY created_at, rowid"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![recipe_id_str], RawHistory::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawHistory::into_entry).collect()
  }

  // ── Progress ──────────────────────────────────────────────────────────────

  async fn append_progress(
    &self,
    recipe_id: Uuid,
    step:      ProgressStep,
    detail:    ProgressDetail,
  ) -> Result<Option<ProgressEntry>> {
    let recorded_at   = now();
    let recipe_id_str = encode_uuid(recipe_id);
    let step_str      = step.to_string();
    let detail_str    = detail.to_string();
    let finished_str  = ProgressStep::Finished.to_string();
    let at_str        = encode_dt(recorded_at);

    let sequence = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let finished = tx
          .query_row(
            "SELECT 1 FROM progress WHERE recipe_id = ?1 AND step = ?2 LIMIT 1",
            rusqlite::params![recipe_id_str, finished_str],
            |_| Ok(()),
          )
          .optional()?
          .is_some();
        if finished {
          return Ok(None);
        }
        tx.execute(
          "INSERT INTO progress (recipe_id, step, detail, recorded_at)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![recipe_id_str, step_str, detail_str, at_str],
        )?;
        let sequence = tx.last_insert_rowid();
        tx.commit()?;
        Ok(Some(sequence))
      })
      .await?;

    if sequence.is_none() {
      tracing::debug!(recipe = %recipe_id, %step, %detail, "progress finished; entry dropped");
    }
    Ok(sequence.map(|sequence| ProgressEntry { sequence, recipe_id, step, detail, recorded_at }))
  }

  async fn list_progress(&self, recipe_id: Uuid) -> Result<Vec<ProgressEntry>> {
    let recipe_id_str = encode_uuid(recipe_id);

    let raws: Vec<RawProgress> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT sequence, recipe_id, step, detail, recorded_at
           FROM progress
           WHERE recipe_id = ?1
           ORDER BY sequence",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![recipe_id_str], |row| {
            Ok(RawProgress {
              sequence:    row.get(0)?,
              recipe_id:   row.get(1)?,
              step:        row.get(2)?,
              detail:      row.get(3)?,
              recorded_at: row.get(4)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawProgress::into_entry).collect()
  }
}
