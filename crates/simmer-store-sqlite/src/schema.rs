//! SQL schema for the simmer SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Recipes are never deleted.
CREATE TABLE IF NOT EXISTS recipes (
    recipe_id   TEXT PRIMARY KEY,
    status      TEXT NOT NULL,      -- 'ready' | 'in_progress' | 'completed' | 'failed' | 'banned'
    credit_cost INTEGER NOT NULL,
    video_url   TEXT NOT NULL,      -- normalized
    video_id    TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

-- The identify lock. The primary key is the only cross-process exclusion
-- between creations of the same URL. `recipe_id` is an opaque holder token
-- and may be reserved before its recipe row exists.
CREATE TABLE IF NOT EXISTS identify_reservations (
    video_url   TEXT PRIMARY KEY,
    recipe_id   TEXT NOT NULL,
    reserved_at TEXT NOT NULL
);

-- One row per creation attempt; the highest seq for a URL is current.
CREATE TABLE IF NOT EXISTS source_metadata (
    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
    metadata_id TEXT NOT NULL UNIQUE,
    recipe_id   TEXT NOT NULL UNIQUE REFERENCES recipes(recipe_id),
    video_url   TEXT NOT NULL,
    video_id    TEXT NOT NULL,
    banned      INTEGER NOT NULL DEFAULT 0,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS recipe_contents (
    recipe_id    TEXT PRIMARY KEY REFERENCES recipes(recipe_id),
    ingredients  TEXT NOT NULL,     -- JSON
    tags         TEXT NOT NULL,     -- JSON
    meta         TEXT NOT NULL,     -- JSON
    steps        TEXT NOT NULL,     -- JSON
    briefing     TEXT NOT NULL,     -- JSON
    completed_at TEXT NOT NULL
);

-- Progress is strictly append-only.
-- No UPDATE or DELETE is ever issued against this table.
CREATE TABLE IF NOT EXISTS progress (
    sequence    INTEGER PRIMARY KEY AUTOINCREMENT,
    recipe_id   TEXT NOT NULL REFERENCES recipes(recipe_id),
    step        TEXT NOT NULL,
    detail      TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS history (
    history_id TEXT PRIMARY KEY,
    user_id    TEXT NOT NULL,
    recipe_id  TEXT NOT NULL REFERENCES recipes(recipe_id),
    credit     INTEGER NOT NULL,
    billed     INTEGER NOT NULL DEFAULT 0,  -- set once the ledger spend lands
    created_at TEXT NOT NULL,
    UNIQUE (user_id, recipe_id)
);

CREATE TABLE IF NOT EXISTS credit_accounts (
    user_id TEXT PRIMARY KEY,
    balance INTEGER NOT NULL,
    CHECK (balance >= 0)
);

-- Ledger journal; append-only.
CREATE TABLE IF NOT EXISTS credit_transactions (
    transaction_id TEXT PRIMARY KEY,
    user_id        TEXT NOT NULL,
    recipe_id      TEXT,            -- NULL for grants
    kind           TEXT NOT NULL,   -- 'grant' | 'spend' | 'refund'
    amount         INTEGER NOT NULL,
    recorded_at    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS recipes_url_idx        ON recipes(video_url);
CREATE INDEX IF NOT EXISTS source_url_idx         ON source_metadata(video_url);
CREATE INDEX IF NOT EXISTS progress_recipe_idx    ON progress(recipe_id);
CREATE INDEX IF NOT EXISTS history_recipe_idx     ON history(recipe_id);
CREATE INDEX IF NOT EXISTS reservations_age_idx   ON identify_reservations(reserved_at);
CREATE INDEX IF NOT EXISTS credit_tx_user_idx     ON credit_transactions(user_id);

PRAGMA user_version = 1;
";
