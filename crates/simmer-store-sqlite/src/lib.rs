//! SQLite backend for the simmer recipe-creation pipeline.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Several processes may open the same
//! database file; the identify reservation's primary key is what keeps their
//! creations apart.

mod encode;
mod ledger;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;
