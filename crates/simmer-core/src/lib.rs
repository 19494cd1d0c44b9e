//! Core types and trait definitions for the simmer recipe-creation pipeline.
//!
//! This crate is deliberately free of HTTP and database dependencies. The
//! store backend, the pipeline and the binary all depend on it.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod error;
pub mod history;
pub mod ports;
pub mod progress;
pub mod recipe;
pub mod source;
pub mod store;

pub use error::{Error, Result};
