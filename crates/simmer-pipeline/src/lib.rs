//! The asynchronous recipe-creation pipeline.
//!
//! [`CreationFacade`] is the synchronous entry point. It deduplicates
//! submissions through the store-backed [`IdentifyLock`], bills users, and
//! hands new recipes to the [`PipelineRunner`], which runs caption extraction
//! followed by three concurrent generation branches. Failures are absorbed by
//! the [`RecoveryOrchestrator`]; callers only ever observe them through
//! recipe status and progress.

#![allow(async_fn_in_trait)]

pub mod config;
pub mod context;
pub mod creation;
pub mod error;
pub mod facade;
pub mod identify;
pub mod progress;
pub mod recovery;
pub mod runner;

pub use config::PipelineConfig;
pub use context::{Backend, Services};
pub use creation::CreationService;
pub use error::{CreateError, FailureKind, PipelineFailure, Stage};
pub use facade::{BookmarkTarget, CreationFacade};
pub use identify::IdentifyLock;
pub use progress::ProgressTracker;
pub use recovery::{RecoveryOrchestrator, RecoveryReport};
pub use runner::{PipelineJob, PipelineRunner, RunOutcome};

#[cfg(test)]
mod tests;
