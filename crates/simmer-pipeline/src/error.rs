//! Error types for `simmer-pipeline`.
//!
//! [`CreateError`] is what `create_bookmark` callers see. [`PipelineFailure`]
//! never reaches them: it is produced inside a background run and consumed by
//! recovery.

use simmer_core::ports::{CaptionError, GenerationError};
use strum::Display;
use thiserror::Error;

// ─── Synchronous path ────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CreateError {
  #[error("source video is banned: {0}")]
  SubjectBanned(String),

  #[error("recipe creation failed: {0}")]
  CreationFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl CreateError {
  pub(crate) fn failed(e: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
    Self::CreationFailed(e.into())
  }
}

// ─── Background path ─────────────────────────────────────────────────────────

/// The pipeline stage a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
  Caption,
  Detail,
  Step,
  Briefing,
}

#[derive(Debug, Clone, Error)]
pub enum PipelineFailure {
  /// The source material is not a valid recipe.
  #[error("content policy: {0}")]
  ContentPolicy(String),

  /// A caption or generation service errored or timed out.
  #[error("{stage} upstream failure: {message}")]
  Upstream { stage: Stage, message: String },

  #[error("unclassified failure: {0}")]
  Unclassified(String),
}

/// Coarse classification used by recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
  ContentPolicy,
  Upstream,
  Unclassified,
}

impl PipelineFailure {
  pub fn kind(&self) -> FailureKind {
    match self {
      Self::ContentPolicy(_) => FailureKind::ContentPolicy,
      Self::Upstream { .. } => FailureKind::Upstream,
      Self::Unclassified(_) => FailureKind::Unclassified,
    }
  }

  pub(crate) fn upstream(stage: Stage, e: impl std::fmt::Display) -> Self {
    Self::Upstream { stage, message: e.to_string() }
  }

  /// Store errors are never evidence about the content, so they stay
  /// unclassified.
  pub(crate) fn store(e: impl std::fmt::Display) -> Self {
    Self::Unclassified(format!("store error: {e}"))
  }
}

impl From<CaptionError> for PipelineFailure {
  fn from(e: CaptionError) -> Self {
    match e {
      CaptionError::NotARecipe(reason) => Self::ContentPolicy(reason),
      CaptionError::FetchFailed(_) => Self::upstream(Stage::Caption, e),
    }
  }
}

impl PipelineFailure {
  pub(crate) fn generation(stage: Stage, e: GenerationError) -> Self { Self::upstream(stage, e) }
}
