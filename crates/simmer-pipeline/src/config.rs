//! Pipeline tuning, deserialised from the `[pipeline]` table of the config
//! file. Every field has a default.

use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  /// Worker pool size: pipeline runs executing at once.
  pub max_concurrent_pipelines: usize,
  /// Upper bound on any single caption or generation call.
  pub stage_timeout_secs:       u64,
  /// Credits charged per user attach, fixed on the recipe at creation.
  pub credit_cost:              i64,
  /// How many times a lost reservation race is re-resolved before giving up.
  pub max_reresolve:            u32,
  /// How long a new creation waits for a closed recipe's recovery to release
  /// the URL's reservation.
  pub reservation_wait_secs:    u64,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      max_concurrent_pipelines: 4,
      stage_timeout_secs:       120,
      credit_cost:              10,
      max_reresolve:            3,
      reservation_wait_secs:    30,
    }
  }
}

impl PipelineConfig {
  pub fn stage_timeout(&self) -> Duration { Duration::from_secs(self.stage_timeout_secs) }

  pub fn reservation_wait(&self) -> Duration { Duration::from_secs(self.reservation_wait_secs) }

  pub(crate) fn worker_permits(&self) -> usize { self.max_concurrent_pipelines.max(1) }
}
