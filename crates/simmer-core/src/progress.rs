//! Progress entries: the append-only log of one creation attempt.
//!
//! Entries are never updated or deleted. The current status of a recipe is
//! whatever the latest entry says.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Coarse pipeline phase, in the order phases begin.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProgressStep {
  Ready,
  Caption,
  Detail,
  Step,
  Briefing,
  Finished,
}

/// Finer-grained marker within a step.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProgressDetail {
  Ready,
  Started,
  Caption,
  Ingredient,
  Tag,
  DetailMeta,
  Step,
  Briefing,
  Finished,
  Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEntry {
  /// Store-assigned, strictly increasing per store.
  pub sequence:    i64,
  pub recipe_id:   Uuid,
  pub step:        ProgressStep,
  pub detail:      ProgressDetail,
  pub recorded_at: DateTime<Utc>,
}

impl ProgressEntry {
  pub fn is_terminal(&self) -> bool { self.step == ProgressStep::Finished }

  pub fn is_failure(&self) -> bool {
    self.step == ProgressStep::Finished && self.detail == ProgressDetail::Failed
  }
}

/// Reduce an ordered log to the first occurrence of each coarse step.
pub fn coarse_steps(entries: &[ProgressEntry]) -> Vec<ProgressStep> {
  let mut seen = Vec::new();
  for entry in entries {
    if !seen.contains(&entry.step) {
      seen.push(entry.step);
    }
  }
  seen
}

#[cfg(test)]
mod tests {
  use super::*;

  fn entry(sequence: i64, step: ProgressStep, detail: ProgressDetail) -> ProgressEntry {
    ProgressEntry {
      sequence,
      recipe_id: Uuid::nil(),
      step,
      detail,
      recorded_at: Utc::now(),
    }
  }

  #[test]
  fn coarse_steps_keeps_first_occurrence_order() {
    use ProgressDetail as D;
    use ProgressStep as S;

    let log = vec![
      entry(1, S::Ready, D::Ready),
      entry(2, S::Caption, D::Started),
      entry(3, S::Caption, D::Caption),
      entry(4, S::Detail, D::Started),
      entry(5, S::Step, D::Started),
      entry(6, S::Briefing, D::Started),
      entry(7, S::Step, D::Step),
      entry(8, S::Detail, D::Tag),
      entry(9, S::Briefing, D::Briefing),
      entry(10, S::Detail, D::Ingredient),
      entry(11, S::Finished, D::Finished),
    ];

    assert_eq!(
      coarse_steps(&log),
      vec![S::Ready, S::Caption, S::Detail, S::Step, S::Briefing, S::Finished]
    );
    assert!(log.last().unwrap().is_terminal());
    assert!(!log.last().unwrap().is_failure());
  }

  #[test]
  fn detail_strings_round_trip() {
    assert_eq!(ProgressDetail::DetailMeta.to_string(), "detail_meta");
    assert_eq!("failed".parse::<ProgressDetail>().unwrap(), ProgressDetail::Failed);
  }
}
