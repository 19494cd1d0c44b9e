//! Compensation for failed pipeline runs.
//!
//! Recovery marks the recipe closed, records the terminal progress entry, then
//! removes every history row and refunds the rows whose charge had landed.
//! Marking status first matters: once the recipe is closed the store refuses
//! new attaches, so no history row can appear after `take_history` has run.
//!
//! Only an open recipe is recovered. If the close finds it already terminal,
//! whoever closed it owns the compensation and this pass does nothing.

use simmer_core::{
  history::HistoryEntry,
  ports::CreditLedger,
  progress::{ProgressDetail, ProgressStep},
  recipe::RecipeStatus,
  store::RecipeStore,
};
use uuid::Uuid;

use crate::{
  context::{Backend, Services},
  error::{FailureKind, PipelineFailure},
  progress::ProgressTracker,
};

/// What a recovery pass did.
#[derive(Debug, Clone)]
pub struct RecoveryReport {
  pub recipe_id:       Uuid,
  pub kind:            FailureKind,
  /// Whether the recipe ended `Banned` rather than `Failed`.
  pub banned:          bool,
  /// The recipe was terminal before this pass; nothing was compensated.
  pub already_closed:  bool,
  pub removed:         Vec<HistoryEntry>,
  pub refunded:        usize,
  pub refund_failures: usize,
}

/// What closing the recipe did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Closure {
  Failed,
  Banned,
  AlreadyTerminal,
}

pub struct RecoveryOrchestrator<B: Backend> {
  services: Services<B>,
  progress: ProgressTracker<B::Store>,
}

impl<B: Backend> Clone for RecoveryOrchestrator<B> {
  fn clone(&self) -> Self {
    Self { services: self.services.clone(), progress: self.progress.clone() }
  }
}

impl<B: Backend> RecoveryOrchestrator<B> {
  pub fn new(services: Services<B>) -> Self {
    let progress = ProgressTracker::new(services.store.clone());
    Self { services, progress }
  }

  /// Compensate for `failure` on `recipe_id`. Never fails; every step that
  /// errors is logged and the remaining steps still run.
  pub async fn recover(
    &self,
    recipe_id: Uuid,
    failure: &PipelineFailure,
    video_url: &str,
  ) -> RecoveryReport {
    let kind = failure.kind();
    let closure = self.close(recipe_id, kind).await;
    if closure == Closure::AlreadyTerminal {
      tracing::info!(
        recipe = %recipe_id,
        url = video_url,
        %kind,
        "recipe already closed; not recovering"
      );
      return RecoveryReport {
        recipe_id,
        kind,
        banned: false,
        already_closed: true,
        removed: Vec::new(),
        refunded: 0,
        refund_failures: 0,
      };
    }
    let banned = closure == Closure::Banned;

    match self
      .progress
      .record(recipe_id, ProgressStep::Finished, ProgressDetail::Failed)
      .await
    {
      Ok(Some(_)) => {}
      Ok(None) => tracing::warn!(recipe = %recipe_id, "progress already finished"),
      Err(e) => {
        tracing::error!(recipe = %recipe_id, error = %e, "failed to record failure progress");
      }
    }

    let removed = match self.services.store.take_history(recipe_id).await {
      Ok(rows) => rows,
      Err(e) => {
        tracing::error!(recipe = %recipe_id, error = %e, "failed to remove history");
        Vec::new()
      }
    };

    let mut refunded = 0;
    let mut refund_failures = 0;
    for row in removed.iter().filter(|row| row.refundable()) {
      match self.services.ledger.refund(row.user_id, recipe_id, row.credit).await {
        Ok(()) => refunded += 1,
        Err(e) => {
          refund_failures += 1;
          tracing::warn!(
            recipe = %recipe_id,
            user = %row.user_id,
            credit = row.credit,
            error = %e,
            "refund failed"
          );
        }
      }
    }

    tracing::info!(
      recipe = %recipe_id,
      url = video_url,
      %kind,
      banned,
      removed = removed.len(),
      refunded,
      refund_failures,
      reason = %failure,
      "recipe creation recovered"
    );

    RecoveryReport {
      recipe_id,
      kind,
      banned,
      already_closed: false,
      removed,
      refunded,
      refund_failures,
    }
  }

  /// A store error while closing is logged and treated as closed, so the
  /// history is still compensated.
  async fn close(&self, recipe_id: Uuid, kind: FailureKind) -> Closure {
    let store = &self.services.store;
    if kind == FailureKind::ContentPolicy {
      match store.ban(recipe_id).await {
        Ok(true) => return Closure::Banned,
        Ok(false) => return Closure::AlreadyTerminal,
        Err(e) => {
          tracing::error!(recipe = %recipe_id, error = %e, "failed to ban recipe; marking failed");
        }
      }
    }
    match store.set_status(recipe_id, RecipeStatus::Failed).await {
      Ok(true) => Closure::Failed,
      Ok(false) => Closure::AlreadyTerminal,
      Err(e) => {
        tracing::error!(recipe = %recipe_id, error = %e, "failed to mark recipe failed");
        Closure::Failed
      }
    }
  }
}
