//! Progress tracking over the store's append-only progress log.

use std::sync::Arc;

use simmer_core::{
  progress::{ProgressDetail, ProgressEntry, ProgressStep},
  store::RecipeStore,
};
use uuid::Uuid;

pub struct ProgressTracker<S> {
  store: Arc<S>,
}

impl<S> Clone for ProgressTracker<S> {
  fn clone(&self) -> Self { Self { store: Arc::clone(&self.store) } }
}

impl<S: RecipeStore> ProgressTracker<S> {
  pub fn new(store: Arc<S>) -> Self { Self { store } }

  /// Append an entry. `None` means the log already ended with a `Finished`
  /// entry and nothing was written.
  pub async fn record(
    &self,
    recipe_id: Uuid,
    step: ProgressStep,
    detail: ProgressDetail,
  ) -> Result<Option<ProgressEntry>, S::Error> {
    let entry = self.store.append_progress(recipe_id, step, detail).await?;
    if let Some(entry) = &entry {
      tracing::debug!(recipe = %recipe_id, %step, %detail, seq = entry.sequence, "progress");
    }
    Ok(entry)
  }

  /// The full log in append order.
  pub async fn entries(&self, recipe_id: Uuid) -> Result<Vec<ProgressEntry>, S::Error> {
    self.store.list_progress(recipe_id).await
  }

  /// The latest entry, which is the recipe's current progress.
  pub async fn current(&self, recipe_id: Uuid) -> Result<Option<ProgressEntry>, S::Error> {
    Ok(self.entries(recipe_id).await?.pop())
  }
}
