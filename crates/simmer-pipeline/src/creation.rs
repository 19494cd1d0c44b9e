//! The creation transaction: recipe, reservation and source metadata, all or
//! nothing.

use std::sync::Arc;

use simmer_core::{
  source::VideoUrl,
  store::{CreateOutcome, RecipeStore},
};

pub struct CreationService<S> {
  store: Arc<S>,
}

impl<S> Clone for CreationService<S> {
  fn clone(&self) -> Self { Self { store: Arc::clone(&self.store) } }
}

impl<S: RecipeStore> CreationService<S> {
  pub fn new(store: Arc<S>) -> Self { Self { store } }

  /// Create a placeholder recipe under a fresh reservation.
  ///
  /// [`CreateOutcome::AlreadyReserved`] is passed through untouched; the
  /// caller attaches to the winning creation instead.
  pub async fn create_with_reservation(
    &self,
    source: &VideoUrl,
    credit_cost: i64,
  ) -> Result<CreateOutcome, S::Error> {
    let outcome = self.store.create_with_reservation(source, credit_cost).await?;
    if let CreateOutcome::Created(recipe) = &outcome {
      tracing::info!(
        recipe = %recipe.recipe_id,
        url = %source,
        credit_cost,
        "recipe reserved"
      );
    }
    Ok(outcome)
  }
}
