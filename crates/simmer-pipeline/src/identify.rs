//! The identify lock: at most one in-flight creation per normalized URL.
//!
//! Acquisition is an optimistic insert against the store's unique key, and a
//! conflict is the signal that someone else is already creating the recipe.
//! Nothing here holds an in-process mutex, so the lock works across processes
//! sharing a database.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use simmer_core::{
  source::VideoUrl,
  store::{RecipeStore, Reservation, ReserveOutcome},
};
use uuid::Uuid;

pub struct IdentifyLock<S> {
  store: Arc<S>,
}

impl<S> Clone for IdentifyLock<S> {
  fn clone(&self) -> Self { Self { store: Arc::clone(&self.store) } }
}

impl<S: RecipeStore> IdentifyLock<S> {
  pub fn new(store: Arc<S>) -> Self { Self { store } }

  /// Try to take the reservation for `source` on behalf of `recipe_id`.
  pub async fn reserve(
    &self,
    source: &VideoUrl,
    recipe_id: Uuid,
  ) -> Result<ReserveOutcome, S::Error> {
    let outcome = self.store.reserve(source.as_str(), recipe_id).await?;
    if let ReserveOutcome::AlreadyReserved { holder } = &outcome {
      tracing::debug!(url = %source, ?holder, "reservation already held");
    }
    Ok(outcome)
  }

  /// Release the reservation if `recipe_id` still holds it.
  ///
  /// Never fails: this runs on every pipeline exit path, including after a
  /// failed recovery. Returns whether a reservation was actually removed.
  pub async fn release(&self, video_url: &str, recipe_id: Uuid) -> bool {
    match self.store.release(video_url, recipe_id).await {
      Ok(true) => {
        tracing::debug!(url = video_url, recipe = %recipe_id, "reservation released");
        true
      }
      Ok(false) => false,
      Err(e) => {
        tracing::error!(
          url = video_url,
          recipe = %recipe_id,
          error = %e,
          "failed to release reservation; it will linger until swept"
        );
        false
      }
    }
  }

  /// Release whatever reservation exists for `video_url`, regardless of
  /// holder. Operator escape hatch for runs lost to a crash.
  pub async fn force_release(&self, video_url: &str) -> Result<Option<Reservation>, S::Error> {
    let Some(reservation) = self.store.reservation(video_url).await? else {
      return Ok(None);
    };
    self.store.release(video_url, reservation.recipe_id).await?;
    tracing::warn!(
      url = video_url,
      recipe = %reservation.recipe_id,
      "reservation force-released"
    );
    Ok(Some(reservation))
  }

  pub async fn holder(&self, video_url: &str) -> Result<Option<Reservation>, S::Error> {
    self.store.reservation(video_url).await
  }

  /// Reservations older than `cutoff`.
  pub async fn stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<Reservation>, S::Error> {
    self.store.stale_reservations(cutoff).await
  }
}
