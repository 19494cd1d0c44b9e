//! The creation facade: the synchronous entry point for bookmarking a video.
//!
//! `create_bookmark` resolves a URL to a recipe, creating one under the
//! identify reservation if none is usable, attaches and bills the user, and
//! returns as soon as the recipe id is known. Content generation happens in
//! the background and is observed through progress and recipe status.

use std::time::Duration;

use simmer_core::{
  history::AttachOutcome,
  ports::CreditLedger,
  progress::ProgressEntry,
  recipe::{Recipe, RecipeContent, RecipeStatus},
  source::VideoUrl,
  store::{CreateOutcome, RecipeStore, Reservation},
};
use uuid::Uuid;

use crate::{
  config::PipelineConfig,
  context::{Backend, Services},
  creation::CreationService,
  error::{CreateError, PipelineFailure},
  identify::IdentifyLock,
  progress::ProgressTracker,
  recovery::RecoveryOrchestrator,
  runner::{PipelineJob, PipelineRunner},
};

type StoreError<B> = <<B as Backend>::Store as RecipeStore>::Error;

/// How often a creation that lost the reservation to a closing recipe checks
/// whether recovery has released it.
const HOLDER_POLL: Duration = Duration::from_millis(25);

/// Who is bookmarking. System targets trigger creation without billing anyone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookmarkTarget {
  User { user_id: Uuid, url: String },
  System { url: String },
}

impl BookmarkTarget {
  pub fn url(&self) -> &str {
    match self {
      Self::User { url, .. } | Self::System { url } => url,
    }
  }

  pub fn user_id(&self) -> Option<Uuid> {
    match self {
      Self::User { user_id, .. } => Some(*user_id),
      Self::System { .. } => None,
    }
  }
}

enum Resolution {
  Existing(Recipe),
  /// No usable recipe: never created, or the latest one failed.
  Missing,
  Banned,
}

enum Attached {
  Done,
  /// The recipe closed between resolution and attach.
  Closed,
}

pub struct CreationFacade<B: Backend> {
  services: Services<B>,
  config:   PipelineConfig,
  creation: CreationService<B::Store>,
  identify: IdentifyLock<B::Store>,
  progress: ProgressTracker<B::Store>,
  recovery: RecoveryOrchestrator<B>,
  runner:   PipelineRunner<B>,
}

impl<B: Backend> Clone for CreationFacade<B> {
  fn clone(&self) -> Self {
    Self {
      services: self.services.clone(),
      config:   self.config.clone(),
      creation: self.creation.clone(),
      identify: self.identify.clone(),
      progress: self.progress.clone(),
      recovery: self.recovery.clone(),
      runner:   self.runner.clone(),
    }
  }
}

impl<B: Backend> CreationFacade<B> {
  pub fn new(services: Services<B>, config: PipelineConfig) -> Self {
    let store = services.store.clone();
    Self {
      creation: CreationService::new(store.clone()),
      identify: IdentifyLock::new(store.clone()),
      progress: ProgressTracker::new(store),
      recovery: RecoveryOrchestrator::new(services.clone()),
      runner: PipelineRunner::new(services.clone(), &config),
      services,
      config,
    }
  }

  pub fn runner(&self) -> &PipelineRunner<B> { &self.runner }

  pub fn identify(&self) -> &IdentifyLock<B::Store> { &self.identify }

  // ─── Bookmarking ───────────────────────────────────────────────────────────

  /// Resolve `target`'s URL to a recipe and attach the target to it.
  ///
  /// Returns the recipe id without waiting for generation. A user is billed
  /// the recipe's cost the first time they attach to it, never again.
  pub async fn create_bookmark(&self, target: BookmarkTarget) -> Result<Uuid, CreateError> {
    let source = VideoUrl::parse(target.url()).map_err(CreateError::failed)?;

    for attempt in 0..=self.config.max_reresolve {
      match self.resolve(&source).await? {
        Resolution::Banned => return Err(CreateError::SubjectBanned(source.to_string())),

        Resolution::Existing(recipe) => match self.attach(&target, &recipe).await? {
          Attached::Done => return Ok(recipe.recipe_id),
          Attached::Closed => {
            tracing::debug!(recipe = %recipe.recipe_id, attempt, "recipe closed during attach");
          }
        },

        Resolution::Missing => {
          let outcome = self
            .creation
            .create_with_reservation(&source, self.config.credit_cost)
            .await
            .map_err(CreateError::failed)?;
          match outcome {
            CreateOutcome::Created(recipe) => return self.start(&target, source, recipe).await,
            CreateOutcome::AlreadyReserved => {
              tracing::debug!(url = %source, attempt, "lost reservation race; re-resolving");
              self.await_closing_holder(&source).await?;
            }
          }
        }
      }
    }

    Err(CreateError::failed(format!(
      "no usable recipe for {source} after {} attempts",
      self.config.max_reresolve + 1
    )))
  }

  /// Attach the creator to a freshly created recipe, then dispatch its run.
  ///
  /// Attaching first means the recipe is still `Ready` and cannot have been
  /// closed by a fast-failing run. The run is dispatched even if billing
  /// fails, since it owns the reservation.
  async fn start(
    &self,
    target: &BookmarkTarget,
    source: VideoUrl,
    recipe: Recipe,
  ) -> Result<Uuid, CreateError> {
    let recipe_id = recipe.recipe_id;
    let attached = self.attach(target, &recipe).await;
    let _run = self.runner.submit(PipelineJob { recipe_id, source });
    match attached? {
      Attached::Done => {}
      Attached::Closed => {
        tracing::warn!(recipe = %recipe_id, "new recipe closed before its creator attached");
      }
    }
    Ok(recipe_id)
  }

  /// Wait while the URL's reservation belongs to a recipe that has already
  /// closed, i.e. while its recovery is still running. An open holder is
  /// returned immediately: its metadata is visible and re-resolving finds it.
  async fn await_closing_holder(&self, source: &VideoUrl) -> Result<(), CreateError> {
    let deadline = tokio::time::Instant::now() + self.config.reservation_wait();
    loop {
      let Some(held) = self.identify.holder(source.as_str()).await.map_err(CreateError::failed)?
      else {
        return Ok(());
      };
      let closing = self
        .services
        .store
        .get_recipe(held.recipe_id)
        .await
        .map_err(CreateError::failed)?
        .is_some_and(|r| r.status.is_closed());
      if !closing {
        return Ok(());
      }
      if tokio::time::Instant::now() >= deadline {
        return Err(CreateError::failed(format!(
          "reservation for {source} still held by closed recipe {} after {:?}",
          held.recipe_id,
          self.config.reservation_wait()
        )));
      }
      tokio::time::sleep(HOLDER_POLL).await;
    }
  }

  async fn resolve(&self, source: &VideoUrl) -> Result<Resolution, CreateError> {
    let store = &self.services.store;
    let Some(meta) = store.latest_source(source.as_str()).await.map_err(CreateError::failed)?
    else {
      return Ok(Resolution::Missing);
    };
    if meta.banned {
      return Ok(Resolution::Banned);
    }

    let recipe = store.get_recipe(meta.recipe_id).await.map_err(CreateError::failed)?;
    Ok(match recipe {
      Some(recipe) if recipe.status == RecipeStatus::Banned => Resolution::Banned,
      Some(recipe) if recipe.status.is_closed() => Resolution::Missing,
      Some(recipe) => Resolution::Existing(recipe),
      None => {
        tracing::warn!(recipe = %meta.recipe_id, "source metadata points at a missing recipe");
        Resolution::Missing
      }
    })
  }

  /// Record a user's history row and bill it. System targets are a no-op.
  ///
  /// The row is flagged billed only after the spend lands. If recovery took
  /// the row in between, the charge is refunded here and the recipe treated
  /// as closed.
  async fn attach(&self, target: &BookmarkTarget, recipe: &Recipe) -> Result<Attached, CreateError> {
    let Some(user_id) = target.user_id() else {
      return Ok(Attached::Done);
    };
    let recipe_id = recipe.recipe_id;
    let store = &self.services.store;

    let outcome = store
      .attach_history(user_id, recipe_id, recipe.credit_cost)
      .await
      .map_err(CreateError::failed)?;
    let entry = match outcome {
      AttachOutcome::Inserted(entry) => entry,
      AttachOutcome::AlreadyAttached => return Ok(Attached::Done),
      AttachOutcome::Closed => return Ok(Attached::Closed),
    };
    if entry.credit <= 0 {
      return Ok(Attached::Done);
    }

    if let Err(e) = self.services.ledger.spend(user_id, recipe_id, entry.credit).await {
      tracing::warn!(user = %user_id, recipe = %recipe_id, error = %e, "spend failed; detaching");
      self.detach(user_id, recipe_id).await;
      return Err(CreateError::failed(e));
    }

    match store.mark_billed(user_id, recipe_id).await {
      Ok(true) => {
        tracing::info!(user = %user_id, recipe = %recipe_id, credit = entry.credit, "user billed");
        Ok(Attached::Done)
      }
      Ok(false) => {
        tracing::warn!(user = %user_id, recipe = %recipe_id, "recovered mid-charge; refunding");
        self.refund(user_id, recipe_id, entry.credit).await;
        Ok(Attached::Closed)
      }
      Err(e) => {
        tracing::error!(user = %user_id, recipe = %recipe_id, error = %e, "failed to flag charge");
        self.refund(user_id, recipe_id, entry.credit).await;
        self.detach(user_id, recipe_id).await;
        Err(CreateError::failed(e))
      }
    }
  }

  async fn detach(&self, user_id: Uuid, recipe_id: Uuid) {
    if let Err(e) = self.services.store.detach_history(user_id, recipe_id).await {
      tracing::error!(
        user = %user_id,
        recipe = %recipe_id,
        error = %e,
        "failed to detach unbilled history"
      );
    }
  }

  async fn refund(&self, user_id: Uuid, recipe_id: Uuid, credit: i64) {
    if let Err(e) = self.services.ledger.refund(user_id, recipe_id, credit).await {
      tracing::error!(user = %user_id, recipe = %recipe_id, credit, error = %e, "refund failed");
    }
  }

  // ─── Reads ─────────────────────────────────────────────────────────────────

  pub async fn progress(&self, recipe_id: Uuid) -> Result<Vec<ProgressEntry>, StoreError<B>> {
    self.progress.entries(recipe_id).await
  }

  pub async fn current_progress(
    &self,
    recipe_id: Uuid,
  ) -> Result<Option<ProgressEntry>, StoreError<B>> {
    self.progress.current(recipe_id).await
  }

  pub async fn recipe(&self, recipe_id: Uuid) -> Result<Option<Recipe>, StoreError<B>> {
    self.services.store.get_recipe(recipe_id).await
  }

  pub async fn content(&self, recipe_id: Uuid) -> Result<Option<RecipeContent>, StoreError<B>> {
    self.services.store.get_content(recipe_id).await
  }

  // ─── Operator recovery ─────────────────────────────────────────────────────

  /// Abandon and release the reservation for `url`, recovering its recipe if
  /// the run never finished. For runs lost to a process crash.
  pub async fn release_abandoned(&self, url: &str) -> Result<Option<Reservation>, CreateError> {
    let source = VideoUrl::parse(url).map_err(CreateError::failed)?;
    let Some(reservation) =
      self.identify.holder(source.as_str()).await.map_err(CreateError::failed)?
    else {
      return Ok(None);
    };
    self.abandon(&reservation).await.map_err(CreateError::failed)?;
    Ok(Some(reservation))
  }

  /// Abandon every reservation older than `older_than`.
  pub async fn sweep_stale(
    &self,
    older_than: chrono::Duration,
  ) -> Result<Vec<Reservation>, StoreError<B>> {
    let cutoff = chrono::Utc::now() - older_than;
    let stale = self.identify.stale(cutoff).await?;
    for reservation in &stale {
      self.abandon(reservation).await?;
    }
    if !stale.is_empty() {
      tracing::info!(count = stale.len(), "stale reservations swept");
    }
    Ok(stale)
  }

  async fn abandon(&self, reservation: &Reservation) -> Result<(), StoreError<B>> {
    let recipe = self.services.store.get_recipe(reservation.recipe_id).await?;
    let unfinished = matches!(
      recipe.map(|r| r.status),
      Some(RecipeStatus::Ready | RecipeStatus::InProgress)
    );
    if unfinished {
      let failure = PipelineFailure::Unclassified("reservation abandoned".to_owned());
      self.recovery.recover(reservation.recipe_id, &failure, &reservation.video_url).await;
    }
    self.identify.release(&reservation.video_url, reservation.recipe_id).await;
    tracing::warn!(
      url = %reservation.video_url,
      recipe = %reservation.recipe_id,
      "reservation abandoned"
    );
    Ok(())
  }
}
