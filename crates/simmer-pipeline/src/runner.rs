//! The pipeline runner.
//!
//! A run fetches the caption, then fans out into the detail, step and
//! briefing branches and joins them. Nothing is committed until every branch
//! has produced its slot; any failure hands the recipe to recovery instead.
//! A run whose recipe was closed under it (an operator abandoned it) stops at
//! its next write without committing or recovering. The identify reservation
//! is released on every exit.

use std::{future::Future, sync::Arc, time::Duration};

use simmer_core::{
  ports::{Caption, CaptionClient, GenerationClient, GenerationError},
  progress::{ProgressDetail, ProgressStep},
  recipe::{DetailMeta, Ingredient, RecipeContent, RecipeStatus, RecipeStep},
  source::VideoUrl,
  store::RecipeStore,
};
use tokio::{sync::Semaphore, task::JoinError};
use tracing::Instrument;
use uuid::Uuid;

use crate::{
  config::PipelineConfig,
  context::{Backend, Services},
  error::{PipelineFailure, Stage},
  identify::IdentifyLock,
  progress::ProgressTracker,
  recovery::{RecoveryOrchestrator, RecoveryReport},
};

/// One unit of background work: generate the content for a reserved recipe.
#[derive(Debug, Clone)]
pub struct PipelineJob {
  pub recipe_id: Uuid,
  pub source:    VideoUrl,
}

#[derive(Debug)]
pub enum RunOutcome {
  Completed,
  Failed(RecoveryReport),
  /// The recipe was closed elsewhere while the run was live; its results
  /// were discarded.
  Superseded,
}

/// Why a run stopped short of committing.
#[derive(Debug)]
enum Halt {
  Failed(PipelineFailure),
  /// The recipe is terminal or its progress log already finished.
  Superseded,
}

impl From<PipelineFailure> for Halt {
  fn from(failure: PipelineFailure) -> Self { Self::Failed(failure) }
}

pub struct PipelineRunner<B: Backend> {
  services:      Services<B>,
  identify:      IdentifyLock<B::Store>,
  progress:      ProgressTracker<B::Store>,
  recovery:      RecoveryOrchestrator<B>,
  permits:       Arc<Semaphore>,
  stage_timeout: Duration,
}

impl<B: Backend> Clone for PipelineRunner<B> {
  fn clone(&self) -> Self {
    Self {
      services:      self.services.clone(),
      identify:      self.identify.clone(),
      progress:      self.progress.clone(),
      recovery:      self.recovery.clone(),
      permits:       Arc::clone(&self.permits),
      stage_timeout: self.stage_timeout,
    }
  }
}

impl<B: Backend> PipelineRunner<B> {
  pub fn new(services: Services<B>, config: &PipelineConfig) -> Self {
    Self {
      identify: IdentifyLock::new(services.store.clone()),
      progress: ProgressTracker::new(services.store.clone()),
      recovery: RecoveryOrchestrator::new(services.clone()),
      permits: Arc::new(Semaphore::new(config.worker_permits())),
      stage_timeout: config.stage_timeout(),
      services,
    }
  }

  /// Dispatch `job` onto the runtime and return immediately.
  ///
  /// The handle may be dropped; the run proceeds either way.
  pub fn submit(&self, job: PipelineJob) -> tokio::task::JoinHandle<RunOutcome> {
    let this = self.clone();
    tokio::spawn(async move { this.run(job).await })
  }

  /// Run `job` to completion on the current task, waiting for a worker permit
  /// first.
  pub async fn run(&self, job: PipelineJob) -> RunOutcome {
    let span = tracing::info_span!("pipeline", recipe = %job.recipe_id, url = %job.source);

    async move {
      // The semaphore is never closed, so acquisition only fails if that
      // changes; run unthrottled rather than dropping the job.
      let _permit = match Arc::clone(&self.permits).acquire_owned().await {
        Ok(permit) => Some(permit),
        Err(e) => {
          tracing::warn!(error = %e, "worker pool unavailable; running unthrottled");
          None
        }
      };

      // The work runs in its own task so a panic surfaces as a `JoinError`
      // here instead of unwinding past the release below.
      let this = self.clone();
      let work = job.clone();
      let handle =
        tokio::spawn(async move { this.execute(&work).await }.instrument(tracing::Span::current()));
      let result = handle.await.unwrap_or_else(|e| Err(aborted(e).into()));

      let outcome = match result {
        Ok(()) => {
          tracing::info!("recipe completed");
          RunOutcome::Completed
        }
        Err(Halt::Superseded) => {
          tracing::warn!("recipe closed while the run was live; results discarded");
          RunOutcome::Superseded
        }
        Err(Halt::Failed(failure)) => {
          tracing::warn!(kind = %failure.kind(), error = %failure, "pipeline failed");
          let report = self.recovery.recover(job.recipe_id, &failure, job.source.as_str()).await;
          RunOutcome::Failed(report)
        }
      };

      self.identify.release(job.source.as_str(), job.recipe_id).await;
      outcome
    }
    .instrument(span)
    .await
  }

  async fn execute(&self, job: &PipelineJob) -> Result<(), Halt> {
    let recipe_id = job.recipe_id;
    let store = &self.services.store;

    let started = store
      .set_status(recipe_id, RecipeStatus::InProgress)
      .await
      .map_err(PipelineFailure::store)?;
    if !started {
      return Err(Halt::Superseded);
    }
    self.mark(recipe_id, ProgressStep::Ready, ProgressDetail::Ready).await?;

    // ── Caption ───────────────────────────────────────────────────────────
    self.mark(recipe_id, ProgressStep::Caption, ProgressDetail::Started).await?;
    let video_id: Arc<str> = Arc::from(job.source.video_id());
    let captions = &self.services.captions;
    let caption = self
      .bounded(Stage::Caption, async {
        captions.fetch(&video_id).await.map_err(PipelineFailure::from)
      })
      .await?;
    self.mark(recipe_id, ProgressStep::Caption, ProgressDetail::Caption).await?;

    // ── Fan out ───────────────────────────────────────────────────────────
    for step in [ProgressStep::Detail, ProgressStep::Step, ProgressStep::Briefing] {
      self.mark(recipe_id, step, ProgressDetail::Started).await?;
    }

    let caption = Arc::new(caption);
    let detail = tokio::spawn(
      self
        .clone()
        .detail_branch(recipe_id, video_id.clone(), caption.clone())
        .in_current_span(),
    );
    let steps = tokio::spawn(
      self
        .clone()
        .steps_branch(recipe_id, video_id.clone(), caption.clone())
        .in_current_span(),
    );
    let briefing = tokio::spawn(
      self.clone().briefing_branch(recipe_id, video_id, caption).in_current_span(),
    );
    let (detail, steps, briefing) = tokio::join!(detail, steps, briefing);

    let slots = GenerationSlots {
      detail:   joined(detail),
      steps:    joined(steps),
      briefing: joined(briefing),
    };
    let content = slots.into_content()?;

    // ── Commit ────────────────────────────────────────────────────────────
    let committed = store.complete(recipe_id, content).await.map_err(PipelineFailure::store)?;
    if !committed {
      return Err(Halt::Superseded);
    }

    // The recipe is committed at this point; failing the run now would
    // refund users for content they can read.
    match self
      .progress
      .record(recipe_id, ProgressStep::Finished, ProgressDetail::Finished)
      .await
    {
      Ok(Some(_)) => {}
      Ok(None) => tracing::warn!("progress already finished for a committed recipe"),
      Err(e) => tracing::error!(error = %e, "failed to record completion progress"),
    }
    Ok(())
  }

  // ─── Branches ──────────────────────────────────────────────────────────────

  async fn detail_branch(
    self,
    recipe_id: Uuid,
    video_id: Arc<str>,
    caption: Arc<Caption>,
  ) -> Result<DetailParts, Halt> {
    let generator = &self.services.generator;
    let (ingredients, tags, meta) = tokio::join!(
      self.generate(
        recipe_id,
        Stage::Detail,
        ProgressDetail::Ingredient,
        generator.ingredients(&video_id, &caption),
      ),
      self.generate(
        recipe_id,
        Stage::Detail,
        ProgressDetail::Tag,
        generator.tags(&video_id, &caption),
      ),
      self.generate(
        recipe_id,
        Stage::Detail,
        ProgressDetail::DetailMeta,
        generator.detail_meta(&video_id, &caption),
      ),
    );
    Ok(DetailParts { ingredients: ingredients?, tags: tags?, meta: meta? })
  }

  async fn steps_branch(
    self,
    recipe_id: Uuid,
    video_id: Arc<str>,
    caption: Arc<Caption>,
  ) -> Result<Vec<RecipeStep>, Halt> {
    let generator = &self.services.generator;
    self
      .generate(recipe_id, Stage::Step, ProgressDetail::Step, generator.steps(&video_id, &caption))
      .await
  }

  async fn briefing_branch(
    self,
    recipe_id: Uuid,
    video_id: Arc<str>,
    caption: Arc<Caption>,
  ) -> Result<Vec<String>, Halt> {
    let generator = &self.services.generator;
    self
      .generate(
        recipe_id,
        Stage::Briefing,
        ProgressDetail::Briefing,
        generator.briefing(&video_id, &caption),
      )
      .await
  }

  // ─── Helpers ───────────────────────────────────────────────────────────────

  /// Await one generation call under the stage timeout, then record `detail`
  /// against the stage's progress step.
  async fn generate<T>(
    &self,
    recipe_id: Uuid,
    stage: Stage,
    detail: ProgressDetail,
    call: impl Future<Output = Result<T, GenerationError>>,
  ) -> Result<T, Halt> {
    let value = self
      .bounded(stage, async { call.await.map_err(|e| PipelineFailure::generation(stage, e)) })
      .await?;
    self.mark(recipe_id, progress_step(stage), detail).await?;
    Ok(value)
  }

  async fn bounded<T>(
    &self,
    stage: Stage,
    call: impl Future<Output = Result<T, PipelineFailure>>,
  ) -> Result<T, PipelineFailure> {
    match tokio::time::timeout(self.stage_timeout, call).await {
      Ok(result) => result,
      Err(_) => Err(PipelineFailure::upstream(
        stage,
        format!("timed out after {}s", self.stage_timeout.as_secs_f64()),
      )),
    }
  }

  /// Record progress, halting the run once recovery has finished the log.
  async fn mark(
    &self,
    recipe_id: Uuid,
    step: ProgressStep,
    detail: ProgressDetail,
  ) -> Result<(), Halt> {
    self
      .progress
      .record(recipe_id, step, detail)
      .await
      .map_err(PipelineFailure::store)?
      .map(drop)
      .ok_or(Halt::Superseded)
  }
}

fn progress_step(stage: Stage) -> ProgressStep {
  match stage {
    Stage::Caption => ProgressStep::Caption,
    Stage::Detail => ProgressStep::Detail,
    Stage::Step => ProgressStep::Step,
    Stage::Briefing => ProgressStep::Briefing,
  }
}

fn aborted(e: JoinError) -> PipelineFailure {
  if e.is_panic() {
    PipelineFailure::Unclassified("pipeline task panicked".to_owned())
  } else {
    PipelineFailure::Unclassified(format!("pipeline task aborted: {e}"))
  }
}

fn joined<T>(result: Result<Result<T, Halt>, JoinError>) -> Result<T, Halt> {
  result.unwrap_or_else(|e| Err(aborted(e).into()))
}

// ─── Aggregation ─────────────────────────────────────────────────────────────

struct DetailParts {
  ingredients: Vec<Ingredient>,
  tags:        Vec<String>,
  meta:        DetailMeta,
}

/// The three branch results. Content exists only when every slot holds a
/// value.
struct GenerationSlots {
  detail:   Result<DetailParts, Halt>,
  steps:    Result<Vec<RecipeStep>, Halt>,
  briefing: Result<Vec<String>, Halt>,
}

impl GenerationSlots {
  /// Returns the first failure in branch order; later ones are logged.
  fn into_content(self) -> Result<RecipeContent, Halt> {
    match (self.detail, self.steps, self.briefing) {
      (Ok(detail), Ok(steps), Ok(briefing)) => Ok(RecipeContent {
        ingredients: detail.ingredients,
        tags: detail.tags,
        meta: detail.meta,
        steps,
        briefing,
      }),
      (detail, steps, briefing) => {
        let mut failures =
          [detail.err(), steps.err(), briefing.err()].into_iter().flatten();
        let first = failures.next().unwrap_or_else(|| {
          PipelineFailure::Unclassified("branch failed without error".into()).into()
        });
        for other in failures {
          tracing::debug!(error = ?other, "additional branch failure discarded");
        }
        Err(first)
      }
    }
  }
}
