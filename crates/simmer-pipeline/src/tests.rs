//! End-to-end pipeline tests over an in-memory `SqliteStore` and fake
//! collaborators.


use std::{sync::Arc, time::Duration};

use simmer_core::{
  ports::CaptionError,
  progress::{ProgressDetail, ProgressEntry, ProgressStep, coarse_steps},
  recipe::RecipeStatus,
  source::VideoUrl,
  store::{CreateOutcome, RecipeStore, ReserveOutcome},
};
use simmer_store_sqlite::SqliteStore;
use uuid::Uuid;

use self::fakes::{FakeCaptions, FakeGenerator, RecordingLedger};
use crate::{
  Backend, BookmarkTarget, CreateError, CreationFacade, FailureKind, IdentifyLock, PipelineConfig,
  PipelineJob, RunOutcome, Services,
};

struct TestBackend;

impl Backend for TestBackend {
  type Store = SqliteStore;
  type Ledger = RecordingLedger;
  type Captions = FakeCaptions;
  type Generator = FakeGenerator;
}

struct Harness {
  facade:    CreationFacade<TestBackend>,
  store:     Arc<SqliteStore>,
  ledger:    Arc<RecordingLedger>,
  captions:  Arc<FakeCaptions>,
  generator: Arc<FakeGenerator>,
}

async fn harness_with(captions: FakeCaptions, config: PipelineConfig) -> Harness {
  let store = Arc::new(SqliteStore::open_in_memory().await.expect("in-memory store"));
  let ledger = Arc::new(RecordingLedger::default());
  let captions = Arc::new(captions);
  let generator = Arc::new(FakeGenerator::default());
  let services = Services::<TestBackend>::new(
    store.clone(),
    ledger.clone(),
    captions.clone(),
    generator.clone(),
  );
  Harness { facade: CreationFacade::new(services, config), store, ledger, captions, generator }
}

async fn harness() -> Harness { harness_with(FakeCaptions::new(), PipelineConfig::default()).await }

const URL: &str = "https://youtu.be/dQw4w9WgXcQ";

fn user(url: &str) -> (Uuid, BookmarkTarget) {
  let id = Uuid::new_v4();
  (id, BookmarkTarget::User { user_id: id, url: url.into() })
}

impl Harness {
  /// Wait until the recipe's run has finished and released its reservation.
  async fn settle(&self, recipe_id: Uuid) -> ProgressEntry {
    let recipe = self.store.get_recipe(recipe_id).await.unwrap().expect("recipe exists");
    tokio::time::timeout(Duration::from_secs(5), async {
      loop {
        let current = self.facade.current_progress(recipe_id).await.unwrap();
        let held = self
          .store
          .reservation(&recipe.video_url)
          .await
          .unwrap()
          .is_some_and(|r| r.recipe_id == recipe_id);
        match current {
          Some(entry) if entry.is_terminal() && !held => return entry,
          _ => {}
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
      }
    })
    .await
    .expect("pipeline run did not settle")
  }

  async fn status(&self, recipe_id: Uuid) -> RecipeStatus {
    self.store.get_recipe(recipe_id).await.unwrap().unwrap().status
  }
}

/// Poll `cond` until it holds.
async fn eventually(what: &str, cond: impl Fn() -> bool) {
  tokio::time::timeout(Duration::from_secs(5), async {
    while !cond() {
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
  })
  .await
  .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

// ─── Happy path ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn bookmark_bills_once_and_completes() {
  let h = harness().await;
  let (alice, target) = user(URL);

  let id = h.facade.create_bookmark(target).await.unwrap();
  let last = h.settle(id).await;

  assert_eq!((last.step, last.detail), (ProgressStep::Finished, ProgressDetail::Finished));
  assert_eq!(h.status(id).await, RecipeStatus::Completed);
  assert_eq!(h.ledger.spends(), vec![(alice, id, 10)]);
  assert!(h.ledger.refunds().is_empty());

  let content = h.facade.content(id).await.unwrap().expect("content committed");
  assert_eq!(content.ingredients.len(), 2);
  assert_eq!(content.steps.len(), 2);
  assert_eq!(content.meta.servings, Some(1));
}

#[tokio::test]
async fn progress_follows_the_coarse_sequence() {
  let h = harness().await;
  let (_, target) = user(URL);
  let id = h.facade.create_bookmark(target).await.unwrap();
  h.settle(id).await;

  let entries = h.facade.progress(id).await.unwrap();
  let pairs: Vec<_> = entries.iter().map(|e| (e.step, e.detail)).collect();

  use ProgressDetail as D;
  use ProgressStep as S;
  assert_eq!(&pairs[..6], &[
    (S::Ready, D::Ready),
    (S::Caption, D::Started),
    (S::Caption, D::Caption),
    (S::Detail, D::Started),
    (S::Step, D::Started),
    (S::Briefing, D::Started),
  ]);
  for sub in [
    (S::Detail, D::Ingredient),
    (S::Detail, D::Tag),
    (S::Detail, D::DetailMeta),
    (S::Step, D::Step),
    (S::Briefing, D::Briefing),
  ] {
    assert!(pairs[6..11].contains(&sub), "missing {sub:?}");
  }
  assert_eq!(pairs[11], (S::Finished, D::Finished));
  assert_eq!(pairs.len(), 12);

  assert_eq!(coarse_steps(&entries), vec![
    S::Ready,
    S::Caption,
    S::Detail,
    S::Step,
    S::Briefing,
    S::Finished,
  ]);
  assert!(entries.windows(2).all(|w| w[0].sequence < w[1].sequence));
}

#[tokio::test]
async fn repeat_bookmark_is_idempotent() {
  let h = harness().await;
  let (alice, target) = user(URL);

  let first = h.facade.create_bookmark(target.clone()).await.unwrap();
  let second = h.facade.create_bookmark(target.clone()).await.unwrap();
  assert_eq!(first, second);

  h.settle(first).await;
  let third = h.facade.create_bookmark(target).await.unwrap();
  assert_eq!(first, third);

  assert_eq!(h.ledger.spends(), vec![(alice, first, 10)]);
  assert_eq!(h.store.list_history(first).await.unwrap().len(), 1);
}

#[tokio::test]
async fn equivalent_urls_resolve_to_one_recipe() {
  let h = harness().await;
  let (_, short) = user("https://youtu.be/dQw4w9WgXcQ");
  let (_, long) = user("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=42");

  let a = h.facade.create_bookmark(short).await.unwrap();
  let b = h.facade.create_bookmark(long).await.unwrap();
  assert_eq!(a, b);
}

#[tokio::test]
async fn system_target_creates_without_billing() {
  let h = harness().await;
  let id = h.facade.create_bookmark(BookmarkTarget::System { url: URL.into() }).await.unwrap();
  h.settle(id).await;

  assert_eq!(h.status(id).await, RecipeStatus::Completed);
  assert!(h.ledger.spends().is_empty());
  assert!(h.store.list_history(id).await.unwrap().is_empty());
}

// ─── Deduplication ───────────────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_users_share_one_recipe() {
  let h = harness_with(FakeCaptions::gated(), PipelineConfig::default()).await;

  let mut tasks = Vec::new();
  let mut users = Vec::new();
  for _ in 0..8 {
    let (id, target) = user(URL);
    users.push(id);
    let facade = h.facade.clone();
    tasks.push(tokio::spawn(async move { facade.create_bookmark(target).await }));
  }
  let mut ids = Vec::new();
  for task in tasks {
    ids.push(task.await.unwrap().unwrap());
  }

  let id = ids[0];
  assert!(ids.iter().all(|i| *i == id));
  assert_eq!(h.store.recipes_for_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ").await.unwrap().len(), 1);
  assert_eq!(h.store.list_history(id).await.unwrap().len(), 8);

  let mut expected: Vec<_> = users.into_iter().map(|u| (u, id, 10)).collect();
  expected.sort();
  assert_eq!(h.ledger.spends(), expected);

  h.captions.open();
  h.settle(id).await;
  assert_eq!(h.captions.calls(), 1);
}

#[tokio::test]
async fn late_joiner_attaches_to_running_creation() {
  let h = harness_with(FakeCaptions::gated(), PipelineConfig::default()).await;
  let (alice, a) = user(URL);
  let (bob, b) = user(URL);

  let first = h.facade.create_bookmark(a).await.unwrap();
  tokio::time::sleep(Duration::from_millis(5)).await;
  let second = h.facade.create_bookmark(b).await.unwrap();

  assert_eq!(first, second);
  assert_eq!(h.store.recipes_for_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ").await.unwrap().len(), 1);
  assert!(h.captions.calls() <= 1);

  h.captions.open();
  h.settle(first).await;
  assert_eq!(h.captions.calls(), 1);

  let mut expected = vec![(alice, first, 10), (bob, first, 10)];
  expected.sort();
  assert_eq!(h.ledger.spends(), expected);
}

#[tokio::test]
async fn worker_pool_bounds_concurrent_runs() {
  let config = PipelineConfig { max_concurrent_pipelines: 1, ..PipelineConfig::default() };
  let h = harness_with(FakeCaptions::gated(), config).await;

  let first = h.facade.create_bookmark(BookmarkTarget::System { url: URL.into() }).await.unwrap();
  let second = h
    .facade
    .create_bookmark(BookmarkTarget::System { url: "https://youtu.be/aaaaaaaaaaa".into() })
    .await
    .unwrap();

  tokio::time::sleep(Duration::from_millis(50)).await;
  assert_eq!(h.captions.calls(), 1);

  h.captions.open();
  h.settle(first).await;
  h.settle(second).await;
  assert_eq!(h.captions.calls(), 2);
}

// ─── Failure & recovery ──────────────────────────────────────────────────────

#[tokio::test]
async fn content_policy_bans_and_refunds_everyone() {
  let h = harness_with(FakeCaptions::gated(), PipelineConfig::default()).await;
  h.captions.fail_with(CaptionError::NotARecipe("music video".into()));
  let (alice, a) = user(URL);
  let (bob, b) = user(URL);

  let id = h.facade.create_bookmark(a).await.unwrap();
  assert_eq!(h.facade.create_bookmark(b).await.unwrap(), id);

  h.captions.open();
  let last = h.settle(id).await;
  assert!(last.is_failure());

  assert_eq!(h.status(id).await, RecipeStatus::Banned);
  let meta = h.store.latest_source("https://www.youtube.com/watch?v=dQw4w9WgXcQ").await.unwrap().unwrap();
  assert!(meta.banned);

  let mut expected = vec![(alice, id, 10), (bob, id, 10)];
  expected.sort();
  assert_eq!(h.ledger.refunds(), expected);
  assert!(h.store.list_history(id).await.unwrap().is_empty());

  let (_, carol) = user(URL);
  let err = h.facade.create_bookmark(carol).await.unwrap_err();
  assert!(matches!(err, CreateError::SubjectBanned(_)));
}

#[tokio::test]
async fn upstream_failure_allows_a_fresh_retry() {
  let h = harness().await;
  h.generator.fail("steps");
  let (alice, target) = user(URL);

  let failed = h.facade.create_bookmark(target.clone()).await.unwrap();
  assert!(h.settle(failed).await.is_failure());
  assert_eq!(h.status(failed).await, RecipeStatus::Failed);
  assert_eq!(h.ledger.refunds(), vec![(alice, failed, 10)]);
  assert!(h.facade.content(failed).await.unwrap().is_none());

  let meta = h.store.latest_source("https://www.youtube.com/watch?v=dQw4w9WgXcQ").await.unwrap().unwrap();
  assert!(!meta.banned);

  h.generator.heal();
  let retried = h.facade.create_bookmark(target).await.unwrap();
  assert_ne!(retried, failed);
  h.settle(retried).await;
  assert_eq!(h.status(retried).await, RecipeStatus::Completed);
  assert_eq!(h.ledger.spends().len(), 2);
}

#[tokio::test]
async fn failed_spend_leaves_no_history() {
  let h = harness_with(FakeCaptions::gated(), PipelineConfig::default()).await;
  let (alice, a) = user(URL);
  h.ledger.fail_spends_for(alice);

  let err = h.facade.create_bookmark(a).await.unwrap_err();
  assert!(matches!(err, CreateError::CreationFailed(_)));

  let recipes = h.store.recipes_for_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ").await.unwrap();
  assert_eq!(recipes.len(), 1);
  let id = recipes[0].recipe_id;
  assert!(h.store.list_history(id).await.unwrap().is_empty());

  let (bob, b) = user(URL);
  assert_eq!(h.facade.create_bookmark(b).await.unwrap(), id);
  assert_eq!(h.ledger.spends(), vec![(bob, id, 10)]);

  h.captions.open();
  h.settle(id).await;
  assert_eq!(h.status(id).await, RecipeStatus::Completed);
}

#[tokio::test]
async fn refund_failure_does_not_block_the_rest() {
  let h = harness_with(FakeCaptions::gated(), PipelineConfig::default()).await;
  h.captions.fail_with(CaptionError::FetchFailed("502 from caption service".into()));
  let (alice, a) = user(URL);
  let (bob, b) = user(URL);
  h.ledger.fail_refunds_for(alice);

  let id = h.facade.create_bookmark(a).await.unwrap();
  h.facade.create_bookmark(b).await.unwrap();

  h.captions.open();
  h.settle(id).await;

  assert_eq!(h.ledger.refunds(), vec![(bob, id, 10)]);
  assert!(h.store.list_history(id).await.unwrap().is_empty());
  assert_eq!(h.status(id).await, RecipeStatus::Failed);
}

#[tokio::test]
async fn retry_waits_for_recovery_to_release_the_url() {
  let h = harness().await;
  h.generator.fail("steps");
  h.ledger.refund_gate.hold();
  let (alice, a) = user(URL);

  // The failed run is parked in recovery: closed, but still reserved.
  let failed = h.facade.create_bookmark(a).await.unwrap();
  eventually("recovery to start refunding", || h.ledger.refund_gate.waiting() == 1).await;
  assert_eq!(h.status(failed).await, RecipeStatus::Failed);

  h.generator.heal();
  let (bob, b) = user(URL);
  let facade = h.facade.clone();
  let retry = tokio::spawn(async move { facade.create_bookmark(b).await });

  tokio::time::sleep(Duration::from_millis(300)).await;
  assert!(!retry.is_finished(), "retry gave up while recovery still held the url");

  h.ledger.refund_gate.release();
  let fresh = retry.await.unwrap().unwrap();
  assert_ne!(fresh, failed);
  h.settle(fresh).await;
  assert_eq!(h.status(fresh).await, RecipeStatus::Completed);
  assert_eq!(h.ledger.refunds(), vec![(alice, failed, 10)]);
  assert!(h.ledger.spends().contains(&(bob, fresh, 10)));
}

#[tokio::test]
async fn charge_landing_after_recovery_is_refunded_once() {
  let h = harness_with(FakeCaptions::gated(), PipelineConfig::default()).await;
  h.captions.fail_with(CaptionError::FetchFailed("502 from caption service".into()));
  let (bob, b) = user(URL);
  let id = h.facade.create_bookmark(b).await.unwrap();

  // Alice's row is attached but her spend has not landed yet.
  h.ledger.spend_gate.hold();
  let (alice, a) = user(URL);
  let facade = h.facade.clone();
  let late = tokio::spawn(async move { facade.create_bookmark(a).await });
  eventually("alice's spend to start", || h.ledger.spend_gate.waiting() == 1).await;

  h.captions.open();
  h.settle(id).await;
  assert_eq!(h.ledger.refunds(), vec![(bob, id, 10)], "unbilled row must not be refunded");

  h.captions.heal();
  h.ledger.spend_gate.release();
  let fresh = late.await.unwrap().unwrap();
  assert_ne!(fresh, id);
  h.settle(fresh).await;
  assert_eq!(h.status(fresh).await, RecipeStatus::Completed);

  let mut refunds = vec![(alice, id, 10), (bob, id, 10)];
  refunds.sort();
  assert_eq!(h.ledger.refunds(), refunds);
  let mut spends = vec![(alice, id, 10), (alice, fresh, 10), (bob, id, 10)];
  spends.sort();
  assert_eq!(h.ledger.spends(), spends);
  assert!(h.store.list_history(fresh).await.unwrap().iter().all(|e| e.billed));
}

#[tokio::test]
async fn invalid_url_is_a_creation_failure() {
  let h = harness().await;
  for url in ["not a url", "ftp://example.com/video"] {
    let (_, target) = user(url);
    let err = h.facade.create_bookmark(target).await.unwrap_err();
    assert!(matches!(err, CreateError::CreationFailed(_)), "{url}");
  }
  assert!(h.ledger.spends().is_empty());
}

// ─── Runner ──────────────────────────────────────────────────────────────────

async fn reserved_job(h: &Harness) -> PipelineJob {
  let source = VideoUrl::parse(URL).unwrap();
  match h.store.create_with_reservation(&source, 10).await.unwrap() {
    CreateOutcome::Created(recipe) => PipelineJob { recipe_id: recipe.recipe_id, source },
    CreateOutcome::AlreadyReserved => panic!("expected a fresh reservation"),
  }
}

#[tokio::test]
async fn runner_reports_recovery() {
  let h = harness().await;
  h.captions.fail_with(CaptionError::FetchFailed("timeout".into()));
  let job = reserved_job(&h).await;
  let alice = Uuid::new_v4();
  h.store.attach_history(alice, job.recipe_id, 10).await.unwrap();
  h.store.mark_billed(alice, job.recipe_id).await.unwrap();

  let RunOutcome::Failed(report) = h.facade.runner().run(job.clone()).await else {
    panic!("run should fail");
  };
  assert_eq!(report.kind, FailureKind::Upstream);
  assert!(!report.banned && !report.already_closed);
  assert_eq!(report.removed.len(), 1);
  assert_eq!(report.refunded, 1);
  assert_eq!(report.refund_failures, 0);
  assert!(h.store.reservation(job.source.as_str()).await.unwrap().is_none());
}

#[tokio::test]
async fn run_on_a_closed_recipe_is_superseded() {
  let h = harness().await;
  let job = reserved_job(&h).await;
  h.store.set_status(job.recipe_id, RecipeStatus::Failed).await.unwrap();

  let outcome = h.facade.runner().run(job.clone()).await;
  assert!(matches!(outcome, RunOutcome::Superseded), "{outcome:?}");
  assert_eq!(h.status(job.recipe_id).await, RecipeStatus::Failed);
  assert!(h.facade.progress(job.recipe_id).await.unwrap().is_empty());
  assert_eq!(h.captions.calls(), 0);
  assert!(h.store.reservation(job.source.as_str()).await.unwrap().is_none());
}

#[tokio::test]
async fn panicking_branch_still_releases() {
  let h = harness().await;
  h.generator.panic_on("briefing");
  let job = reserved_job(&h).await;

  let RunOutcome::Failed(report) = h.facade.runner().run(job.clone()).await else {
    panic!("run should fail");
  };
  assert_eq!(report.kind, FailureKind::Unclassified);
  assert_eq!(h.status(job.recipe_id).await, RecipeStatus::Failed);
  assert!(h.store.reservation(job.source.as_str()).await.unwrap().is_none());
}

#[tokio::test]
async fn slow_caption_times_out_as_upstream() {
  let config = PipelineConfig { stage_timeout_secs: 1, ..PipelineConfig::default() };
  let h = harness_with(FakeCaptions::new(), config).await;
  h.captions.delay(Duration::from_secs(3));
  let job = reserved_job(&h).await;

  let RunOutcome::Failed(report) = h.facade.runner().run(job).await else {
    panic!("run should time out");
  };
  assert_eq!(report.kind, FailureKind::Upstream);
}

// ─── Operator recovery ───────────────────────────────────────────────────────

#[tokio::test]
async fn sweep_recovers_a_crashed_run() {
  let h = harness().await;
  // A reservation with no run behind it, as left by a crashed process.
  let job = reserved_job(&h).await;
  let alice = Uuid::new_v4();
  h.store.attach_history(alice, job.recipe_id, 10).await.unwrap();
  h.store.mark_billed(alice, job.recipe_id).await.unwrap();

  tokio::time::sleep(Duration::from_millis(5)).await;
  let swept = h.facade.sweep_stale(chrono::Duration::zero()).await.unwrap();
  assert_eq!(swept.len(), 1);
  assert_eq!(swept[0].recipe_id, job.recipe_id);

  assert_eq!(h.status(job.recipe_id).await, RecipeStatus::Failed);
  assert_eq!(h.ledger.refunds(), vec![(alice, job.recipe_id, 10)]);
  assert!(h.store.reservation(job.source.as_str()).await.unwrap().is_none());

  let (_, target) = user(URL);
  let fresh = h.facade.create_bookmark(target).await.unwrap();
  assert_ne!(fresh, job.recipe_id);
}

#[tokio::test]
async fn sweep_leaves_fresh_reservations_alone() {
  let h = harness().await;
  let job = reserved_job(&h).await;

  let swept = h.facade.sweep_stale(chrono::Duration::hours(1)).await.unwrap();
  assert!(swept.is_empty());
  assert!(h.store.reservation(job.source.as_str()).await.unwrap().is_some());
}

#[tokio::test]
async fn release_abandoned_frees_the_url() {
  let h = harness().await;
  let job = reserved_job(&h).await;

  let released = h.facade.release_abandoned(URL).await.unwrap().expect("reservation held");
  assert_eq!(released.recipe_id, job.recipe_id);
  assert_eq!(h.status(job.recipe_id).await, RecipeStatus::Failed);
  assert!(h.facade.release_abandoned(URL).await.unwrap().is_none());
}

#[tokio::test]
async fn abandoned_run_never_overwrites_its_recovery() {
  let h = harness_with(FakeCaptions::gated(), PipelineConfig::default()).await;
  let job = reserved_job(&h).await;
  let id = job.recipe_id;
  let alice = Uuid::new_v4();
  h.store.attach_history(alice, id, 10).await.unwrap();
  h.store.mark_billed(alice, id).await.unwrap();

  // The run is alive but parked on the caption fetch when an operator
  // abandons it.
  let run = h.facade.runner().submit(job);
  eventually("the run to reach the caption stage", || h.captions.calls() == 1).await;
  h.facade.release_abandoned(URL).await.unwrap().expect("reservation held");

  h.captions.open();
  let outcome = run.await.unwrap();
  assert!(matches!(outcome, RunOutcome::Superseded), "{outcome:?}");

  assert_eq!(h.status(id).await, RecipeStatus::Failed);
  assert!(h.facade.content(id).await.unwrap().is_none());
  assert_eq!(h.ledger.refunds(), vec![(alice, id, 10)]);

  let entries = h.facade.progress(id).await.unwrap();
  let last = entries.last().unwrap();
  assert_eq!((last.step, last.detail), (ProgressStep::Finished, ProgressDetail::Failed));
  assert_eq!(entries.iter().filter(|e| e.is_terminal()).count(), 1);
}

#[tokio::test]
async fn identify_lock_release_is_scoped_to_holder() {
  let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
  let lock = IdentifyLock::new(store);
  let source = VideoUrl::parse(URL).unwrap();
  let holder = Uuid::new_v4();

  assert!(matches!(lock.reserve(&source, holder).await.unwrap(), ReserveOutcome::Acquired(_)));
  let ReserveOutcome::AlreadyReserved { holder: seen } =
    lock.reserve(&source, Uuid::new_v4()).await.unwrap()
  else {
    panic!("second reserve should conflict");
  };
  assert_eq!(seen, Some(holder));

  assert!(!lock.release(source.as_str(), Uuid::new_v4()).await);
  assert!(lock.holder(source.as_str()).await.unwrap().is_some());

  let forced = lock.force_release(source.as_str()).await.unwrap().unwrap();
  assert_eq!(forced.recipe_id, holder);
  assert!(lock.holder(source.as_str()).await.unwrap().is_none());
  assert!(!lock.release(source.as_str(), holder).await);
}
