//! `simmer`: operator CLI for the recipe-creation pipeline.
//!
//! Reads `simmer.toml` (or the path given with `--config`), opens the SQLite
//! store, and either runs a creation in-process or inspects and repairs the
//! store.
//!
//! ```text
//! simmer create --url https://youtu.be/dQw4w9WgXcQ --user <UUID>
//! simmer sweep --older-than-secs 900
//! ```

mod client;
mod settings;

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use simmer_core::{progress::ProgressEntry, store::RecipeStore};
use simmer_pipeline::{Backend, BookmarkTarget, CreationFacade, Services};
use simmer_store_sqlite::SqliteStore;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::{
  client::{HttpCaptionClient, HttpGenerationClient},
  settings::SimmerConfig,
};

#[derive(Parser)]
#[command(author, version, about = "Simmer recipe-creation pipeline")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "simmer.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Bookmark a video and wait for its recipe to finish.
  Create {
    #[arg(long)]
    url:  String,
    /// Bill this user; omit for a system creation.
    #[arg(long)]
    user: Option<Uuid>,
  },
  /// Print a recipe's progress log.
  Progress { recipe: Uuid },
  /// Add credit to a user's local balance.
  Grant {
    #[arg(long)]
    user:   Uuid,
    #[arg(long)]
    amount: i64,
  },
  Balance {
    #[arg(long)]
    user: Uuid,
  },
  /// Release the reservation for a URL whose run was lost to a crash.
  Release {
    #[arg(long)]
    url: String,
  },
  /// Recover and release every reservation older than the given age.
  Sweep {
    #[arg(long, default_value_t = 3600)]
    older_than_secs: i64,
  },
}

/// Production wiring: one SQLite file backs both the store and the ledger.
struct Live;

impl Backend for Live {
  type Store = SqliteStore;
  type Ledger = SqliteStore;
  type Captions = HttpCaptionClient;
  type Generator = HttpGenerationClient;
}

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let cfg = SimmerConfig::load(&cli.config)?;

  let store = SqliteStore::open(&cfg.store_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", cfg.store_path))?;
  let store = Arc::new(store);

  match cli.command {
    Command::Create { url, user } => {
      let facade = facade(&cfg, store)?;
      let target = match user {
        Some(user_id) => BookmarkTarget::User { user_id, url },
        None => BookmarkTarget::System { url },
      };
      let recipe_id = facade.create_bookmark(target).await.context("create_bookmark failed")?;
      println!("recipe {recipe_id}");
      wait_for(&facade, recipe_id).await?;
    }

    Command::Progress { recipe } => {
      let entries = store.list_progress(recipe).await.context("failed to read progress")?;
      if entries.is_empty() {
        println!("no progress recorded for {recipe}");
      }
      entries.iter().for_each(print_entry);
    }

    Command::Grant { user, amount } => {
      store.grant(user, amount).await.context("grant failed")?;
      println!("{user}: {}", store.balance(user).await?);
    }

    Command::Balance { user } => {
      println!("{user}: {}", store.balance(user).await?);
    }

    Command::Release { url } => {
      let facade = facade(&cfg, store)?;
      match facade.release_abandoned(&url).await.context("release failed")? {
        Some(r) => println!("released {} (recipe {}, reserved {})", r.video_url, r.recipe_id, r.reserved_at),
        None => println!("no reservation held for {url}"),
      }
    }

    Command::Sweep { older_than_secs } => {
      let facade = facade(&cfg, store)?;
      let swept = facade
        .sweep_stale(chrono::Duration::seconds(older_than_secs))
        .await
        .context("sweep failed")?;
      for r in &swept {
        println!("released {} (recipe {}, reserved {})", r.video_url, r.recipe_id, r.reserved_at);
      }
      println!("{} reservation(s) swept", swept.len());
    }
  }

  Ok(())
}

fn facade(cfg: &SimmerConfig, store: Arc<SqliteStore>) -> anyhow::Result<CreationFacade<Live>> {
  let services = Services::<Live>::new(
    store.clone(),
    store,
    Arc::new(HttpCaptionClient::new(&cfg.services)?),
    Arc::new(HttpGenerationClient::new(&cfg.services)?),
  );
  Ok(CreationFacade::new(services, cfg.pipeline.clone()))
}

/// Print progress as it arrives until the run has finished and released its
/// reservation. Recovery refunds after the terminal entry, so exiting on the
/// entry alone could cut it short.
async fn wait_for(facade: &CreationFacade<Live>, recipe_id: Uuid) -> anyhow::Result<()> {
  let recipe = facade.recipe(recipe_id).await?.context("recipe vanished")?;
  let mut printed = 0;

  loop {
    let entries = facade.progress(recipe_id).await?;
    entries.iter().skip(printed).for_each(print_entry);
    printed = entries.len();

    let finished = entries.last().is_some_and(ProgressEntry::is_terminal);
    let held = facade
      .identify()
      .holder(&recipe.video_url)
      .await?
      .is_some_and(|r| r.recipe_id == recipe_id);
    if finished && !held {
      break;
    }
    tokio::time::sleep(POLL_INTERVAL).await;
  }

  let status = facade.recipe(recipe_id).await?.map(|r| r.status);
  match (status, facade.content(recipe_id).await?) {
    (_, Some(content)) => {
      println!("{}", content.meta.description);
      for step in &content.steps {
        println!("  {}. {}", step.order, step.text);
      }
    }
    (Some(status), None) => println!("recipe {recipe_id} ended {status}"),
    (None, None) => {}
  }
  Ok(())
}

fn print_entry(e: &ProgressEntry) {
  println!("{:>5}  {}  {}/{}", e.sequence, e.recorded_at.to_rfc3339(), e.step, e.detail);
}
