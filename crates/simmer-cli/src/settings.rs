//! Configuration for the `simmer` binary.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Deserialize;
use simmer_pipeline::PipelineConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct SimmerConfig {
  pub store_path: PathBuf,
  #[serde(default)]
  pub pipeline:   PipelineConfig,
  pub services:   ServicesConfig,
}

/// Where the caption and generation services live.
#[derive(Debug, Clone, Deserialize)]
pub struct ServicesConfig {
  pub caption_url:    String,
  pub generation_url: String,
  /// Sent as a bearer token when set.
  #[serde(default)]
  pub api_key:        Option<String>,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs:   u64,
}

fn default_timeout_secs() -> u64 { 60 }

impl SimmerConfig {
  /// Layer `path` (optional) under `SIMMER_`-prefixed environment variables.
  ///
  /// Nested keys use a double underscore: `SIMMER_PIPELINE__CREDIT_COST=5`.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(
        config::Environment::with_prefix("SIMMER")
          .prefix_separator("_")
          .separator("__")
          .try_parsing(true),
      )
      .build()
      .context("failed to read config file")?;
    Self::from_settings(settings)
  }

  fn from_settings(settings: config::Config) -> anyhow::Result<Self> {
    let mut cfg: Self =
      settings.try_deserialize().context("failed to deserialise SimmerConfig")?;
    cfg.store_path = expand_tilde(&cfg.store_path);
    Ok(cfg)
  }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse(toml: &str) -> anyhow::Result<SimmerConfig> {
    let settings = config::Config::builder()
      .add_source(config::File::from_str(toml, config::FileFormat::Toml))
      .build()?;
    SimmerConfig::from_settings(settings)
  }

  #[test]
  fn pipeline_section_is_optional() {
    let cfg = parse(
      r#"
        store_path = "/var/lib/simmer/simmer.db"

        [services]
        caption_url = "http://captions.local"
        generation_url = "http://gen.local"
      "#,
    )
    .unwrap();

    assert_eq!(cfg.pipeline.max_concurrent_pipelines, 4);
    assert_eq!(cfg.pipeline.credit_cost, 10);
    assert_eq!(cfg.services.timeout_secs, 60);
    assert!(cfg.services.api_key.is_none());
  }

  #[test]
  fn pipeline_overrides_merge_with_defaults() {
    let cfg = parse(
      r#"
        store_path = "simmer.db"

        [pipeline]
        credit_cost = 25
        stage_timeout_secs = 30

        [services]
        caption_url = "http://captions.local"
        generation_url = "http://gen.local"
        api_key = "secret"
      "#,
    )
    .unwrap();

    assert_eq!(cfg.pipeline.credit_cost, 25);
    assert_eq!(cfg.pipeline.stage_timeout_secs, 30);
    assert_eq!(cfg.pipeline.max_reresolve, 3);
    assert_eq!(cfg.pipeline.reservation_wait_secs, 30);
    assert_eq!(cfg.services.api_key.as_deref(), Some("secret"));
  }

  #[test]
  fn missing_services_is_an_error() {
    assert!(parse(r#"store_path = "simmer.db""#).is_err());
  }

  #[test]
  fn tilde_expands_to_home() {
    let Ok(home) = std::env::var("HOME") else { return };
    assert_eq!(expand_tilde(Path::new("~/simmer.db")), PathBuf::from(home).join("simmer.db"));
    assert_eq!(expand_tilde(Path::new("/abs/simmer.db")), PathBuf::from("/abs/simmer.db"));
  }
}
