//! HTTP clients for the caption and generation services.
//!
//! Captions: `GET {caption_url}/captions/{video_id}` returns a [`Caption`];
//! `422 Unprocessable Entity` means the video is readable but not a recipe.
//!
//! Generation: `POST {generation_url}/generate/{part}` with
//! `{ "video_id", "caption" }` returns the part as JSON.

use std::time::Duration;

use anyhow::Context as _;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use simmer_core::{
  ports::{Caption, CaptionClient, CaptionError, GenerationClient, GenerationError},
  recipe::{DetailMeta, Ingredient, RecipeStep},
};

use crate::settings::ServicesConfig;

/// Shared HTTP plumbing. Cheap to clone; the inner [`reqwest::Client`] is
/// `Arc`-based.
#[derive(Clone)]
struct Http {
  client:  Client,
  api_key: Option<String>,
}

impl Http {
  fn new(config: &ServicesConfig) -> anyhow::Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()
      .context("failed to build HTTP client")?;
    Ok(Self { client, api_key: config.api_key.clone() })
  }

  fn auth(&self, req: RequestBuilder) -> RequestBuilder {
    match &self.api_key {
      Some(key) if !key.is_empty() => req.bearer_auth(key),
      _ => req,
    }
  }
}

fn endpoint(base: &str, path: &str) -> String { format!("{}{path}", base.trim_end_matches('/')) }

// ─── Captions ────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct HttpCaptionClient {
  http:     Http,
  base_url: String,
}

impl HttpCaptionClient {
  pub fn new(config: &ServicesConfig) -> anyhow::Result<Self> {
    Ok(Self { http: Http::new(config)?, base_url: config.caption_url.clone() })
  }
}

impl CaptionClient for HttpCaptionClient {
  async fn fetch(&self, video_id: &str) -> Result<Caption, CaptionError> {
    let url = endpoint(&self.base_url, &format!("/captions/{video_id}"));
    let resp = self
      .http
      .auth(self.http.client.get(&url))
      .send()
      .await
      .map_err(|e| CaptionError::FetchFailed(format!("GET {url}: {e}")))?;

    match resp.status() {
      StatusCode::UNPROCESSABLE_ENTITY => {
        let reason = resp.text().await.unwrap_or_default();
        Err(CaptionError::NotARecipe(reason))
      }
      status if status.is_success() => resp
        .json()
        .await
        .map_err(|e| CaptionError::FetchFailed(format!("deserialising caption: {e}"))),
      status => Err(CaptionError::FetchFailed(format!("GET {url} → {status}"))),
    }
  }
}

// ─── Generation ──────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct GenerateRequest<'a> {
  video_id: &'a str,
  caption:  &'a Caption,
}

#[derive(Clone)]
pub struct HttpGenerationClient {
  http:     Http,
  base_url: String,
}

impl HttpGenerationClient {
  pub fn new(config: &ServicesConfig) -> anyhow::Result<Self> {
    Ok(Self { http: Http::new(config)?, base_url: config.generation_url.clone() })
  }

  async fn generate<T: DeserializeOwned>(
    &self,
    part: &str,
    video_id: &str,
    caption: &Caption,
  ) -> Result<T, GenerationError> {
    let url = endpoint(&self.base_url, &format!("/generate/{part}"));
    let resp = self
      .http
      .auth(self.http.client.post(&url))
      .json(&GenerateRequest { video_id, caption })
      .send()
      .await
      .map_err(|e| GenerationError::Request(format!("POST {url}: {e}")))?;

    if !resp.status().is_success() {
      return Err(GenerationError::Request(format!("POST {url} → {}", resp.status())));
    }
    resp
      .json()
      .await
      .map_err(|e| GenerationError::InvalidResponse(format!("{part}: {e}")))
  }
}

impl GenerationClient for HttpGenerationClient {
  async fn ingredients(
    &self,
    video_id: &str,
    caption: &Caption,
  ) -> Result<Vec<Ingredient>, GenerationError> {
    self.generate("ingredients", video_id, caption).await
  }

  async fn tags(&self, video_id: &str, caption: &Caption) -> Result<Vec<String>, GenerationError> {
    self.generate("tags", video_id, caption).await
  }

  async fn detail_meta(
    &self,
    video_id: &str,
    caption: &Caption,
  ) -> Result<DetailMeta, GenerationError> {
    self.generate("detail_meta", video_id, caption).await
  }

  async fn steps(
    &self,
    video_id: &str,
    caption: &Caption,
  ) -> Result<Vec<RecipeStep>, GenerationError> {
    self.generate("steps", video_id, caption).await
  }

  async fn briefing(
    &self,
    video_id: &str,
    caption: &Caption,
  ) -> Result<Vec<String>, GenerationError> {
    self.generate("briefing", video_id, caption).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn endpoint_joins_without_double_slash() {
    assert_eq!(endpoint("http://gen.local/", "/generate/tags"), "http://gen.local/generate/tags");
    assert_eq!(endpoint("http://gen.local", "/captions/abc"), "http://gen.local/captions/abc");
  }

  #[test]
  fn generate_request_shape() {
    let caption = Caption { text: "whisk".into(), language: None };
    let body = serde_json::to_value(GenerateRequest { video_id: "abc", caption: &caption }).unwrap();
    assert_eq!(body["video_id"], "abc");
    assert_eq!(body["caption"]["text"], "whisk");
  }
}
