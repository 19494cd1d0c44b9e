//! Source videos and the metadata rows that tie them to recipes.
//!
//! Every URL is normalized before it is used as a reservation key, so that
//! `youtu.be/<id>`, `m.youtube.com/watch?v=<id>&t=3` and `/shorts/<id>` all
//! contend for the same reservation.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::{Error, Result};

const YOUTUBE_HOSTS: &[&str] = &[
  "youtube.com",
  "www.youtube.com",
  "m.youtube.com",
  "music.youtube.com",
];

// ─── Normalized URL ──────────────────────────────────────────────────────────

/// A normalized video URL plus the identifier of the video it points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VideoUrl {
  /// Canonical form; used as the reservation key.
  url:      String,
  video_id: String,
}

impl VideoUrl {
  /// Parse and normalize a user-supplied URL.
  pub fn parse(input: &str) -> Result<Self> {
    let trimmed = input.trim();
    let parsed = Url::parse(trimmed).map_err(|e| Error::InvalidUrl {
      url:    trimmed.to_owned(),
      reason: e.to_string(),
    })?;

    match parsed.scheme() {
      "http" | "https" => {}
      other => return Err(Error::UnsupportedScheme(other.to_owned())),
    }

    let host = parsed
      .host_str()
      .ok_or_else(|| invalid(trimmed, "missing host"))?
      .to_ascii_lowercase();

    if host == "youtu.be" {
      let id = first_segment(&parsed).ok_or_else(|| invalid(trimmed, "missing video id"))?;
      return Self::youtube(trimmed, id);
    }

    if YOUTUBE_HOSTS.contains(&host.as_str()) {
      let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();
      let id = match segments.as_slice() {
        ["watch"] => parsed
          .query_pairs()
          .find(|(k, _)| k == "v")
          .map(|(_, v)| v.into_owned()),
        ["shorts" | "embed" | "live", id, ..] => Some((*id).to_owned()),
        _ => None,
      };
      let id = id.ok_or_else(|| invalid(trimmed, "missing video id"))?;
      return Self::youtube(trimmed, &id);
    }

    Ok(Self::generic(parsed, &host))
  }

  fn youtube(input: &str, id: &str) -> Result<Self> {
    let valid = id.len() == 11
      && id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
      return Err(invalid(input, "malformed youtube video id"));
    }
    Ok(Self {
      url:      format!("https://www.youtube.com/watch?v={id}"),
      video_id: id.to_owned(),
    })
  }

  fn generic(mut parsed: Url, host: &str) -> Self {
    parsed.set_fragment(None);
    let path = parsed.path().trim_end_matches('/').to_owned();
    let video_id = path
      .rsplit('/')
      .find(|s| !s.is_empty())
      .map(str::to_owned)
      .unwrap_or_else(|| host.to_owned());
    let query = parsed
      .query()
      .map(|q| format!("?{q}"))
      .unwrap_or_default();
    let port = parsed.port().map(|p| format!(":{p}")).unwrap_or_default();
    Self {
      url: format!("{}://{host}{port}{path}{query}", parsed.scheme()),
      video_id,
    }
  }

  pub fn as_str(&self) -> &str { &self.url }

  pub fn video_id(&self) -> &str { &self.video_id }
}

impl fmt::Display for VideoUrl {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.url) }
}

fn invalid(url: &str, reason: &str) -> Error {
  Error::InvalidUrl { url: url.to_owned(), reason: reason.to_owned() }
}

fn first_segment(url: &Url) -> Option<&str> {
  url.path_segments()?.find(|s| !s.is_empty())
}

// ─── Metadata ────────────────────────────────────────────────────────────────

/// One row per creation attempt for a source URL. The most recent row for a
/// URL is the one lookups resolve against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMetadata {
  pub metadata_id: Uuid,
  pub recipe_id:   Uuid,
  pub video_url:   String,
  pub video_id:    String,
  pub banned:      bool,
  pub created_at:  DateTime<Utc>,
}
