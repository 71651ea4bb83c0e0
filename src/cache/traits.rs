//! Core traits and types for the offline stores.

use chrono::{DateTime, Utc};
use color_eyre::Result;

use crate::net::{RequestKey, Response};

/// A stored API payload from the local response store.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedApiPayload {
  /// Request URL the payload was recorded for
  pub url: String,
  /// JSON-serialized response body
  pub data: String,
  /// When the payload was written (informational, never used for expiry)
  pub timestamp: DateTime<Utc>,
}

impl CachedApiPayload {
  /// Whether the payload holds a value worth serving.
  ///
  /// `null`, `false`, `0` and `""` count as nothing cached.
  pub fn is_usable(&self) -> bool {
    match serde_json::from_str::<serde_json::Value>(&self.data) {
      Ok(serde_json::Value::Null) | Ok(serde_json::Value::Bool(false)) => false,
      Ok(serde_json::Value::Number(n)) => n.as_f64() != Some(0.0),
      Ok(serde_json::Value::String(s)) => !s.is_empty(),
      Ok(_) => true,
      Err(_) => false,
    }
  }
}

/// Trait for cache storage backends.
///
/// Covers two independent stores: the static asset cache (full responses,
/// grouped by cache generation) and the local response store (JSON payloads
/// keyed by URL). Both are last-write-wins per key.
pub trait CacheStorage: Send + Sync {
  /// Store a response under `generation`, replacing any previous entry for the key.
  fn put_response(&self, generation: &str, key: &RequestKey, response: &Response) -> Result<()>;

  /// Look up a response in `generation`.
  fn match_response(&self, generation: &str, key: &RequestKey) -> Result<Option<Response>>;

  /// All generations that currently hold at least one entry.
  fn generations(&self) -> Result<Vec<String>>;

  /// Delete every entry of a generation. Returns whether anything was removed.
  fn delete_generation(&self, generation: &str) -> Result<bool>;

  /// Record the JSON payload of a successful API response.
  fn put_payload(&self, url: &str, data: &str) -> Result<()>;

  /// Get the last recorded payload for `url`.
  fn get_payload(&self, url: &str) -> Result<Option<CachedApiPayload>>;
}

#[cfg(test)]
mod tests {
  use super::*;

  fn payload(data: &str) -> CachedApiPayload {
    CachedApiPayload {
      url: "http://localhost:3000/api/x".to_string(),
      data: data.to_string(),
      timestamp: Utc::now(),
    }
  }

  #[test]
  fn falsy_payloads_are_not_usable() {
    for data in ["null", "false", "0", "0.0", "\"\""] {
      assert!(!payload(data).is_usable(), "{} should be unusable", data);
    }
  }

  #[test]
  fn truthy_payloads_are_usable() {
    for data in ["{}", "[]", "true", "1", "\"x\"", r#"{"success":true}"#] {
      assert!(payload(data).is_usable(), "{} should be usable", data);
    }
  }
}
