//! Cache layer that orchestrates caching strategies around network fetching.

use color_eyre::Result;
use serde::de::IgnoredAny;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::traits::CacheStorage;
use crate::net::{Request, RequestKey, Response};

const EMPTY_LIST_BODY: &str = r#"{"success":true,"messages":[]}"#;
const OFFLINE_BODY: &str = r#"{"success":false,"message":"Offline"}"#;

/// Cache layer that manages caching logic and network fetching.
///
/// Storage failures never escape this layer: they are logged and treated
/// as a cache miss (reads) or silently dropped (writes).
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
  /// Generation that static assets are read from and written to
  generation: String,
  /// Background payload writes not yet joined
  writes: Arc<Mutex<JoinSet<()>>>,
}

impl<S: CacheStorage + 'static> CacheLayer<S> {
  pub fn new(storage: Arc<S>, generation: impl Into<String>) -> Self {
    Self {
      storage,
      generation: generation.into(),
      writes: Arc::new(Mutex::new(JoinSet::new())),
    }
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  /// Look up the static asset cache, logging storage errors as misses.
  pub fn lookup(&self, key: &RequestKey) -> Option<Response> {
    match self.storage.match_response(&self.generation, key) {
      Ok(hit) => hit,
      Err(e) => {
        warn!(url = %key.url, error = %e, "asset cache read failed");
        None
      }
    }
  }

  /// Write to the static asset cache, logging storage errors.
  pub fn remember(&self, key: &RequestKey, response: &Response) {
    // Partial responses are never cached
    if response.status == 206 {
      return;
    }
    let stored = response.without_cookies();
    if let Err(e) = self.storage.put_response(&self.generation, key, &stored) {
      warn!(url = %key.url, error = %e, "asset cache write failed");
    }
  }

  /// Fetch with cache-first strategy.
  ///
  /// 1. Serve from cache if present, without touching the network
  /// 2. Otherwise fetch and store a copy
  /// 3. On network failure, navigations get the offline page; anything else fails
  pub async fn cache_first<F, Fut>(
    &self,
    request: &Request,
    offline_page: &RequestKey,
    fetcher: F,
  ) -> Result<Response>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response>>,
  {
    let key = request.key();
    if let Some(cached) = self.lookup(&key) {
      debug!(url = %key.url, "cache-first hit");
      return Ok(cached);
    }

    match fetcher().await {
      Ok(response) => {
        self.remember(&key, &response);
        Ok(response)
      }
      Err(err) => {
        warn!(url = %key.url, error = %err, "cache-first fetch failed");
        if request.mode.is_navigate() {
          if let Some(page) = self.lookup(offline_page) {
            return Ok(page);
          }
          warn!(url = %offline_page.url, "offline page missing from cache");
        }
        Err(err)
      }
    }
  }

  /// Fetch with network-first strategy for API calls.
  ///
  /// Ok responses are returned as-is while their JSON body is recorded in the
  /// background. Failures fall back to the recorded payload, then to an empty
  /// message list for `empty_list_endpoint`, then to a 503.
  pub async fn network_first<F, Fut>(
    &self,
    request: &Request,
    empty_list_endpoint: &str,
    fetcher: F,
  ) -> Response
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response>>,
  {
    let url = request.url.to_string();

    match fetcher().await {
      Ok(response) if response.is_ok() => {
        self.record_payload(url, response.body.clone());
        return response;
      }
      Ok(response) => {
        warn!(url = %url, status = response.status, "network-first got non-ok response")
      }
      Err(err) => warn!(url = %url, error = %err, "network-first fetch failed"),
    }

    self.api_fallback(&url, empty_list_endpoint)
  }

  /// Response served when an API call cannot reach the network.
  fn api_fallback(&self, url: &str, empty_list_endpoint: &str) -> Response {
    match self.storage.get_payload(url) {
      Ok(Some(payload)) if payload.is_usable() => {
        debug!(url = %url, "serving recorded payload");
        return Response::json(200, payload.data);
      }
      Ok(_) => {}
      Err(e) => warn!(url = %url, error = %e, "response store read failed"),
    }

    if !empty_list_endpoint.is_empty() && url.contains(empty_list_endpoint) {
      return Response::json(200, EMPTY_LIST_BODY);
    }

    Response::json(503, OFFLINE_BODY)
  }

  /// Parse and store an API body without holding up the live response.
  fn record_payload(&self, url: String, body: Vec<u8>) {
    let storage = Arc::clone(&self.storage);
    let mut writes = self.writes.lock().unwrap_or_else(PoisonError::into_inner);

    // Reap finished writes so the set does not grow unbounded
    while writes.try_join_next().is_some() {}

    writes.spawn_blocking(move || {
      if let Err(e) = serde_json::from_slice::<IgnoredAny>(&body) {
        warn!(url = %url, error = %e, "API response is not JSON, not recording");
        return;
      }
      let data = match String::from_utf8(body) {
        Ok(text) => text,
        Err(e) => {
          warn!(url = %url, error = %e, "API response is not UTF-8, not recording");
          return;
        }
      };
      if let Err(e) = storage.put_payload(&url, data.trim()) {
        warn!(url = %url, error = %e, "response store write failed");
      }
    });
  }

  /// Wait for every background payload write started so far.
  pub async fn flush_writes(&self) {
    let mut pending = {
      let mut writes = self.writes.lock().unwrap_or_else(PoisonError::into_inner);
      std::mem::take(&mut *writes)
    };

    while let Some(result) = pending.join_next().await {
      if let Err(e) = result {
        warn!(error = %e, "background write task failed");
      }
    }
  }

  /// Fetch with dynamic caching for non-critical assets.
  ///
  /// Network first, storing every response; on failure serve whatever copy
  /// the cache holds, or fail.
  pub async fn dynamic<F, Fut>(&self, request: &Request, fetcher: F) -> Result<Response>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response>>,
  {
    let key = request.key();

    match fetcher().await {
      Ok(response) => {
        self.remember(&key, &response);
        Ok(response)
      }
      Err(err) => {
        warn!(url = %key.url, error = %err, "dynamic fetch failed");
        self.lookup(&key).ok_or(err)
      }
    }
  }
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      generation: self.generation.clone(),
      writes: Arc::clone(&self.writes),
    }
  }
}
