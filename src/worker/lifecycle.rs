//! Install/activate transitions of the offline worker.
//!
//! A worker instance moves strictly forward through
//! `installing -> installed -> activating -> active`. Deploying a new
//! generation means starting a new instance, which purges the old
//! generation's assets when it activates.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use serde::Serialize;
use std::fmt;
use tracing::{error, info, warn};
use url::Url;

use crate::cache::CacheStorage;
use crate::net::{Fetcher, Request};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
  Installing,
  /// Installed and waiting to activate
  Installed,
  Activating,
  /// Controls requests
  Active,
}

impl LifecycleState {
  fn next(self) -> Option<Self> {
    match self {
      Self::Installing => Some(Self::Installed),
      Self::Installed => Some(Self::Activating),
      Self::Activating => Some(Self::Active),
      Self::Active => None,
    }
  }
}

impl fmt::Display for LifecycleState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      LifecycleState::Installing => write!(f, "installing"),
      LifecycleState::Installed => write!(f, "installed"),
      LifecycleState::Activating => write!(f, "activating"),
      LifecycleState::Active => write!(f, "active"),
    }
  }
}

/// Lifecycle of a single worker instance.
#[derive(Debug)]
pub struct Lifecycle {
  state: LifecycleState,
}

impl Default for Lifecycle {
  fn default() -> Self {
    Self {
      state: LifecycleState::Installing,
    }
  }
}

impl Lifecycle {
  pub fn state(&self) -> LifecycleState {
    self.state
  }

  /// Move to `to`, which must be the direct successor of the current state.
  pub fn transition(&mut self, to: LifecycleState) -> Result<()> {
    if self.state.next() != Some(to) {
      return Err(eyre!("Invalid lifecycle transition {} -> {}", self.state, to));
    }
    info!(from = %self.state, to = %to, "lifecycle transition");
    self.state = to;
    Ok(())
  }
}

/// Everything the lifecycle hooks touch, passed explicitly.
pub struct LifecycleContext<'a, S, N> {
  pub storage: &'a S,
  pub network: &'a N,
  pub generation: &'a str,
  pub origin: &'a Url,
  pub core_assets: &'a [String],
}

/// Outcome of prefetching the core assets.
#[derive(Debug, Default)]
pub struct InstallReport {
  pub cached: Vec<String>,
  /// (asset, reason)
  pub failed: Vec<(String, String)>,
}

impl InstallReport {
  pub fn is_complete(&self) -> bool {
    self.failed.is_empty()
  }
}

/// Prefetch every core asset into the current generation.
///
/// A failing asset is logged and skipped; it never aborts installation.
pub async fn install<S: CacheStorage, N: Fetcher>(ctx: &LifecycleContext<'_, S, N>) -> InstallReport {
  info!(generation = ctx.generation, assets = ctx.core_assets.len(), "caching core assets");

  let fetches = ctx.core_assets.iter().map(|asset| async move {
    let outcome = cache_asset(ctx, asset).await;
    (asset.clone(), outcome)
  });

  let mut report = InstallReport::default();
  for (asset, outcome) in join_all(fetches).await {
    match outcome {
      Ok(()) => report.cached.push(asset),
      Err(e) => {
        error!(asset = %asset, error = %e, "failed to cache core asset");
        report.failed.push((asset, e.to_string()));
      }
    }
  }

  report
}

async fn cache_asset<S: CacheStorage, N: Fetcher>(
  ctx: &LifecycleContext<'_, S, N>,
  asset: &str,
) -> Result<()> {
  let url = ctx
    .origin
    .join(asset)
    .map_err(|e| eyre!("Invalid asset path {}: {}", asset, e))?;
  let request = Request::get(url);

  let response = ctx.network.fetch(&request).await?;
  if !response.is_ok() {
    return Err(eyre!("{} responded with status {}", request.url, response.status));
  }

  ctx
    .storage
    .put_response(ctx.generation, &request.key(), &response.without_cookies())
}

/// Delete every cache generation other than the current one.
///
/// Returns the generations that were removed. Storage failures are logged;
/// activation proceeds regardless.
pub fn activate<S, N>(ctx: &LifecycleContext<'_, S, N>) -> Vec<String>
where
  S: CacheStorage,
{
  let generations = match ctx.storage.generations() {
    Ok(g) => g,
    Err(e) => {
      error!(error = %e, "failed to list cache generations");
      return Vec::new();
    }
  };

  let mut deleted = Vec::new();
  for generation in generations.into_iter().filter(|g| g != ctx.generation) {
    info!(generation = %generation, "deleting old cache");
    match ctx.storage.delete_generation(&generation) {
      Ok(_) => deleted.push(generation),
      Err(e) => warn!(generation = %generation, error = %e, "failed to delete old cache"),
    }
  }

  deleted
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::net::{RequestKey, Response};
  use reqwest::Method;

  /// Serves every path except those listed as down.
  struct Origin {
    down: Vec<&'static str>,
  }

  impl Fetcher for Origin {
    async fn fetch(&self, request: &Request) -> Result<Response> {
      let path = request.url.path();
      if self.down.iter().any(|d| *d == path) {
        return Err(eyre!("connection reset"));
      }
      if path == "/missing.svg" {
        return Ok(Response::new(404, Vec::new(), Vec::new()));
      }
      Ok(Response::new(200, Vec::new(), path.as_bytes().to_vec()))
    }
  }

  fn origin() -> Url {
    Url::parse("http://localhost:3000").unwrap()
  }

  fn key(path: &str) -> RequestKey {
    RequestKey::new(&Method::GET, &origin().join(path).unwrap())
  }

  #[test]
  fn transitions_only_move_forward() {
    let mut lifecycle = Lifecycle::default();
    assert_eq!(lifecycle.state(), LifecycleState::Installing);
    assert!(lifecycle.transition(LifecycleState::Active).is_err());

    lifecycle.transition(LifecycleState::Installed).unwrap();
    lifecycle.transition(LifecycleState::Activating).unwrap();
    lifecycle.transition(LifecycleState::Active).unwrap();

    assert_eq!(lifecycle.state(), LifecycleState::Active);
    assert!(lifecycle.transition(LifecycleState::Installing).is_err());
  }

  #[tokio::test]
  async fn install_tolerates_partial_failure() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let network = Origin { down: vec!["/about"] };
    let origin = origin();
    let assets: Vec<String> = ["/", "/about", "/missing.svg", "/offline"]
      .iter()
      .map(|s| s.to_string())
      .collect();
    let ctx = LifecycleContext {
      storage: &storage,
      network: &network,
      generation: "v1",
      origin: &origin,
      core_assets: &assets,
    };

    let report = install(&ctx).await;

    assert_eq!(report.cached, vec!["/", "/offline"]);
    assert_eq!(report.failed.len(), 2);
    assert!(!report.is_complete());
    assert!(storage.match_response("v1", &key("/")).unwrap().is_some());
    assert!(storage.match_response("v1", &key("/about")).unwrap().is_none());
    assert!(storage
      .match_response("v1", &key("/missing.svg"))
      .unwrap()
      .is_none());
  }

  #[test]
  fn activate_purges_only_other_generations() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let network = Origin { down: vec![] };
    let origin = origin();
    for generation in ["mystery-message-v0", "old-build", "mystery-message-v1"] {
      storage
        .put_response(generation, &key("/"), &Response::json(200, generation))
        .unwrap();
    }
    let ctx = LifecycleContext {
      storage: &storage,
      network: &network,
      generation: "mystery-message-v1",
      origin: &origin,
      core_assets: &[],
    };

    let mut deleted = activate(&ctx);
    deleted.sort();

    assert_eq!(deleted, vec!["mystery-message-v0", "old-build"]);
    assert_eq!(storage.generations().unwrap(), vec!["mystery-message-v1"]);
    assert_eq!(
      storage
        .match_response("mystery-message-v1", &key("/"))
        .unwrap()
        .unwrap()
        .body,
      b"mystery-message-v1"
    );
  }
}
