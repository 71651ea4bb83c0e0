//! The offline worker: lifecycle plus request interception.

pub mod lifecycle;
mod strategy;

pub use lifecycle::{InstallReport, LifecycleState};
pub use strategy::Strategy;

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheLayer, CacheStorage};
use crate::config::Config;
use crate::net::{Fetcher, Request, RequestKey, Response};
use lifecycle::{Lifecycle, LifecycleContext};

/// Routing and prefetch settings for a worker instance.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
  pub origin: Url,
  pub generation: String,
  pub api_prefix: String,
  pub empty_list_endpoint: String,
  pub offline_page: String,
  pub core_assets: Vec<String>,
}

impl WorkerOptions {
  pub fn from_config(config: &Config) -> Result<Self> {
    Ok(Self {
      origin: config.origin_url()?,
      generation: config.generation.clone(),
      api_prefix: config.api_prefix.clone(),
      empty_list_endpoint: config.empty_list_endpoint.clone(),
      offline_page: config.offline_page.clone(),
      core_assets: config.core_assets.clone(),
    })
  }
}

/// A worker instance sitting between the app shell and the network.
pub struct ServiceWorker<S: CacheStorage, N: Fetcher> {
  layer: CacheLayer<S>,
  network: N,
  options: WorkerOptions,
  offline_page: RequestKey,
  lifecycle: Mutex<Lifecycle>,
}

impl<S: CacheStorage + 'static, N: Fetcher> ServiceWorker<S, N> {
  pub fn new(storage: Arc<S>, network: N, options: WorkerOptions) -> Result<Self> {
    let offline_url = options
      .origin
      .join(&options.offline_page)
      .map_err(|e| eyre!("Invalid offline page {}: {}", options.offline_page, e))?;

    Ok(Self {
      layer: CacheLayer::new(storage, options.generation.clone()),
      network,
      offline_page: RequestKey::new(&Method::GET, &offline_url),
      options,
      lifecycle: Mutex::new(Lifecycle::default()),
    })
  }

  pub fn state(&self) -> LifecycleState {
    self
      .lifecycle
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .state()
  }

  pub fn generation(&self) -> &str {
    &self.options.generation
  }

  pub fn storage(&self) -> &S {
    self.layer.storage()
  }

  fn advance(&self, to: LifecycleState) -> Result<()> {
    self
      .lifecycle
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .transition(to)
  }

  fn context(&self) -> LifecycleContext<'_, S, N> {
    LifecycleContext {
      storage: self.layer.storage(),
      network: &self.network,
      generation: &self.options.generation,
      origin: &self.options.origin,
      core_assets: &self.options.core_assets,
    }
  }

  /// Prefetch the core assets and move to `installed`.
  pub async fn install(&self) -> Result<InstallReport> {
    if self.state() != LifecycleState::Installing {
      return Err(eyre!("Cannot install a worker that is {}", self.state()));
    }

    let report = lifecycle::install(&self.context()).await;
    self.advance(LifecycleState::Installed)?;

    info!(
      cached = report.cached.len(),
      failed = report.failed.len(),
      "worker installed"
    );
    Ok(report)
  }

  /// Purge old generations and take control of requests.
  pub fn activate(&self) -> Result<Vec<String>> {
    self.advance(LifecycleState::Activating)?;
    let deleted = lifecycle::activate(&self.context());
    self.advance(LifecycleState::Active)?;

    info!(generation = %self.options.generation, purged = deleted.len(), "worker active");
    Ok(deleted)
  }

  /// Install, then activate immediately without waiting for older instances.
  pub async fn start(&self) -> Result<InstallReport> {
    let report = self.install().await?;
    self.activate()?;
    Ok(report)
  }

  /// Handle one outgoing request from the app shell.
  ///
  /// Non-GET requests, and everything before activation, go straight to the
  /// network and never touch either store.
  pub async fn handle_fetch(&self, request: Request) -> Result<Response> {
    if request.method != Method::GET {
      debug!(method = %request.method, url = %request.url, "passing through");
      return self.network.fetch(&request).await;
    }

    let state = self.state();
    if state != LifecycleState::Active {
      warn!(state = %state, url = %request.url, "worker not active, passing through");
      return self.network.fetch(&request).await;
    }

    let strategy = Strategy::select(&request.url, request.mode, &self.options.api_prefix);
    debug!(strategy = %strategy, url = %request.url, "intercepted");

    let fetch = || self.network.fetch(&request);
    match strategy {
      Strategy::CacheFirst => {
        self
          .layer
          .cache_first(&request, &self.offline_page, fetch)
          .await
      }
      Strategy::NetworkFirst => Ok(
        self
          .layer
          .network_first(&request, &self.options.empty_list_endpoint, fetch)
          .await,
      ),
      Strategy::Dynamic => self.layer.dynamic(&request, fetch).await,
    }
  }

  /// Wait for background store writes to land.
  pub async fn flush_writes(&self) {
    self.layer.flush_writes().await;
  }
}
