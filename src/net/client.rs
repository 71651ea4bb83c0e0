use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use super::types::{is_hop_by_hop, Request, Response};

/// Something that can perform a network round trip.
///
/// `Err` means the request never produced a response (connection refused,
/// DNS, reset). Any HTTP status, including 5xx, is an `Ok`.
pub trait Fetcher: Send + Sync {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send;
}

impl<T: Fetcher> Fetcher for Arc<T> {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    (**self).fetch(request).await
  }
}

/// HTTP client wrapper used against the real origin
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .redirect(reqwest::redirect::Policy::none())
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());

    for (name, value) in &request.headers {
      if is_hop_by_hop(name)
        || name.eq_ignore_ascii_case("host")
        || name.eq_ignore_ascii_case("accept-encoding")
      {
        continue;
      }
      builder = builder.header(name.as_str(), value.as_str());
    }

    if !request.body.is_empty() {
      builder = builder.body(request.body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", request.url, e))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body from {}: {}", request.url, e))?;

    debug!(method = %request.method, url = %request.url, status, "network response");

    Ok(Response::new(status, headers, body.to_vec()))
  }
}
