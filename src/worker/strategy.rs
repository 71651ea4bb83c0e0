use std::fmt;
use url::Url;

use crate::net::RequestMode;

/// How an intercepted GET request is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Serve from cache, fetch only on a miss
  CacheFirst,
  /// Fetch, fall back to the recorded payload
  NetworkFirst,
  /// Fetch and store, fall back to any cached copy
  Dynamic,
}

impl Strategy {
  /// Pick a strategy for a request.
  ///
  /// The API prefix wins over navigation mode.
  pub fn select(url: &Url, mode: RequestMode, api_prefix: &str) -> Self {
    if url.path().starts_with(api_prefix) {
      Self::NetworkFirst
    } else if mode.is_navigate() {
      Self::CacheFirst
    } else {
      Self::Dynamic
    }
  }
}

impl fmt::Display for Strategy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Strategy::CacheFirst => write!(f, "cache-first"),
      Strategy::NetworkFirst => write!(f, "network-first"),
      Strategy::Dynamic => write!(f, "dynamic"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(path: &str) -> Url {
    Url::parse("http://localhost:3000")
      .unwrap()
      .join(path)
      .unwrap()
  }

  #[test]
  fn api_paths_are_network_first() {
    assert_eq!(
      Strategy::select(&url("/api/get-messages"), RequestMode::Cors, "/api/"),
      Strategy::NetworkFirst
    );
  }

  #[test]
  fn api_prefix_beats_navigation() {
    assert_eq!(
      Strategy::select(&url("/api/auth/session"), RequestMode::Navigate, "/api/"),
      Strategy::NetworkFirst
    );
  }

  #[test]
  fn navigations_are_cache_first() {
    assert_eq!(
      Strategy::select(&url("/u/alice?x=1"), RequestMode::Navigate, "/api/"),
      Strategy::CacheFirst
    );
  }

  #[test]
  fn everything_else_is_dynamic() {
    assert_eq!(
      Strategy::select(&url("/icon-192x192.svg"), RequestMode::NoCors, "/api/"),
      Strategy::Dynamic
    );
    // "/apiary" does not start with "/api/"
    assert_eq!(
      Strategy::select(&url("/apiary"), RequestMode::SameOrigin, "/api/"),
      Strategy::Dynamic
    );
  }

  #[test]
  fn query_string_does_not_affect_prefix_match() {
    assert_eq!(
      Strategy::select(&url("/about?next=/api/x"), RequestMode::NoCors, "/api/"),
      Strategy::Dynamic
    );
  }
}
