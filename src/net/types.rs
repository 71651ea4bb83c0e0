use reqwest::Method;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// How the shell issued a request, taken from `Sec-Fetch-Mode`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestMode {
  /// Top-level page load
  Navigate,
  SameOrigin,
  Cors,
  #[default]
  NoCors,
}

impl RequestMode {
  pub fn from_header(value: Option<&str>) -> Self {
    match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
      Some("navigate") => Self::Navigate,
      Some("same-origin") => Self::SameOrigin,
      Some("cors") => Self::Cors,
      _ => Self::NoCors,
    }
  }

  pub fn is_navigate(&self) -> bool {
    matches!(self, Self::Navigate)
  }
}

/// An outgoing request as seen by the interception layer.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Request {
  /// A bare GET for `url`, as issued by install-time prefetching.
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      mode: RequestMode::NoCors,
      headers: Vec::new(),
      body: Vec::new(),
    }
  }

  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  pub fn key(&self) -> RequestKey {
    RequestKey::new(&self.method, &self.url)
  }
}

/// Identity of a request in the static asset cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  pub method: String,
  pub url: String,
}

impl RequestKey {
  pub fn new(method: &Method, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self {
      method: method.as_str().to_string(),
      url: url.to_string(),
    }
  }

  /// SHA256 of `METHOD url` for stable, fixed-length keys.
  pub fn hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// A fully buffered response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
    Self {
      status,
      headers,
      body,
    }
  }

  /// Build a synthesized JSON response.
  pub fn json(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self::new(
      status,
      vec![("content-type".to_string(), "application/json".to_string())],
      body.into(),
    )
  }

  /// Whether the status is in the 2xx range.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Copy of the response that is safe to replay later: cookie-setting
  /// headers are dropped so a cache hit never touches the session.
  pub fn without_cookies(&self) -> Self {
    Self {
      status: self.status,
      headers: self
        .headers
        .iter()
        .filter(|(name, _)| !is_set_cookie(name))
        .cloned()
        .collect(),
      body: self.body.clone(),
    }
  }
}

fn is_set_cookie(name: &str) -> bool {
  name.eq_ignore_ascii_case("set-cookie") || name.eq_ignore_ascii_case("set-cookie2")
}

/// Headers that describe a single connection and must not be relayed.
pub fn is_hop_by_hop(name: &str) -> bool {
  const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
  ];
  HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}
