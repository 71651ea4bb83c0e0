//! Local proxy that puts the offline worker between the browser and the origin.

use axum::{
  body::{to_bytes, Body, Bytes},
  extract::{Request as AxumRequest, State},
  http::StatusCode,
  response::{IntoResponse, Json, Response as AxumResponse},
  routing::{get, post},
  Router,
};
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal::ctrl_c;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::SqliteStorage;
use crate::net::{is_hop_by_hop, HttpFetcher, Request, RequestMode, Response};
use crate::notify::{Navigator, NotificationRelay, Notifier, PushPayload};
use crate::worker::ServiceWorker;

/// Largest request body forwarded to the origin.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

pub type Worker = ServiceWorker<SqliteStorage, HttpFetcher>;
pub type Relay = NotificationRelay<Box<dyn Notifier>, Box<dyn Navigator>>;

#[derive(Clone)]
pub struct AppState {
  pub worker: Arc<Worker>,
  pub relay: Arc<Relay>,
  pub origin: Url,
}

pub fn router(state: AppState) -> Router {
  Router::new()
    .route("/__offline/push", post(push_handler))
    .route("/__offline/sync", post(sync_handler))
    .route("/__offline/status", get(status_handler))
    .fallback(proxy_handler)
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

/// Serve until Ctrl+C or SIGTERM, then drain pending store writes.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
  let worker = Arc::clone(&state.worker);

  axum::serve(listener, router(state))
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| eyre!("Server error: {}", e))?;

  info!("flushing pending cache writes");
  worker.flush_writes().await;
  Ok(())
}

async fn shutdown_signal() {
  let ctrl_c = async {
    if let Err(e) = ctrl_c().await {
      warn!(error = %e, "failed to listen for Ctrl+C");
      std::future::pending::<()>().await;
    }
    info!("Received Ctrl+C, shutting down");
  };

  #[cfg(unix)]
  let terminate = async {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
      Ok(mut stream) => {
        stream.recv().await;
        info!("Received terminate signal, shutting down");
      }
      Err(e) => {
        warn!(error = %e, "failed to listen for SIGTERM");
        std::future::pending::<()>().await;
      }
    }
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    _ = ctrl_c => {},
    _ = terminate => {},
  }
}

async fn proxy_handler(State(state): State<AppState>, request: AxumRequest) -> AxumResponse {
  let request = match into_request(&state.origin, request).await {
    Ok(r) => r,
    Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
  };
  let url = request.url.clone();

  match state.worker.handle_fetch(request).await {
    Ok(response) => into_response(response),
    Err(e) => {
      warn!(url = %url, error = %e, "request failed");
      (StatusCode::BAD_GATEWAY, "Origin unreachable").into_response()
    }
  }
}

/// Turn an incoming request into one aimed at the origin.
pub async fn into_request(origin: &Url, request: AxumRequest) -> Result<Request> {
  let (parts, body) = request.into_parts();

  // Only path and query are taken from the request; scheme and host always
  // stay those of the origin, even for paths like `//other.host/x`
  let mut url = origin.clone();
  url.set_path(parts.uri.path());
  url.set_query(parts.uri.query());

  let mode = RequestMode::from_header(
    parts
      .headers
      .get("sec-fetch-mode")
      .and_then(|v| v.to_str().ok()),
  );

  let headers = parts
    .headers
    .iter()
    .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
    .filter_map(|(name, value)| {
      value
        .to_str()
        .ok()
        .map(|v| (name.as_str().to_string(), v.to_string()))
    })
    .collect();

  let body = to_bytes(body, MAX_BODY_BYTES)
    .await
    .map_err(|e| eyre!("Failed to read request body: {}", e))?;

  Ok(Request {
    method: parts.method,
    url,
    mode,
    headers,
    body: body.to_vec(),
  })
}

/// Turn a worker response back into an HTTP response for the browser.
pub fn into_response(response: Response) -> AxumResponse {
  let mut builder = axum::http::Response::builder().status(response.status);
  for (name, value) in &response.headers {
    if !is_hop_by_hop(name) {
      builder = builder.header(name.as_str(), value.as_str());
    }
  }

  builder
    .body(Body::from(response.body))
    .unwrap_or_else(|e| {
      warn!(error = %e, "invalid response from worker");
      StatusCode::BAD_GATEWAY.into_response()
    })
}

async fn push_handler(State(state): State<AppState>, body: Bytes) -> AxumResponse {
  let payload = match PushPayload::parse(&body) {
    Ok(Some(p)) => p,
    Ok(None) => {
      debug!("empty push payload ignored");
      return StatusCode::NO_CONTENT.into_response();
    }
    Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
  };

  match state.relay.deliver(payload) {
    Ok(notification) => Json(notification).into_response(),
    Err(e) => {
      warn!(error = %e, "failed to deliver notification");
      (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct SyncEvent {
  pub tag: String,
}

async fn sync_handler(Json(event): Json<SyncEvent>) -> StatusCode {
  if event.tag == "background-sync" {
    // No offline submission queue exists yet; the event is only acknowledged
    info!("Background sync triggered");
  } else {
    debug!(tag = %event.tag, "ignoring unknown sync tag");
  }
  StatusCode::ACCEPTED
}

async fn status_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
  Json(serde_json::json!({
    "state": state.worker.state(),
    "generation": state.worker.generation(),
  }))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::Config;
  use crate::notify::Notification;
  use crate::worker::WorkerOptions;
  use std::sync::Mutex;

  fn origin() -> Url {
    Url::parse("http://localhost:3000").unwrap()
  }

  #[tokio::test]
  async fn navigation_request_is_rewritten_to_origin() {
    let incoming = axum::http::Request::builder()
      .method("GET")
      .uri("/u/alice?ref=share")
      .header("host", "127.0.0.1:8787")
      .header("sec-fetch-mode", "navigate")
      .header("connection", "keep-alive")
      .header("accept", "text/html")
      .body(Body::empty())
      .unwrap();

    let request = into_request(&origin(), incoming).await.unwrap();

    assert_eq!(request.url.as_str(), "http://localhost:3000/u/alice?ref=share");
    assert!(request.mode.is_navigate());
    assert!(request.headers.iter().any(|(k, _)| k == "accept"));
    assert!(!request.headers.iter().any(|(k, _)| k == "connection"));
  }

  #[tokio::test]
  async fn scheme_relative_path_stays_on_origin() {
    let incoming = axum::http::Request::builder()
      .method("GET")
      .uri("//evil.example/payload.html?x=1")
      .body(Body::empty())
      .unwrap();

    let request = into_request(&origin(), incoming).await.unwrap();

    assert_eq!(request.url.host_str(), Some("localhost"));
    assert_eq!(request.url.port(), Some(3000));
    assert_eq!(request.url.path(), "//evil.example/payload.html");
    assert_eq!(request.url.query(), Some("x=1"));
  }

  #[tokio::test]
  async fn post_body_is_kept() {
    let incoming = axum::http::Request::builder()
      .method("POST")
      .uri("/api/send-message")
      .header("sec-fetch-mode", "cors")
      .body(Body::from(r#"{"username":"alice","content":"hi"}"#))
      .unwrap();

    let request = into_request(&origin(), incoming).await.unwrap();

    assert_eq!(request.method, axum::http::Method::POST);
    assert_eq!(request.mode, RequestMode::Cors);
    assert_eq!(request.body, br#"{"username":"alice","content":"hi"}"#);
  }

  #[test]
  fn response_drops_hop_by_hop_headers() {
    let response = into_response(Response::new(
      503,
      vec![
        ("content-type".to_string(), "application/json".to_string()),
        ("transfer-encoding".to_string(), "chunked".to_string()),
      ],
      b"{}".to_vec(),
    ));

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.headers()["content-type"], "application/json");
    assert!(response.headers().get("transfer-encoding").is_none());
  }

  #[derive(Default)]
  struct Desktop {
    shown: Arc<Mutex<Vec<Notification>>>,
  }

  impl Notifier for Desktop {
    fn show(&self, notification: &Notification) -> Result<()> {
      self.shown.lock().unwrap().push(notification.clone());
      Ok(())
    }
  }

  struct NoBrowser;

  impl Navigator for NoBrowser {
    fn open(&self, _url: &Url) -> Result<()> {
      Ok(())
    }
  }

  /// Daemon on an ephemeral port whose origin refuses every connection.
  struct TestDaemon {
    base: Url,
    shown: Arc<Mutex<Vec<Notification>>>,
    client: reqwest::Client,
  }

  impl TestDaemon {
    async fn spawn() -> Self {
      let config = Config {
        origin: "http://127.0.0.1:1".to_string(),
        ..Config::default()
      };
      let origin = config.origin_url().unwrap();
      let worker = Arc::new(
        ServiceWorker::new(
          Arc::new(SqliteStorage::open_in_memory().unwrap()),
          HttpFetcher::new().unwrap(),
          WorkerOptions::from_config(&config).unwrap(),
        )
        .unwrap(),
      );
      worker.start().await.unwrap();

      let desktop = Desktop::default();
      let shown = Arc::clone(&desktop.shown);
      let relay: Arc<Relay> = Arc::new(NotificationRelay::new(
        Box::new(desktop) as Box<dyn Notifier>,
        Box::new(NoBrowser) as Box<dyn Navigator>,
        origin.clone(),
        config.notifications.clone(),
      ));

      let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
      let addr = listener.local_addr().unwrap();
      let app = router(AppState {
        worker,
        relay,
        origin,
      });
      tokio::spawn(async move { axum::serve(listener, app).await });

      Self {
        base: Url::parse(&format!("http://{}", addr)).unwrap(),
        shown,
        client: reqwest::Client::builder().no_proxy().build().unwrap(),
      }
    }

    fn url(&self, path: &str) -> Url {
      self.base.join(path).unwrap()
    }

    async fn push(&self, body: &'static str) -> reqwest::Response {
      self
        .client
        .post(self.url("/__offline/push"))
        .body(body)
        .send()
        .await
        .unwrap()
    }
  }

  #[tokio::test]
  async fn push_route_statuses() {
    let daemon = TestDaemon::spawn().await;

    let empty = daemon.push("").await;
    assert_eq!(empty.status(), reqwest::StatusCode::NO_CONTENT);

    let malformed = daemon.push("{not json").await;
    assert_eq!(malformed.status(), reqwest::StatusCode::BAD_REQUEST);

    let shown = daemon
      .push(r#"{"title":"New message","body":"Someone wrote to you","primaryKey":7}"#)
      .await;
    assert_eq!(shown.status(), reqwest::StatusCode::OK);
    let echoed: serde_json::Value = serde_json::from_slice(&shown.bytes().await.unwrap()).unwrap();
    assert_eq!(echoed["title"], "New message");
    assert_eq!(echoed["body"], "Someone wrote to you");
    assert_eq!(echoed["data"]["primaryKey"], 7);
    assert_eq!(echoed["actions"][0]["action"], "view");

    assert_eq!(daemon.shown.lock().unwrap().len(), 1);
  }

  #[tokio::test]
  async fn sync_route_accepts_any_tag() {
    let daemon = TestDaemon::spawn().await;

    for tag in ["background-sync", "something-else"] {
      let response = daemon
        .client
        .post(daemon.url("/__offline/sync"))
        .header("content-type", "application/json")
        .body(format!(r#"{{"tag":"{}"}}"#, tag))
        .send()
        .await
        .unwrap();
      assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);
    }
  }

  #[tokio::test]
  async fn status_route_reports_state_and_generation() {
    let daemon = TestDaemon::spawn().await;

    let response = daemon
      .client
      .get(daemon.url("/__offline/status"))
      .send()
      .await
      .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let status: serde_json::Value =
      serde_json::from_slice(&response.bytes().await.unwrap()).unwrap();
    assert_eq!(status["state"], "active");
    assert_eq!(status["generation"], "mystery-message-v1");
  }

  #[tokio::test]
  async fn unreachable_origin_is_a_bad_gateway() {
    let daemon = TestDaemon::spawn().await;

    let navigation = daemon
      .client
      .get(daemon.url("/dashboard"))
      .header("sec-fetch-mode", "navigate")
      .send()
      .await
      .unwrap();
    assert_eq!(navigation.status(), reqwest::StatusCode::BAD_GATEWAY);

    let api = daemon
      .client
      .get(daemon.url("/api/accept-messages"))
      .send()
      .await
      .unwrap();
    assert_eq!(api.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
  }
}
