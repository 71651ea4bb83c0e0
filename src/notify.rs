//! Push notification relay.
//!
//! Push payloads become desktop notifications with "view" and "close"
//! actions; clicks become navigations. Delivery is best effort: nothing is
//! acknowledged back to the sender.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::NotificationsConfig;

/// Payload delivered by the push service.
#[derive(Debug, Clone, Deserialize)]
pub struct PushPayload {
  pub title: Option<String>,
  pub body: String,
  /// Opaque identifier, carried into the notification data untouched
  #[serde(rename = "primaryKey", default)]
  pub primary_key: Value,
}

impl PushPayload {
  /// Parse a raw push body. An empty body carries no notification.
  pub fn parse(data: &[u8]) -> Result<Option<Self>> {
    if data.iter().all(u8::is_ascii_whitespace) {
      return Ok(None);
    }
    serde_json::from_slice(data)
      .map(Some)
      .map_err(|e| eyre!("Invalid push payload: {}", e))
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
  pub icon: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
  /// Unix milliseconds
  pub date_of_arrival: i64,
  pub primary_key: Value,
}

/// A notification ready to display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  pub data: NotificationData,
  pub actions: Vec<NotificationAction>,
}

/// What a notification click resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
  /// Open this route of the app
  Open(String),
  Dismiss,
}

/// Displays notifications.
pub trait Notifier: Send + Sync {
  fn show(&self, notification: &Notification) -> Result<()>;
}

/// Opens app URLs for the user.
pub trait Navigator: Send + Sync {
  fn open(&self, url: &Url) -> Result<()>;
}

impl<T: Notifier + ?Sized> Notifier for Box<T> {
  fn show(&self, notification: &Notification) -> Result<()> {
    (**self).show(notification)
  }
}

impl<T: Navigator + ?Sized> Navigator for Box<T> {
  fn open(&self, url: &Url) -> Result<()> {
    (**self).open(url)
  }
}

pub struct NotificationRelay<T: Notifier, V: Navigator> {
  notifier: T,
  navigator: V,
  origin: Url,
  config: NotificationsConfig,
}

impl<T: Notifier, V: Navigator> NotificationRelay<T, V> {
  pub fn new(notifier: T, navigator: V, origin: Url, config: NotificationsConfig) -> Self {
    Self {
      notifier,
      navigator,
      origin,
      config,
    }
  }

  /// Build the notification shown for a push payload.
  pub fn build(&self, payload: PushPayload) -> Notification {
    let action = |id: &str, title: &str| NotificationAction {
      action: id.to_string(),
      title: title.to_string(),
      icon: self.config.icon.clone(),
    };

    Notification {
      title: payload
        .title
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| self.config.default_title.clone()),
      body: payload.body,
      icon: self.config.icon.clone(),
      badge: self.config.badge.clone(),
      vibrate: self.config.vibrate.clone(),
      data: NotificationData {
        date_of_arrival: Utc::now().timestamp_millis(),
        primary_key: payload.primary_key,
      },
      actions: vec![action("view", "View Message"), action("close", "Close")],
    }
  }

  /// Show the notification for a push payload.
  pub fn deliver(&self, payload: PushPayload) -> Result<Notification> {
    let notification = self.build(payload);
    info!(title = %notification.title, "showing notification");
    self.notifier.show(&notification)?;
    Ok(notification)
  }

  /// Map a click action to its outcome.
  pub fn click_outcome(&self, action: &str) -> ClickOutcome {
    match action {
      "view" => ClickOutcome::Open(self.config.view_route.clone()),
      "close" => ClickOutcome::Dismiss,
      _ => ClickOutcome::Open(self.config.default_route.clone()),
    }
  }

  /// React to a click on a notification.
  pub fn handle_click(&self, action: &str) -> Result<ClickOutcome> {
    let outcome = self.click_outcome(action);
    if let ClickOutcome::Open(route) = &outcome {
      let url = self
        .origin
        .join(route)
        .map_err(|e| eyre!("Invalid notification route {}: {}", route, e))?;
      debug!(action, url = %url, "opening notification target");
      self.navigator.open(&url)?;
    }
    Ok(outcome)
  }

  /// Consume click actions reported by the notifier until the sender is dropped.
  pub async fn run_clicks(&self, mut clicks: mpsc::UnboundedReceiver<String>) {
    while let Some(action) = clicks.recv().await {
      if let Err(e) = self.handle_click(&action) {
        warn!(action = %action, error = %e, "failed to handle notification click");
      }
    }
  }
}

/// Desktop notifications via the platform notification service.
pub struct DesktopNotifier {
  app_name: String,
  clicks: mpsc::UnboundedSender<String>,
}

impl DesktopNotifier {
  /// Clicked action ids are sent on `clicks` where the platform reports them.
  pub fn new(app_name: impl Into<String>, clicks: mpsc::UnboundedSender<String>) -> Self {
    Self {
      app_name: app_name.into(),
      clicks,
    }
  }
}

impl Notifier for DesktopNotifier {
  fn show(&self, notification: &Notification) -> Result<()> {
    let mut desktop = notify_rust::Notification::new();
    desktop
      .appname(&self.app_name)
      .summary(&notification.title)
      .body(&notification.body);
    for action in &notification.actions {
      desktop.action(&action.action, &action.title);
    }

    let clicks = self.clicks.clone();
    tokio::task::spawn_blocking(move || match desktop.show() {
      Ok(handle) => wait_for_click(handle, clicks),
      Err(e) => warn!(error = %e, "failed to show desktop notification"),
    });

    Ok(())
  }
}

#[cfg(all(unix, not(target_os = "macos")))]
fn wait_for_click(handle: notify_rust::NotificationHandle, clicks: mpsc::UnboundedSender<String>) {
  handle.wait_for_action(|action| {
    // "__closed" means dismissed without a click
    if action != "__closed" {
      let _ = clicks.send(action.to_string());
    }
  });
}

#[cfg(not(all(unix, not(target_os = "macos"))))]
fn wait_for_click<H>(_handle: H, _clicks: mpsc::UnboundedSender<String>) {}

/// Opens URLs in the user's default browser.
pub struct BrowserNavigator;

impl Navigator for BrowserNavigator {
  fn open(&self, url: &Url) -> Result<()> {
    open::that_detached(url.as_str()).map_err(|e| eyre!("Failed to open {}: {}", url, e))
  }
}
