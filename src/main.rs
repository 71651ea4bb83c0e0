use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use mystery_offline::cache::SqliteStorage;
use mystery_offline::config::Config;
use mystery_offline::net::HttpFetcher;
use mystery_offline::notify::{
  BrowserNavigator, DesktopNotifier, Navigator, NotificationRelay, Notifier,
};
use mystery_offline::server::{self, AppState};
use mystery_offline::worker::{ServiceWorker, WorkerOptions};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "mystery-offline")]
#[command(about = "Offline caching daemon for the Mystery Message web app")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/mystery-offline/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Origin to forward requests to
  #[arg(short, long)]
  origin: Option<String>,

  /// Address to listen on
  #[arg(short, long)]
  listen: Option<SocketAddr>,

  /// Cache generation id
  #[arg(short, long)]
  generation: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration, command line wins
  let mut config = Config::load(args.config.as_deref())?;
  if let Some(origin) = args.origin {
    config.origin = origin;
  }
  if let Some(listen) = args.listen {
    config.listen = listen;
  }
  if let Some(generation) = args.generation {
    config.generation = generation;
  }
  config.validate()?;

  let _log_guard = init_tracing(config.log_file.as_deref())?;

  let origin = config.origin_url()?;
  let storage = Arc::new(SqliteStorage::open(config.database.as_deref())?);
  let worker = Arc::new(ServiceWorker::new(
    storage,
    HttpFetcher::new()?,
    WorkerOptions::from_config(&config)?,
  )?);

  let report = worker.start().await?;
  if !report.is_complete() {
    warn!(failed = ?report.failed, "some core assets are not available offline");
  }

  let (clicks_tx, clicks_rx) = mpsc::unbounded_channel();
  let relay: Arc<server::Relay> = Arc::new(NotificationRelay::new(
    Box::new(DesktopNotifier::new(
      config.notifications.default_title.clone(),
      clicks_tx,
    )) as Box<dyn Notifier>,
    Box::new(BrowserNavigator) as Box<dyn Navigator>,
    origin.clone(),
    config.notifications.clone(),
  ));
  tokio::spawn({
    let relay = Arc::clone(&relay);
    async move { relay.run_clicks(clicks_rx).await }
  });

  let listener = TcpListener::bind(config.listen)
    .await
    .map_err(|e| eyre!("Failed to bind {}: {}", config.listen, e))?;
  info!(listen = %config.listen, origin = %origin, "mystery-offline running");

  server::serve(
    listener,
    AppState {
      worker,
      relay,
      origin,
    },
  )
  .await
}

/// Log to stderr, and to a daily-rolling file when one is configured.
fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  let stderr = fmt::layer().with_writer(std::io::stderr);

  let Some(path) = log_file else {
    tracing_subscriber::registry()
      .with(filter)
      .with(stderr)
      .try_init()
      .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;
    return Ok(None);
  };

  let dir = path
    .parent()
    .filter(|p| !p.as_os_str().is_empty())
    .unwrap_or_else(|| Path::new("."));
  let file_name = path
    .file_name()
    .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;

  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, file_name));
  tracing_subscriber::registry()
    .with(filter)
    .with(stderr)
    .with(fmt::layer().with_ansi(false).with_writer(writer))
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(Some(guard))
}
