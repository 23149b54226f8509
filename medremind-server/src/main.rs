use medremind_server::server::{self, AppConfig, AppState, ConfigError};
use medremind_server::storage::{StorageError, Store};
mod cli;

use std::net::SocketAddr;
use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_DB_PATH: &str = "data/app.db";
const DEFAULT_PORT: u16 = 5151;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Reasons the process stops before serving; each maps to its own exit code.
#[derive(Debug, thiserror::Error)]
enum Startup {
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("database {path}: {source}")]
    Database { path: String, source: StorageError },
    #[error("seeding patients: {0}")]
    Seed(StorageError),
    #[error("send-due: {0}")]
    SendDue(StorageError),
    #[error("bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
}

impl Startup {
    fn exit_code(&self) -> u8 {
        match self {
            Startup::Config(_) => 2,
            Startup::Database { .. } => 3,
            Startup::Seed(_) => 4,
            Startup::SendDue(_) => 5,
            Startup::Bind { .. } => 6,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = cli::Cli::parse();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_ansi(true)
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "medremind-server stopped");
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(args: cli::Cli) -> Result<(), Startup> {
    let config = AppConfig::load()?;
    let store = open_store().await?;
    store
        .seed_patients(&config.patients)
        .await
        .map_err(Startup::Seed)?;

    // PORT wins over config.listen_port
    let port = std::env::var("PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .or(config.listen_port)
        .unwrap_or(DEFAULT_PORT);
    let ticker_enabled = config.scheduler.enabled;

    let state = AppState::new(config, store)?;
    if !state.push.is_enabled() {
        warn!("push delivery disabled; reminders rely on open clients only");
    }

    if let Some(cli::Command::SendDue) = args.command {
        return send_due_once(&state).await;
    }
    serve(state, port, ticker_enabled).await
}

async fn open_store() -> Result<Store, Startup> {
    let path = std::env::var("DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.into());
    if let Some(parent) = Path::new(&path).parent()
        && !parent.as_os_str().is_empty()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        warn!(error = %e, dir = %parent.display(), "could not create database directory");
    }
    Store::connect_sqlite(&path)
        .await
        .map_err(|source| Startup::Database { path, source })
}

async fn send_due_once(state: &AppState) -> Result<(), Startup> {
    let summary = state
        .push
        .send_due_reminders(chrono::Utc::now())
        .await
        .map_err(Startup::SendDue)?;
    match serde_json::to_string(&summary) {
        Ok(json) => println!("{json}"),
        Err(e) => error!(error = %e, "failed to encode summary"),
    }
    Ok(())
}

async fn serve(state: AppState, port: u16, ticker_enabled: bool) -> Result<(), Startup> {
    let shutdown = state.shutdown_token();
    let ticker = ticker_enabled
        .then(|| server::cron::spawn_minute_ticker(state.push.clone(), shutdown.child_token()));

    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| Startup::Bind { addr, source })?;
    info!(%addr, "medremind-server listening");

    let app = server::router(state);
    let graceful = shutdown.clone().cancelled_owned();
    let mut server_task =
        tokio::spawn(async move { axum::serve(listener, app).with_graceful_shutdown(graceful).await });

    shutdown_signal().await;
    info!("shutdown: stopping ticker and draining requests");
    shutdown.cancel();
    if let Some(ticker) = ticker
        && let Err(e) = ticker.await
    {
        warn!(error = %e, "reminder ticker join error");
    }
    match tokio::time::timeout(SHUTDOWN_GRACE, &mut server_task).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => error!(error = %e, "server error"),
        Ok(Err(e)) => error!(error = %e, "server task join error"),
        Err(_) => {
            warn!("shutdown: grace period elapsed; aborting server");
            server_task.abort();
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigint = signal(SignalKind::interrupt()).expect("listen SIGINT");
        let mut sigterm = signal(SignalKind::terminate()).expect("listen SIGTERM");
        tokio::select! {
            _ = sigint.recv() => info!("shutdown: received SIGINT"),
            _ = sigterm.recv() => info!("shutdown: received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown: received Ctrl+C");
    }
}
