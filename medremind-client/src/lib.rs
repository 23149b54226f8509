use medremind_shared::api::rest::RestError;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub mod app;
pub mod cache;
pub mod cli;
pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod matcher;
pub mod platform;
pub mod schedule;
pub mod sync;

pub use cli::{Cli, Command};
pub use config::{ClientConfig, load_config, resolve_config_path};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("sync failed: {0}")]
    Sync(String),
    #[error("capability unavailable: {0}")]
    Capability(String),
}

impl From<RestError> for AppError {
    fn from(e: RestError) -> Self {
        match e {
            RestError::Status { status: 404, body } => AppError::NotFound(body),
            RestError::Status {
                status: 400 | 422,
                body,
            } => AppError::Validation(body),
            other => AppError::Http(other.to_string()),
        }
    }
}

/// Console output always; a daily rolling file under the data dir when
/// enabled. The returned guard must live as long as the process logs.
fn init_tracing(cfg: &ClientConfig) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = fmt::layer().with_target(false).compact();

    let log_dir = cfg
        .log_to_file
        .then(config::default_data_dir)
        .flatten()
        .map(|d| d.join("logs"))
        .filter(|d| std::fs::create_dir_all(d).is_ok());
    let (file, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "medremind-client.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(file)
        .init();
    guard
}

pub async fn run(cli: Cli) -> Result<(), AppError> {
    let (cfg_path, cfg) = ClientConfig::find_and_load(cli.config)?;
    let _log_guard = init_tracing(&cfg);
    tracing::info!(path = ?cfg_path, "loaded config");

    match cli.command {
        None => app::agent::run(cfg).await,
        Some(Command::Schedule) => app::commands::print_schedule(&cfg).await,
        Some(Command::Record {
            medicine,
            notification,
            status,
            dosage,
            notes,
        }) => {
            let req = sync::ConsumptionRequest {
                medicine_id: medicine,
                notification_id: notification,
                action: status.into(),
                dosage_taken: dosage,
                notes,
            };
            app::commands::record(&cfg, req).await
        }
        Some(Command::Toggle { id, active }) => app::commands::toggle(&cfg, id, active).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rest_status_maps_onto_error_taxonomy() {
        let nf: AppError = RestError::Status {
            status: 404,
            body: "medicine 9".into(),
        }
        .into();
        assert!(matches!(nf, AppError::NotFound(b) if b == "medicine 9"));

        let bad: AppError = RestError::Status {
            status: 400,
            body: "bad time".into(),
        }
        .into();
        assert!(matches!(bad, AppError::Validation(_)));

        let down: AppError = RestError::Http("refused".into()).into();
        assert!(matches!(down, AppError::Http(_)));
    }
}
