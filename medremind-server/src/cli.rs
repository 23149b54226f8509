use clap::{Parser, Subcommand};

const HELP_EPILOG: &str = r#"Server options can also be provided via environment variables:
  CONFIG_PATH (default: ./config.yaml)
  DB_PATH     (default: data/app.db)
  PORT        (default: 5151 or config.listen_port)
  CRON_SECRET (overrides config.cron_secret)

Reminder pushes are sent by an external cron calling GET /api/cron/reminders
every minute, by `send-due` from a system crontab, or by the in-process
ticker when scheduler.enabled is set.
"#;

#[derive(Debug, Parser)]
#[command(
    name = "medremind-server",
    version,
    about = "Medication reminder server",
    long_about = None,
    after_long_help = HELP_EPILOG,
)]
pub struct Cli {
    /// Optional subcommand. Without one, runs the server.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Push every reminder due this minute once, print the summary and exit
    SendDue,
}
