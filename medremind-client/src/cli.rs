use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use medremind_shared::domain::ConsumptionAction;

const HELP_EPILOG: &str = r#"Config resolution order:
  1) --config/-c PATH
  2) $MEDREMIND_CONFIG
  3) Platform default: ~/.config/medremind/client.yaml
"#;

#[derive(Debug, Parser)]
#[command(
    name = "medremind-client",
    version,
    about = "Patient-side medication reminder agent",
    long_about = None,
    after_long_help = HELP_EPILOG,
)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Optional subcommand. Without one, runs the agent.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Sync once and print the derived reminder schedule
    Schedule,
    /// Record what happened with a dose
    Record {
        /// Medicine id
        #[arg(long)]
        medicine: i32,
        /// Reminder id the dose belongs to, if any
        #[arg(long)]
        notification: Option<i32>,
        #[arg(long, value_enum, default_value_t = RecordStatus::Taken)]
        status: RecordStatus,
        /// Units taken; defaults to the medicine's dosage per take
        #[arg(long)]
        dosage: Option<i32>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Turn a reminder on or off
    Toggle {
        /// Reminder id
        #[arg(long)]
        id: i32,
        /// New state
        #[arg(long, action = clap::ArgAction::Set)]
        active: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RecordStatus {
    Taken,
    Skipped,
    Cancel,
}

impl From<RecordStatus> for ConsumptionAction {
    fn from(value: RecordStatus) -> Self {
        match value {
            RecordStatus::Taken => ConsumptionAction::Taken,
            RecordStatus::Skipped => ConsumptionAction::Skipped,
            RecordStatus::Cancel => ConsumptionAction::Cancel,
        }
    }
}
