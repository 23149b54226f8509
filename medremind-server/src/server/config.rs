use chrono_tz::Tz;
use medremind_shared::domain::PatientProfile;
use medremind_shared::schedule::parse_timezone;
use serde::Deserialize;
use std::{env, fs, path::Path};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// IANA name of the single operating timezone all reminder times live in.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Shared secret the cron trigger must present as a bearer token.
    #[serde(default)]
    pub cron_secret: String,
    #[serde(default)]
    pub patients: Vec<PatientProfile>,
    pub dev_cors_origin: Option<String>,
    pub listen_port: Option<u16>,
    pub push: Option<PushConfig>,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushConfig {
    #[serde(default)]
    pub enabled: bool,
    pub vapid_public: Option<String>,
    pub vapid_private: Option<String>,
    pub contact_email: Option<String>,
    /// Base URL of the patient app; reminder deep links hang off it.
    #[serde(default = "default_app_url")]
    pub app_url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchedulerConfig {
    /// Run the reminder push batch every minute in-process.
    #[serde(default)]
    pub enabled: bool,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_app_url() -> String {
    "/".to_string()
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Yaml(e) => write!(f, "YAML error: {}", e),
            ConfigError::Invalid(e) => write!(f, "invalid config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        ConfigError::Io(value)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(value: serde_yaml::Error) -> Self {
        ConfigError::Yaml(value)
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());
        let mut cfg = Self::load_from_path(path)?;
        if let Ok(secret) = env::var("CRON_SECRET")
            && !secret.trim().is_empty()
        {
            cfg.cron_secret = secret;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(&path)?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let cfg: AppConfig = serde_yaml::from_str(text)?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tz()?;
        if self.cron_secret.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "cron_secret must be set (or CRON_SECRET in the environment)".into(),
            ));
        }
        if self.patients.iter().any(|p| p.phone_number.trim().is_empty()) {
            return Err(ConfigError::Invalid("patient with empty phone_number".into()));
        }
        Ok(())
    }

    pub fn tz(&self) -> Result<Tz, ConfigError> {
        parse_timezone(&self.timezone).map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}
