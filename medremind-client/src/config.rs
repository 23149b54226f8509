use std::path::{Path, PathBuf};

use chrono_tz::Tz;
use directories::ProjectDirs;
use medremind_shared::schedule;
use serde::{Deserialize, Serialize};

use crate::AppError;
use crate::schedule::AlertPrefs;

pub const ENV_CONFIG: &str = "MEDREMIND_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub server_url: String,
    /// Identifies the patient on every request.
    pub phone_number: String,
    /// Operating timezone; must match the server's.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_interval")]
    pub sync_interval_secs: u64,
    #[serde(default = "default_true")]
    pub sound_enabled: bool,
    #[serde(default = "default_true")]
    pub vibration_enabled: bool,
    /// Where the local copy of medicines and reminders lives.
    #[serde(default)]
    pub cache_path: Option<PathBuf>,
    /// Also write a daily rolling log file under the data dir.
    #[serde(default = "default_true")]
    pub log_to_file: bool,
}

fn default_timezone() -> String {
    "UTC".into()
}

fn default_interval() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

impl ClientConfig {
    pub fn find_and_load(cli_value: Option<PathBuf>) -> Result<(PathBuf, Self), AppError> {
        let path = resolve_config_path(cli_value)?;
        let cfg = load_config(&path)?;
        Ok((path, cfg))
    }

    pub fn tz(&self) -> Result<Tz, AppError> {
        schedule::parse_timezone(&self.timezone).map_err(|e| AppError::Config(e.to_string()))
    }

    pub fn base_url(&self) -> String {
        normalize_server_url(&self.server_url)
    }

    pub fn alert_prefs(&self) -> AlertPrefs {
        AlertPrefs {
            sound_enabled: self.sound_enabled,
            vibration_enabled: self.vibration_enabled,
        }
    }

    pub fn cache_file(&self) -> Result<PathBuf, AppError> {
        if let Some(p) = &self.cache_path {
            return Ok(p.clone());
        }
        default_data_dir()
            .map(|d| d.join("cache.json"))
            .ok_or_else(|| AppError::Config("could not determine data dir".into()))
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.server_url.trim().is_empty() {
            return Err(AppError::Config("server_url is required".into()));
        }
        if self.phone_number.trim().is_empty() {
            return Err(AppError::Config("phone_number is required".into()));
        }
        if self.sync_interval_secs == 0 {
            return Err(AppError::Config("sync_interval_secs must be positive".into()));
        }
        self.tz()?;
        Ok(())
    }
}

pub fn resolve_config_path(cli_value: Option<PathBuf>) -> Result<PathBuf, AppError> {
    if let Some(p) = cli_value {
        return Ok(p);
    }
    if let Ok(p) = std::env::var(ENV_CONFIG) {
        return Ok(PathBuf::from(p));
    }
    default_config_path().ok_or_else(|| AppError::Config("could not determine config dir".into()))
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "medremind", "medremind")
}

pub fn default_config_path() -> Option<PathBuf> {
    Some(project_dirs()?.config_dir().join("client.yaml"))
}

pub fn default_data_dir() -> Option<PathBuf> {
    Some(project_dirs()?.data_dir().to_path_buf())
}

pub fn load_config(path: &Path) -> Result<ClientConfig, AppError> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("read {} failed: {e}", path.display())))?;
    let cfg: ClientConfig = serde_yaml::from_str(&data)
        .map_err(|e| AppError::Config(format!("parse {} failed: {e}", path.display())))?;
    cfg.validate()?;
    Ok(cfg)
}

pub fn normalize_server_url(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", trimmed.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.yaml");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn defaults_fill_optional_fields() {
        let (_dir, path) = write("server_url: meds.local:5151/\nphone_number: \"01012345678\"\n");
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.sync_interval_secs, 60);
        assert!(cfg.sound_enabled);
        assert!(cfg.vibration_enabled);
        assert_eq!(cfg.tz().unwrap(), chrono_tz::UTC);
        assert_eq!(cfg.base_url(), "http://meds.local:5151");
    }

    #[test]
    fn rejects_unknown_timezone() {
        let (_dir, path) = write(
            "server_url: http://x\nphone_number: \"010\"\ntimezone: Mars/Olympus\n",
        );
        assert!(matches!(load_config(&path), Err(AppError::Config(_))));
    }

    #[test]
    fn rejects_missing_phone() {
        let (_dir, path) = write("server_url: http://x\nphone_number: \"  \"\n");
        assert!(matches!(load_config(&path), Err(AppError::Config(_))));
    }

    #[test]
    fn cli_path_wins() {
        let p = resolve_config_path(Some(PathBuf::from("/tmp/a.yaml"))).unwrap();
        assert_eq!(p, PathBuf::from("/tmp/a.yaml"));
    }

    #[test]
    fn explicit_cache_path_is_used() {
        let (_dir, path) = write(
            "server_url: http://x\nphone_number: \"010\"\ncache_path: /var/lib/meds/cache.json\n",
        );
        let cfg = load_config(&path).unwrap();
        assert_eq!(
            cfg.cache_file().unwrap(),
            PathBuf::from("/var/lib/meds/cache.json")
        );
    }
}
