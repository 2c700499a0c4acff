use crate::{steam::DEFAULT_API_URL, steamcmd::MonitorTimings};
use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

const CONFIG_FILE: &str = "config.json";
const DATA_FILE: &str = "mods.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_steamcmd_path")]
    pub steamcmd_path: PathBuf,
    /// Overrides the mod list location; defaults to the app data dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_file: Option<PathBuf>,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_startup_grace")]
    pub startup_grace_secs: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub confirm_download_all: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            steamcmd_path: default_steamcmd_path(),
            data_file: None,
            api_url: default_api_url(),
            request_timeout_secs: default_request_timeout(),
            startup_grace_secs: default_startup_grace(),
            idle_timeout_secs: default_idle_timeout(),
            confirm_download_all: true,
        }
    }
}

impl AppConfig {
    pub fn load_or_create_at(path: &Path) -> Result<Self> {
        if path.exists() {
            let raw = fs::read_to_string(path).context("read app config")?;
            let config: AppConfig = serde_json::from_str(&raw).context("parse app config")?;
            return Ok(config);
        }
        let config = AppConfig::default();
        config.save_at(path)?;
        Ok(config)
    }

    pub fn save_at(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("create app data dir")?;
        }
        let raw = serde_json::to_string_pretty(self).context("serialize app config")?;
        fs::write(path, raw).context("write app config")?;
        Ok(())
    }

    pub fn data_file_path(&self) -> Result<PathBuf> {
        match &self.data_file {
            Some(path) => Ok(path.clone()),
            None => Ok(base_data_dir()?.join(DATA_FILE)),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn monitor_timings(&self) -> MonitorTimings {
        MonitorTimings {
            startup_grace: Duration::from_secs(self.startup_grace_secs),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs.max(1)),
            ..MonitorTimings::default()
        }
    }
}

fn default_steamcmd_path() -> PathBuf {
    PathBuf::from("steamcmd")
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_startup_grace() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

pub fn base_data_dir() -> Result<PathBuf> {
    let base = BaseDirs::new().context("resolve home dir")?;
    Ok(base.data_local_dir().join("workshop-downloader"))
}

pub fn config_file_path() -> Result<PathBuf> {
    Ok(base_data_dir()?.join(CONFIG_FILE))
}
