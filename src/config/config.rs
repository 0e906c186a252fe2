// SPDX-License-Identifier: GPL-3.0-only
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const ENV_PREFIX: &str = "FLEETD_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => anyhow::bail!("Unknown log format '{}', expected 'text' or 'json'", other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database holding auto-update state
    pub state_db_path: PathBuf,

    /// Package registry release API endpoint URL
    pub release_api_url: String,

    /// Optional authentication token for the release API
    pub release_api_key: Option<String>,

    /// Container-tooling wrapper used to list, install and remove packages
    pub installer_command: String,

    /// Local API bind address (e.g., "127.0.0.1:8080")
    pub local_api_bind: SocketAddr,

    /// Soak period before a new version may be installed unattended
    pub auto_update_delay_secs: u64,

    /// Intervals between auto-update passes; the last one repeats
    pub auto_update_intervals_secs: Vec<u64>,

    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,

    pub log_format: LogFormat,
}

impl Config {
    /// Load configuration from TOML file with environment variable overrides
    pub fn load() -> anyhow::Result<Self> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::load`], reading environment variables through `env`
    pub fn load_with<F>(env: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config_path = env("FLEETD_CONFIG").unwrap_or_else(|| "config.toml".to_string());

        let mut config: Config = if Path::new(&config_path).exists() {
            let contents = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config file {}", config_path))?;
            toml::from_str(&contents).with_context(|| format!("Invalid config file {}", config_path))?
        } else {
            Config::default()
        };

        config.apply_env(&env)?;
        config.validate()?;

        Ok(config)
    }

    fn apply_env<F>(&mut self, env: &F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| env(&format!("{}{}", ENV_PREFIX, name));

        if let Some(val) = var("STATE_DB_PATH") {
            self.state_db_path = PathBuf::from(val);
        }
        if let Some(val) = var("RELEASE_API_URL") {
            self.release_api_url = val;
        }
        if let Some(val) = var("RELEASE_API_KEY") {
            self.release_api_key = Some(val);
        }
        if let Some(val) = var("INSTALLER_COMMAND") {
            self.installer_command = val;
        }
        if let Some(val) = var("LOCAL_API_BIND") {
            self.local_api_bind = SocketAddr::from_str(&val).context("Invalid FLEETD_LOCAL_API_BIND")?;
        }
        if let Some(val) = var("AUTO_UPDATE_DELAY_SECS") {
            self.auto_update_delay_secs = val.parse().context("Invalid FLEETD_AUTO_UPDATE_DELAY_SECS")?;
        }
        if let Some(val) = var("AUTO_UPDATE_INTERVALS_SECS") {
            self.auto_update_intervals_secs = val
                .split(',')
                .map(|part| part.trim().parse::<u64>())
                .collect::<Result<_, _>>()
                .context("Invalid FLEETD_AUTO_UPDATE_INTERVALS_SECS")?;
        }
        if let Some(val) = var("LOG_LEVEL") {
            self.log_level = val;
        }
        if let Some(val) = var("LOG_FORMAT") {
            self.log_format = val.parse()?;
        }

        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.installer_command.trim().is_empty() {
            anyhow::bail!("installer_command must not be empty");
        }
        if self.auto_update_intervals_secs.contains(&0) {
            anyhow::bail!("auto_update_intervals_secs must not contain zero");
        }
        Ok(())
    }

    pub fn update_delay(&self) -> Duration {
        Duration::from_secs(self.auto_update_delay_secs)
    }

    pub fn update_intervals(&self) -> Vec<Duration> {
        self.auto_update_intervals_secs
            .iter()
            .map(|secs| Duration::from_secs(*secs))
            .collect()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_db_path: PathBuf::from("fleetd.db"),
            release_api_url: String::from("http://localhost:3000/api"),
            release_api_key: None,
            installer_command: String::from("fleet-installer"),
            local_api_bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            auto_update_delay_secs: 24 * 60 * 60,
            auto_update_intervals_secs: vec![120, 600, 1800],
            log_level: String::from("info"),
            log_format: LogFormat::Text,
        }
    }
}
