//! Layered daemon configuration.
//!
//! Sources, lowest priority first: built-in defaults, the TOML file
//! (`$MEDIAD_CONFIG`, else `/etc/mediad/config.toml`), `MEDIAD_*` environment
//! variables (`__` separates nested keys, e.g. `MEDIAD_BATCH__SOURCE_FILE`),
//! then command-line overrides.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::core::notifications::NotificationConfig;
use crate::core::registry::BatchConfig;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/mediad/config.toml";
pub const CONFIG_PATH_ENV: &str = "MEDIAD_CONFIG";
const ENV_PREFIX: &str = "MEDIAD_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    pub poll_interval_secs: u64,
    pub stop_timeout_secs: u64,
    pub rpc_bind: SocketAddr,
    pub simulation: bool,
    pub simulation_root: PathBuf,
    pub verbose: bool,
    pub json_logs: bool,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 2,
            stop_timeout_secs: 1,
            rpc_bind: SocketAddr::from(([127, 0, 0, 1], 7474)),
            simulation: false,
            simulation_root: std::env::temp_dir().join("mediad-sim"),
            verbose: false,
            json_logs: false,
            batch: BatchConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from all sources, with `overrides` applied last.
    pub fn new<T: Serialize>(overrides: Option<&T>) -> Result<Self> {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(&path))
            .merge(Env::prefixed(ENV_PREFIX).split("__").ignore(&["config"]));

        if let Some(overrides) = overrides {
            figment = figment.merge(Serialized::defaults(overrides));
        }

        Self::from_figment(figment)
            .with_context(|| format!("Failed to load configuration (file: {})", path.display()))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: AppConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be at least 1");
        }
        if self.batch.enabled && self.batch.source_file.is_none() {
            anyhow::bail!("batch.enabled requires batch.source_file");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.stop_timeout(), Duration::from_secs(1));
        assert!(!config.batch.enabled);
        assert!(config.rpc_bind.ip().is_loopback());
    }

    #[test]
    fn test_toml_layer_and_overrides() {
        #[derive(Serialize)]
        struct Overrides {
            verbose: bool,
        }

        let figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::string(
                r#"
                poll_interval_secs = 5

                [batch]
                enabled = true
                source_file = "/music/loop.wav"
                dest_filename = "track.wav"

                [notifications]
                channel = "slack"
                slack_webhook = "https://hooks.example/abc"
                "#,
            ))
            .merge(Serialized::defaults(Overrides { verbose: true }));

        let config = AppConfig::from_figment(figment).unwrap();
        assert_eq!(config.poll_interval_secs, 5);
        assert!(config.verbose);
        assert!(config.batch.enabled);
        assert_eq!(
            config.batch.source_file,
            Some(PathBuf::from("/music/loop.wav"))
        );
        assert_eq!(config.batch.dest_filename.as_deref(), Some("track.wav"));
        assert_eq!(
            config.notifications.channel,
            crate::core::notifications::NotificationChannelType::Slack
        );
    }

    #[test]
    fn test_rejects_armed_batch_without_source() {
        let figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::string("[batch]\nenabled = true\n"));
        assert!(AppConfig::from_figment(figment).is_err());
    }

    #[test]
    fn test_rejects_zero_interval() {
        let figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::string("poll_interval_secs = 0\n"));
        assert!(AppConfig::from_figment(figment).is_err());
    }

    #[test]
    fn test_to_toml_round_trips_through_figment() {
        let text = AppConfig::default().to_toml().unwrap();
        let figment = Figment::new().merge(Toml::string(&text));
        assert_eq!(AppConfig::from_figment(figment).unwrap(), AppConfig::default());
    }
}
