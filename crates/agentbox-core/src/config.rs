//! Configuration management for the daemon.

use crate::{CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Virtual bind-address token resolved to the current Tailscale IP.
pub const TAILSCALE_TOKEN: &str = "tailscale";

/// Network binding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Addresses host-facing listeners bind to. The literal `"tailscale"`
    /// resolves to the currently detected Tailscale IPv4 address and is
    /// skipped while none is available.
    #[serde(default = "default_bind_addresses")]
    pub bind_addresses: Vec<String>,
}

fn default_bind_addresses() -> Vec<String> {
    vec!["127.0.0.1".to_string(), TAILSCALE_TOKEN.to_string()]
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addresses: default_bind_addresses(),
        }
    }
}

/// Tailscale monitoring configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TailscaleMonitorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_check_interval")]
    pub check_interval_seconds: f64,
}

fn default_true() -> bool {
    true
}

fn default_check_interval() -> f64 {
    30.0
}

impl Default for TailscaleMonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_seconds: default_check_interval(),
        }
    }
}

/// Notification configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationsConfig {
    /// Optional script invoked with `[title, message, urgency]` after every
    /// notification.
    #[serde(default)]
    pub notify_hook: Option<PathBuf>,
}

/// Main daemon configuration (~/.config/agentbox/config.json).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub tailscale_monitor: TailscaleMonitorConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    /// Library directory holding mcp/ and skills/ entries. Defaults to the
    /// library dir under the config directory.
    #[serde(default)]
    pub library_dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            network: NetworkConfig::default(),
            tailscale_monitor: TailscaleMonitorConfig::default(),
            notifications: NotificationsConfig::default(),
            library_dir: None,
        }
    }
}

impl Config {
    /// Load configuration from the config file, falling back to defaults
    /// when it does not exist. Unknown fields are ignored for forward
    /// compatibility.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Override configuration from environment variables.
    fn load_from_env(&mut self) {
        if let Ok(log_level) = std::env::var("AGENTBOX_LOG_LEVEL") {
            self.log_level = log_level;
        }
    }

    /// Whether any bind address uses the Tailscale token.
    pub fn uses_tailscale(&self) -> bool {
        self.network
            .bind_addresses
            .iter()
            .any(|a| a.eq_ignore_ascii_case(TAILSCALE_TOKEN))
    }

    /// Effective library directory.
    pub fn library_dir(&self, paths: &Paths) -> PathBuf {
        self.library_dir
            .clone()
            .unwrap_or_else(|| paths.library_dir())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_include_tailscale_token() {
        let config = Config::default();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.network.bind_addresses, vec!["127.0.0.1", "tailscale"]);
        assert!(config.uses_tailscale());
        assert!(config.tailscale_monitor.enabled);
        assert_eq!(config.tailscale_monitor.check_interval_seconds, 30.0);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());
        let config = Config::load(&paths).unwrap();
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"network": {"bind_addresses": ["0.0.0.0"]}, "future_field": 1}"#,
        )
        .unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.network.bind_addresses, vec!["0.0.0.0"]);
        assert!(!config.uses_tailscale());
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn notify_hook_round_trips() {
        let json = r#"{"notifications": {"notify_hook": "/home/user/hook.sh"}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(
            config.notifications.notify_hook,
            Some(PathBuf::from("/home/user/hook.sh"))
        );
    }
}
