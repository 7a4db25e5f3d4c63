//! Configuration file support for xtk.
//!
//! Loads settings from ~/.config/xtk/config.toml if it exists,
//! otherwise uses the same timeouts and retry counts the protocol layers
//! have always used.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub wm: WmConfig,
    pub grab: GrabConfig,
    pub send: SendConfig,
}

/// General settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Application name registered for send when none is given
    pub app_name: String,
    /// Class used for WM_CLASS of toplevels
    pub app_class: String,
}

/// Window-manager negotiation settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WmConfig {
    /// How long to wait for each ConfigureNotify/MapNotify attempt
    pub configure_timeout_ms: u64,
    /// Record negotiation steps into the event tracer
    pub trace: bool,
}

/// Pointer grab settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GrabConfig {
    /// Attempts at a global grab while another client holds the pointer
    pub retries: u32,
    /// Delay between grab attempts
    pub retry_delay_ms: u64,
}

/// Inter-application send settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SendConfig {
    /// Interval after which a silent target is re-validated
    pub timeout_ms: u64,
    /// Execute inbound commands even if the server access list is open
    pub allow_insecure: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            app_name: "xtk".to_string(),
            app_class: "Xtk".to_string(),
        }
    }
}

impl Default for WmConfig {
    fn default() -> Self {
        Self {
            configure_timeout_ms: 2000,
            trace: false,
        }
    }
}

impl Default for GrabConfig {
    fn default() -> Self {
        Self {
            retries: 10,
            retry_delay_ms: 100,
        }
    }
}

impl Default for SendConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 2000,
            allow_insecure: false,
        }
    }
}

impl WmConfig {
    pub fn configure_timeout(&self) -> Duration {
        Duration::from_millis(self.configure_timeout_ms)
    }
}

impl GrabConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl SendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Config {
    /// Load config from default path (~/.config/xtk/config.toml)
    pub fn load() -> Self {
        Self::load_from_path(Self::default_path())
    }

    /// Default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("xtk")
            .join("config.toml")
    }

    /// Load config from a specific path
    pub fn load_from_path(path: PathBuf) -> Self {
        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    log::info!("Loaded config from {:?}", path);
                    config
                }
                Err(e) => {
                    log::warn!("Failed to parse config: {}", e);
                    Self::default()
                }
            },
            Err(_) => {
                log::info!("No config file found at {:?}, using defaults", path);
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.wm.configure_timeout(), Duration::from_secs(2));
        assert_eq!(config.send.timeout(), Duration::from_secs(2));
        assert_eq!(config.grab.retries, 10);
        assert_eq!(config.grab.retry_delay(), Duration::from_millis(100));
        assert!(!config.send.allow_insecure);
        assert_eq!(config.general.app_name, "xtk");
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let toml = r#"
[send]
timeout_ms = 500

[wm]
trace = true
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.send.timeout_ms, 500);
        assert!(!config.send.allow_insecure);
        assert!(config.wm.trace);
        assert_eq!(config.wm.configure_timeout_ms, 2000);
        assert_eq!(config.grab.retries, 10);
    }

    #[test]
    fn test_empty_file() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.general.app_class, "Xtk");
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = Config::load_from_path(PathBuf::from("/nonexistent/xtk/config.toml"));
        assert_eq!(config.grab.retries, 10);
    }
}
