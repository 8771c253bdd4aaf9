//! Handoff configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main handoff configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Identity of the application instance (name, port, launcher marker)
    pub instance: InstanceConfig,

    /// Where the host application's preference store lives
    pub preferences: PreferencesConfig,

    /// Transport tuning for endpoint calls
    pub transport: TransportConfig,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Fallback chain searched when no explicit path is given
    ///
    /// Project-local `.handoff.yml` first, then `~/.config/handoff/handoff.yml`.
    pub fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(".handoff.yml")];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("handoff").join("handoff.yml"));
        }
        paths
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        for candidate in Self::candidate_paths().iter().filter(|p| p.exists()) {
            match Self::load_from_file(candidate) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", candidate.display(), e);
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is initialized
    ///
    /// Follows the same chain as `load`, skipping files that fail to parse.
    /// Errors are swallowed; the full `load` reports them once logging is up.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let candidates = match config_path {
            Some(path) => vec![path.clone()],
            None => Self::candidate_paths(),
        };

        candidates
            .iter()
            .filter(|p| p.exists())
            .filter_map(|p| fs::read_to_string(p).ok())
            .find_map(|content| serde_yaml::from_str::<Self>(&content).ok())
            .and_then(|config| config.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Identity of the coordinated application
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    /// Application name, first segment of the rendezvous file name
    #[serde(rename = "app-name")]
    pub app_name: String,

    /// Listening port the application is configured with
    pub port: u16,

    /// Launcher class name; arguments containing it are never opened as files
    #[serde(rename = "launcher-class")]
    pub launcher_class: String,

    /// Suffix of bare arguments that are run as a macro instead of opened
    #[serde(rename = "macro-extension")]
    pub macro_extension: String,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            app_name: "ImageJ".to_string(),
            port: 7,
            launcher_class: "ij.ImageJ".to_string(),
            macro_extension: ".ijm".to_string(),
        }
    }
}

/// Location and layout of the host application's preference file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreferencesConfig {
    /// Environment variable naming an explicit preferences directory
    #[serde(rename = "dir-env")]
    pub dir_env: String,

    /// Preference file name inside the preferences directory
    #[serde(rename = "file-name")]
    pub file_name: String,

    /// Directory under the home directory holding the preferences (non-macOS, non-Windows)
    #[serde(rename = "home-subdir")]
    pub home_subdir: String,

    /// Key holding the options bitmask
    #[serde(rename = "options-key")]
    pub options_key: String,

    /// Bit index that enables the socket listener
    #[serde(rename = "listener-bit")]
    pub listener_bit: u32,

    /// Force coordination on regardless of the preference file
    #[serde(rename = "always-enabled")]
    pub always_enabled: bool,
}

impl Default for PreferencesConfig {
    fn default() -> Self {
        Self {
            dir_env: "IJ_PREFS_DIR".to_string(),
            file_name: "IJ_Prefs.txt".to_string(),
            home_subdir: ".imagej".to_string(),
            options_key: "prefs.options".to_string(),
            listener_bit: 22,
            always_enabled: cfg!(target_os = "macos"),
        }
    }
}

/// Endpoint transport configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Per-operation timeout for connect/write/read in milliseconds; unset waits forever
    #[serde(rename = "call-timeout-ms")]
    pub call_timeout_ms: Option<u64>,
}

impl TransportConfig {
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }
}
