//! CLI definitions for the `hd` launcher

use clap::Parser;
use std::path::PathBuf;
use tracing::debug;

use crate::config::Config;
use crate::handle::HandleStore;

/// hd - hand launch arguments to an already running instance
#[derive(Debug, Parser)]
#[command(
    name = "hd",
    about = "Hand launch arguments to a running instance, or become that instance",
    version = env!("GIT_DESCRIBE"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Override the configured port
    #[arg(short, long, help = "Port identifying the instance (overrides config)")]
    pub port: Option<u16>,

    /// Exit after applying the arguments instead of serving
    #[arg(long)]
    pub batch: bool,

    /// Only report whether a running instance answers
    #[arg(long)]
    pub ping: bool,

    /// Launch arguments: files, `-macro NAME [ARG]`, `-eval SCRIPT`, `-run COMMAND`
    #[arg(
        value_name = "ARGS",
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub args: Vec<String>,
}

impl Cli {
    /// Apply command line overrides to the loaded configuration
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(port) = self.port {
            debug!(port, "apply_overrides: overriding port");
            config.instance.port = port;
        }
    }
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    let path = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("handoff")
        .join("logs")
        .join("handoff.log");
    debug!(?path, "get_log_path: returning path");
    path
}

/// Generate the after_help text with the rendezvous and log locations
pub fn generate_after_help() -> String {
    debug!("generate_after_help: called");
    let config = Config::default();
    let rendezvous = HandleStore::new(&config.instance).rendezvous_path();
    let status = if rendezvous.exists() {
        "published"
    } else {
        "none"
    };

    format!(
        "Rendezvous file (default port): {} [{}]\nLogs are written to: {}",
        rendezvous.display(),
        status,
        get_log_path().display()
    )
}
