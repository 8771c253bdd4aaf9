//! hd - single-instance launcher
//!
//! Hands its arguments to a running instance, or becomes that instance.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, FromArgMatches};
use eyre::{Context, Result};
use tracing::{debug, info};

use handoff::cli::{Cli, generate_after_help, get_log_path};
use handoff::config::Config;
use handoff::coordinator::{LaunchCoordinator, translate_arguments};
use handoff::dispatch::Dispatcher;
use handoff::handle::{HandleError, HandleStore};
use handoff::host::ConsoleActions;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_path = get_log_path();
    let log_dir = log_path.parent().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    // Append: client launches and the instance share one log
    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .context("Failed to open log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cmd = Cli::command().after_help(generate_after_help());
    let cli = Cli::from_arg_matches(&cmd.get_matches())?;

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());

    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    cli.apply_overrides(&mut config);

    info!(
        pid = std::process::id(),
        port = config.instance.port,
        args = cli.args.len(),
        "hd starting"
    );

    if cli.ping {
        return cmd_ping(&config).await;
    }

    cmd_launch(config, &cli.args, cli.batch).await
}

/// Report whether a running instance answers at the rendezvous path
async fn cmd_ping(config: &Config) -> Result<()> {
    debug!("cmd_ping: called");
    let store = HandleStore::new(&config.instance).with_timeout(config.transport.call_timeout());
    let path = store.rendezvous_path();

    match store.load(&path).await {
        Ok(handle) => {
            debug!(?handle, "cmd_ping: instance answered");
            println!("Instance is alive and responsive");
            println!("PID: {}", handle.pid);
            println!("Version: {}", handle.version);
        }
        Err(HandleError::NotFound { .. }) => {
            println!("No running instance ({})", path.display());
        }
        Err(e) => {
            debug!(error = %e, "cmd_ping: load failed");
            println!("Rendezvous file exists but the instance is not responding");
            println!("Error: {}", e);
        }
    }
    Ok(())
}

async fn cmd_launch(config: Config, args: &[String], batch: bool) -> Result<()> {
    debug!(args = args.len(), batch, "cmd_launch: called");
    let instance = config.instance.clone();
    let mut signals = ShutdownSignals::install()?;
    let dispatcher = Arc::new(Dispatcher::new(Arc::new(ConsoleActions::new())));

    let mut coordinator = LaunchCoordinator::new(config, dispatcher.clone());
    if coordinator.try_send_arguments(args).await {
        info!("Delegated to running instance, exiting");
        return Ok(());
    }

    let server = coordinator.take_server();
    if server.is_none() {
        info!("Running standalone");
    }

    // Apply our own arguments the way a running instance would
    for command in translate_arguments(args, &instance) {
        let line = command.to_string();
        let dispatcher = dispatcher.clone();
        tokio::task::spawn_blocking(move || dispatcher.dispatch(&line))
            .await
            .context("Local dispatch failed")?;
    }

    if batch {
        debug!("cmd_launch: batch mode, exiting");
        if let Some(server) = server {
            server.shutdown().await;
        }
        return Ok(());
    }

    signals.recv().await?;
    if let Some(server) = server {
        server.shutdown().await;
    }
    info!("hd exiting");
    Ok(())
}

/// Termination signals, registered before the rendezvous file is published
struct ShutdownSignals {
    #[cfg(unix)]
    sigint: tokio::signal::unix::Signal,
    #[cfg(unix)]
    sigterm: tokio::signal::unix::Signal,
    #[cfg(unix)]
    sighup: tokio::signal::unix::Signal,
}

impl ShutdownSignals {
    fn install() -> Result<Self> {
        debug!("ShutdownSignals::install: setting up signal handlers");
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            Ok(Self {
                sigint: signal(SignalKind::interrupt())?,
                sigterm: signal(SignalKind::terminate())?,
                sighup: signal(SignalKind::hangup())?,
            })
        }

        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    async fn recv(&mut self) -> Result<()> {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = self.sigint.recv() => {
                    info!("Received SIGINT, shutting down");
                }
                _ = self.sigterm.recv() => {
                    info!("Received SIGTERM, shutting down");
                }
                _ = self.sighup.recv() => {
                    info!("Received SIGHUP, shutting down");
                }
            }
        }

        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await?;
            info!("Received Ctrl+C, shutting down");
        }

        Ok(())
    }
}
