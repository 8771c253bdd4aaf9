//! Launch coordination
//!
//! On startup a process first tries to hand its arguments to an already
//! running instance. If none answers, it removes whatever stale handle it
//! found and becomes the running instance itself.
//!
//! Checking for the rendezvous file and publishing a new one is not atomic.
//! Two processes starting at the same moment may both become servers; the
//! last one to publish is discoverable, the other keeps running unreachable.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{Config, InstanceConfig};
use crate::dispatch::{Command, Dispatcher};
use crate::handle::{HandleError, HandleStore};
use crate::prefs::ListenerPreference;
use crate::server::InstanceServer;

/// Translate launch arguments into commands, in order
///
/// - the first bare argument ending in the macro extension runs that macro
/// - `-macro NAME [ARG]` runs NAME with ARG and ends translation
/// - `-eval SCRIPT` and `-run COMMAND` consume their value
/// - any other argument that is not an option and does not name the
///   launcher class is opened
///
/// Options are matched by prefix and need a following value. The
/// `user.dir` command is not included.
pub fn translate_arguments(args: &[String], instance: &InstanceConfig) -> Vec<Command> {
    let mut slots: Vec<Option<&str>> = args.iter().map(|a| Some(a.as_str())).collect();
    let mut commands = Vec::new();
    let mut macros = 0;

    for i in 0..slots.len() {
        let Some(arg) = slots[i] else {
            continue;
        };
        let has_value = i + 1 < slots.len();

        if macros == 0 && arg.ends_with(&instance.macro_extension) {
            commands.push(Command::Macro {
                name: arg.to_string(),
                arg: None,
            });
            macros += 1;
        } else if arg.starts_with("-macro") && has_value {
            commands.push(Command::Macro {
                name: slots[i + 1].unwrap_or_default().to_string(),
                arg: slots.get(i + 2).map(|a| a.unwrap_or_default().to_string()),
            });
            break;
        } else if arg.starts_with("-eval") && has_value {
            commands.push(Command::Eval(slots[i + 1].unwrap_or_default().to_string()));
            slots[i + 1] = None;
        } else if arg.starts_with("-run") && has_value {
            commands.push(Command::Run(slots[i + 1].unwrap_or_default().to_string()));
            slots[i + 1] = None;
        } else if !arg.contains(&instance.launcher_class) && !arg.starts_with('-') {
            commands.push(Command::Open(arg.to_string()));
        }
    }

    commands
}

/// Decides at startup whether this process delegates or serves
pub struct LaunchCoordinator {
    config: Config,
    dispatcher: Arc<Dispatcher>,
    preference: ListenerPreference,
    store: HandleStore,
    working_dir: Option<PathBuf>,
    server: Option<InstanceServer>,
}

impl std::fmt::Debug for LaunchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchCoordinator")
            .field("preference", &self.preference)
            .field("store", &self.store)
            .field("working_dir", &self.working_dir)
            .field("server", &self.server)
            .finish_non_exhaustive()
    }
}

impl LaunchCoordinator {
    /// Create a coordinator that serves commands through `dispatcher`
    pub fn new(config: Config, dispatcher: Arc<Dispatcher>) -> Self {
        let preference = ListenerPreference::from_env(&config.preferences);
        let store = HandleStore::new(&config.instance).with_timeout(config.transport.call_timeout());
        Self {
            config,
            dispatcher,
            preference,
            store,
            working_dir: None,
            server: None,
        }
    }

    /// Use an explicit preference location instead of the environment
    pub fn with_preferences(mut self, preference: ListenerPreference) -> Self {
        self.preference = preference;
        self
    }

    /// Place the rendezvous file in `dir` instead of the system temp directory
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.store = self.store.with_temp_dir(dir);
        self
    }

    /// Report `dir` as the working directory instead of the process's
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &HandleStore {
        &self.store
    }

    /// Server started by this coordinator, if any
    pub fn server(&self) -> Option<&InstanceServer> {
        self.server.as_ref()
    }

    /// Take ownership of the started server; the caller controls its lifetime
    pub fn take_server(&mut self) -> Option<InstanceServer> {
        self.server.take()
    }

    /// Hand `args` to a running instance
    ///
    /// Returns true when every command was delivered. Otherwise the process
    /// should run standalone; if no rendezvous file remains, this process has
    /// become the running instance.
    pub async fn try_send_arguments(&mut self, args: &[String]) -> bool {
        debug!(args = args.len(), "try_send_arguments: called");

        if !self.preference.is_enabled() {
            info!("Launch handoff disabled by preferences");
            return false;
        }

        let path = self.store.rendezvous_path();

        if !args.is_empty() {
            match self.deliver(&path, args).await {
                Ok(()) => {
                    info!(?path, "Arguments handed to running instance");
                    return true;
                }
                Err(e) if e.is_stale() => {
                    info!(error = %e, "Removing stale contact handle");
                    self.store.invalidate(&path);
                }
                Err(e @ HandleError::Refused { .. }) => {
                    // The instance is alive; its handle stays published
                    warn!(error = %e, "Running instance refused the arguments");
                    return false;
                }
                Err(e) => {
                    debug!(error = %e, "try_send_arguments: no running instance");
                }
            }
        }

        if !path.exists() {
            self.start_server();
        } else {
            debug!(?path, "try_send_arguments: rendezvous file present, not starting a server");
        }
        false
    }

    async fn deliver(&self, path: &Path, args: &[String]) -> Result<(), HandleError> {
        let handle = self.store.load(path).await?;
        let client = handle.client(self.config.transport.call_timeout());

        let mut commands = vec![Command::UserDir(self.working_dir().display().to_string())];
        commands.extend(translate_arguments(args, &self.config.instance));

        for command in commands {
            client
                .send_argument(&command.to_string())
                .await
                .map_err(|source| {
                    let path = path.to_path_buf();
                    if source.is_unreachable() {
                        HandleError::StaleReference { path, source }
                    } else {
                        HandleError::Refused { path, source }
                    }
                })?;
        }
        Ok(())
    }

    fn working_dir(&self) -> PathBuf {
        if let Some(dir) = &self.working_dir {
            return dir.clone();
        }
        std::env::current_dir().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to determine working directory");
            PathBuf::from(".")
        })
    }

    /// Become the running instance
    ///
    /// Failures are logged; the process then simply runs standalone.
    pub fn start_server(&mut self) -> bool {
        debug!("start_server: called");
        if self.server.is_some() {
            debug!("start_server: already serving");
            return true;
        }

        match InstanceServer::start(&self.store, self.dispatcher.clone()) {
            Ok(server) => {
                self.server = Some(server);
                true
            }
            Err(e) => {
                warn!(error = %e, "Failed to start instance server, running standalone");
                false
            }
        }
    }
}
