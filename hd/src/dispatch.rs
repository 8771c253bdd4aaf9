//! Command grammar and dispatch
//!
//! A command is one line of text, `<verb> <payload>`. The dispatcher decodes
//! it and calls into the host application through `ApplicationActions`.
//! Commands execute one at a time.

use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

/// What the host application can be asked to do
pub trait ApplicationActions: Send + Sync {
    /// Open a file and add it to the recent files list
    fn open_file(&self, path: &str);

    /// Run a macro file with an optional argument
    fn run_macro(&self, name: &str, arg: Option<&str>);

    /// Run a named application command
    fn run_command(&self, command: &str);

    /// Evaluate a script; returns its textual output, if any
    fn eval_script(&self, script: &str) -> Option<String>;

    /// Set the default directory of file-open dialogs
    fn set_default_directory(&self, dir: &str);
}

/// A decoded command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Open(String),
    Macro { name: String, arg: Option<String> },
    Run(String),
    Eval(String),
    UserDir(String),
    Unknown(String),
}

impl Command {
    /// Decode a command line; verbs are case-sensitive
    pub fn parse(line: &str) -> Self {
        if let Some(path) = line.strip_prefix("open ") {
            Self::Open(path.to_string())
        } else if let Some(rest) = line.strip_prefix("macro ") {
            let (name, arg) = split_macro(rest);
            Self::Macro {
                name: name.to_string(),
                arg: arg.map(str::to_string),
            }
        } else if let Some(command) = line.strip_prefix("run ") {
            Self::Run(command.to_string())
        } else if let Some(script) = line.strip_prefix("eval ") {
            Self::Eval(script.to_string())
        } else if let Some(dir) = line.strip_prefix("user.dir ") {
            Self::UserDir(dir.to_string())
        } else {
            Self::Unknown(line.to_string())
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Self::Open(_) => "open",
            Self::Macro { .. } => "macro",
            Self::Run(_) => "run",
            Self::Eval(_) => "eval",
            Self::UserDir(_) => "user.dir",
            Self::Unknown(_) => "unknown",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open(path) => write!(f, "open {}", path),
            Self::Macro { name, arg: Some(arg) } => write!(f, "macro {}({})", name, arg),
            Self::Macro { name, arg: None } => write!(f, "macro {}", name),
            Self::Run(command) => write!(f, "run {}", command),
            Self::Eval(script) => write!(f, "eval {}", script),
            Self::UserDir(dir) => write!(f, "user.dir {}", dir),
            Self::Unknown(line) => f.write_str(line),
        }
    }
}

/// Split `name(arg)` at the last `(`
///
/// Only applies when the payload ends with `)` and the `(` is not the first
/// character. Parentheses are not escaped, so a name that itself contains
/// parentheses is split at the wrong place.
fn split_macro(payload: &str) -> (&str, Option<&str>) {
    if payload.ends_with(')')
        && let Some(index) = payload.rfind('(')
        && index > 0
    {
        return (&payload[..index], Some(&payload[index + 1..payload.len() - 1]));
    }
    (payload, None)
}

/// Executes commands against the host application, one at a time
pub struct Dispatcher {
    actions: Arc<dyn ApplicationActions>,
    // Execution lock; also guards the sink for eval output
    output: Mutex<Box<dyn Write + Send>>,
    calls: AtomicU64,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("calls", &self.call_count())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Dispatcher writing eval output to standard output
    pub fn new(actions: Arc<dyn ApplicationActions>) -> Self {
        Self::with_output(actions, Box::new(std::io::stdout()))
    }

    pub fn with_output(actions: Arc<dyn ApplicationActions>, output: Box<dyn Write + Send>) -> Self {
        Self {
            actions,
            output: Mutex::new(output),
            calls: AtomicU64::new(0),
        }
    }

    /// Number of commands received so far
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Decode and execute one command line
    ///
    /// Blocks while another command is executing. Unknown verbs are ignored.
    pub fn dispatch(&self, line: &str) {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        let command = Command::parse(line);
        debug!(call, verb = command.verb(), "Dispatcher::dispatch: called");

        let mut output = self.output.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        match command {
            Command::Open(path) => self.actions.open_file(&path),
            Command::Macro { name, arg } => self.actions.run_macro(&name, arg.as_deref()),
            Command::Run(command) => self.actions.run_command(&command),
            Command::Eval(script) => {
                if let Some(result) = self.actions.eval_script(&script)
                    && let Err(e) = write!(output, "{}", result).and_then(|_| output.flush())
                {
                    warn!(error = %e, "Failed to write eval output");
                }
            }
            Command::UserDir(dir) => self.actions.set_default_directory(&dir),
            Command::Unknown(_) => debug!(call, "Dispatcher::dispatch: ignoring unknown command"),
        }
    }
}
