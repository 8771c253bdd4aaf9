//! Headless console host
//!
//! Stands in for the desktop application when `hd` runs on its own: every
//! action is reported on standard output and in the log.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::{debug, info};

use crate::dispatch::ApplicationActions;

/// Console implementation of the application actions
pub struct ConsoleActions {
    out: Mutex<Box<dyn Write + Send>>,
    default_dir: Mutex<Option<PathBuf>>,
}

impl std::fmt::Debug for ConsoleActions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleActions")
            .field("default_dir", &self.default_dir())
            .finish_non_exhaustive()
    }
}

impl Default for ConsoleActions {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleActions {
    pub fn new() -> Self {
        Self::with_writer(Box::new(std::io::stdout()))
    }

    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
            default_dir: Mutex::new(None),
        }
    }

    /// Directory last set through `user.dir`
    pub fn default_dir(&self) -> Option<PathBuf> {
        self.default_dir.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn report(&self, line: std::fmt::Arguments<'_>) {
        let mut out = self.out.lock().unwrap_or_else(|p| p.into_inner());
        // Stdout going away must not take the instance down
        let _ = writeln!(out, "{}", line).and_then(|_| out.flush());
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = PathBuf::from(path);
        match self.default_dir() {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path,
        }
    }
}

impl ApplicationActions for ConsoleActions {
    fn open_file(&self, path: &str) {
        let resolved = self.resolve(path);
        info!(path = ?resolved, "Opening file");
        self.report(format_args!("open: {}", resolved.display()));
    }

    fn run_macro(&self, name: &str, arg: Option<&str>) {
        info!(%name, ?arg, "Running macro");
        match arg {
            Some(arg) => self.report(format_args!("macro: {} ({})", name, arg)),
            None => self.report(format_args!("macro: {}", name)),
        }
    }

    fn run_command(&self, command: &str) {
        info!(%command, "Running command");
        self.report(format_args!("run: {}", command));
    }

    fn eval_script(&self, script: &str) -> Option<String> {
        info!(bytes = script.len(), "Evaluating script");
        self.report(format_args!("eval: {}", script));
        // No interpreter here
        None
    }

    fn set_default_directory(&self, dir: &str) {
        debug!(%dir, "ConsoleActions::set_default_directory: called");
        *self.default_dir.lock().unwrap_or_else(|p| p.into_inner()) = Some(PathBuf::from(dir));
        self.report(format_args!("user.dir: {}", dir));
    }
}
