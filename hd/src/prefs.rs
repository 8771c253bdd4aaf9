//! Host application preference store
//!
//! The host keeps its settings in a flat key/value file (Java properties
//! syntax). Only one value matters here: the options bitmask whose listener
//! bit turns launch handoff on or off.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::PreferencesConfig;

/// Parsed contents of a preference file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Preferences {
    entries: HashMap<String, String>,
}

impl Preferences {
    /// Load a preference file; a missing or unreadable file yields an empty store
    pub fn load(path: &Path) -> Self {
        debug!(?path, "Preferences::load: called");
        match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(e) => {
                debug!(?path, error = %e, "Preferences::load: unreadable, using empty store");
                Self::default()
            }
        }
    }

    /// Parse properties text: `key=value`, `key: value` or `key value`
    pub fn parse(content: &str) -> Self {
        let mut entries = HashMap::new();
        let mut logical = String::new();

        for raw in content.lines() {
            let line = raw.trim_start();
            if logical.is_empty() && (line.is_empty() || line.starts_with('#') || line.starts_with('!')) {
                continue;
            }

            // An odd number of trailing backslashes continues the line
            let trailing = line.chars().rev().take_while(|&c| c == '\\').count();
            if trailing % 2 == 1 {
                logical.push_str(&line[..line.len() - 1]);
                continue;
            }
            logical.push_str(line);

            if let Some((key, value)) = split_entry(&logical) {
                entries.insert(key, value);
            }
            logical.clear();
        }

        if !logical.is_empty()
            && let Some((key, value)) = split_entry(&logical)
        {
            entries.insert(key, value);
        }

        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Integer value of `key`, decoded like the host does (`0x`, `#`, octal, sign)
    ///
    /// Returns `None` when the key is absent or the value does not decode.
    pub fn get_int(&self, key: &str) -> Option<i32> {
        let value = self.get(key)?;
        match decode_int(value) {
            Some(n) => Some(n),
            None => {
                warn!(%key, %value, "Preference value is not an integer");
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Split one logical line at the first unescaped `=`, `:` or whitespace
fn split_entry(line: &str) -> Option<(String, String)> {
    let mut key = String::new();
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    key.push(unescape(next));
                }
            }
            '=' | ':' => break,
            c if c.is_whitespace() => {
                // Whitespace separator may be followed by an explicit `=` or `:`
                while chars.peek().is_some_and(|c| c.is_whitespace()) {
                    chars.next();
                }
                if chars.peek().is_some_and(|&c| c == '=' || c == ':') {
                    chars.next();
                }
                break;
            }
            c => key.push(c),
        }
    }

    if key.is_empty() {
        return None;
    }

    while chars.peek().is_some_and(|c| c.is_whitespace()) {
        chars.next();
    }

    let mut value = String::new();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                value.push(unescape(next));
            }
        } else {
            value.push(c);
        }
    }

    Some((key, value))
}

fn unescape(c: char) -> char {
    match c {
        't' => '\t',
        'n' => '\n',
        'r' => '\r',
        'f' => '\u{c}',
        other => other,
    }
}

/// Decode an integer the way `java.lang.Integer.decode` does
///
/// Accepts an optional sign followed by `0x`/`0X`/`#` (hex), a leading `0`
/// (octal) or plain decimal digits. No surrounding whitespace is allowed.
pub fn decode_int(s: &str) -> Option<i32> {
    let (negative, rest) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };

    let (radix, digits) = if let Some(hex) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
        (16, hex)
    } else if let Some(hex) = rest.strip_prefix('#') {
        (16, hex)
    } else if rest.len() > 1 && rest.starts_with('0') {
        (8, &rest[1..])
    } else {
        (10, rest)
    };

    if digits.is_empty() || digits.starts_with('-') || digits.starts_with('+') {
        return None;
    }

    let magnitude = i64::from_str_radix(digits, radix).ok()?;
    let value = if negative { -magnitude } else { magnitude };
    i32::try_from(value).ok()
}

/// Resolve the preferences directory
///
/// The environment override wins; otherwise the platform default is used.
pub fn preferences_dir(config: &PreferencesConfig) -> PathBuf {
    if let Ok(dir) = std::env::var(&config.dir_env) {
        debug!(env = %config.dir_env, %dir, "preferences_dir: using environment override");
        return PathBuf::from(dir);
    }

    if cfg!(windows) {
        return std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    }

    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    if cfg!(target_os = "macos") {
        home.join("Library").join("Preferences")
    } else {
        home.join(&config.home_subdir)
    }
}

/// Decides whether launch handoff is enabled at all
#[derive(Debug, Clone)]
pub struct ListenerPreference {
    config: PreferencesConfig,
    dir: PathBuf,
}

impl ListenerPreference {
    /// Resolve the preference location from the environment
    pub fn from_env(config: &PreferencesConfig) -> Self {
        Self {
            config: config.clone(),
            dir: preferences_dir(config),
        }
    }

    /// Use an explicit preferences directory
    pub fn with_dir(config: &PreferencesConfig, dir: impl Into<PathBuf>) -> Self {
        Self {
            config: config.clone(),
            dir: dir.into(),
        }
    }

    pub fn prefs_file(&self) -> PathBuf {
        self.dir.join(&self.config.file_name)
    }

    /// Whether the listener bit is set
    ///
    /// Missing file, missing key or an undecodable value all mean enabled,
    /// and so does an explicit `-1`.
    pub fn is_enabled(&self) -> bool {
        debug!(dir = ?self.dir, "ListenerPreference::is_enabled: called");
        if self.config.always_enabled {
            debug!("ListenerPreference::is_enabled: always enabled on this platform");
            return true;
        }

        let prefs = Preferences::load(&self.prefs_file());
        let options = match prefs.get_int(&self.config.options_key) {
            Some(-1) | None => {
                debug!("ListenerPreference::is_enabled: no options value, defaulting to enabled");
                return true;
            }
            Some(options) => options,
        };

        let mask = 1i64 << self.config.listener_bit.min(31);
        let enabled = (i64::from(options) & mask) != 0;
        debug!(options, enabled, "ListenerPreference::is_enabled: returning");
        enabled
    }
}
