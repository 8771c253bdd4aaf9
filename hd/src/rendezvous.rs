//! Rendezvous path computation
//!
//! Every process of the same user, on the same display, configured with the
//! same port, computes the same path. That file is where a running instance
//! publishes its contact handle and where later launches look for it.

use std::path::PathBuf;

use tracing::debug;

use crate::config::InstanceConfig;

/// Extension of the rendezvous file
pub const STUB_EXTENSION: &str = "stub";

/// Inputs of the rendezvous path, captured from one environment snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RendezvousLocator {
    pub temp_dir: PathBuf,
    pub app_name: String,
    pub user: String,
    pub display: Option<String>,
    pub port: u16,
}

impl RendezvousLocator {
    /// Capture the current process environment
    ///
    /// Called for every lookup and publish so changes in the environment are
    /// never hidden behind a cached value.
    pub fn from_env(instance: &InstanceConfig) -> Self {
        Self {
            temp_dir: std::env::temp_dir(),
            app_name: instance.app_name.clone(),
            user: current_user_name(),
            display: std::env::var("DISPLAY").ok(),
            port: instance.port,
        }
    }

    /// Same as `from_env` with an explicit temp directory
    pub fn from_env_in(instance: &InstanceConfig, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            ..Self::from_env(instance)
        }
    }

    /// `<tmp>/<app>-<user>-[<display>-]<port>.stub`
    pub fn locate(&self) -> PathBuf {
        let display = match &self.display {
            Some(display) => format!("{}-", sanitize_display(display)),
            None => String::new(),
        };
        let file_name = format!(
            "{}-{}-{}{}.{}",
            self.app_name, self.user, display, self.port, STUB_EXTENSION
        );
        let path = self.temp_dir.join(file_name);
        debug!(?path, "RendezvousLocator::locate: returning path");
        path
    }
}

/// Replace path-unsafe characters of a display identifier with `_`
pub fn sanitize_display(display: &str) -> String {
    display.replace([':', '/'], "_")
}

/// Name of the user owning this process
///
/// Falls back to the usual environment variables, then to an empty segment.
pub fn current_user_name() -> String {
    #[cfg(unix)]
    {
        use nix::unistd::{Uid, User};
        if let Ok(Some(user)) = User::from_uid(Uid::current()) {
            return user.name;
        }
    }

    ["USER", "LOGNAME", "USERNAME"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn locator() -> RendezvousLocator {
        RendezvousLocator {
            temp_dir: PathBuf::from("/tmp"),
            app_name: "ImageJ".to_string(),
            user: "alice".to_string(),
            display: Some(":0.0".to_string()),
            port: 7,
        }
    }

    #[test]
    fn test_locate_with_display() {
        assert_eq!(locator().locate(), PathBuf::from("/tmp/ImageJ-alice-_0.0-7.stub"));
    }

    #[test]
    fn test_locate_without_display() {
        let locator = RendezvousLocator {
            display: None,
            ..locator()
        };
        assert_eq!(locator.locate(), PathBuf::from("/tmp/ImageJ-alice-7.stub"));
    }

    #[test]
    fn test_locate_remote_display() {
        let locator = RendezvousLocator {
            display: Some("host/unix:10.0".to_string()),
            ..locator()
        };
        assert_eq!(locator.locate(), PathBuf::from("/tmp/ImageJ-alice-host_unix_10.0-7.stub"));
    }

    #[test]
    fn test_locate_is_deterministic() {
        assert_eq!(locator().locate(), locator().locate());
    }

    #[test]
    fn test_each_input_changes_path() {
        let base = locator().locate();

        let other_user = RendezvousLocator {
            user: "bob".to_string(),
            ..locator()
        };
        let other_display = RendezvousLocator {
            display: Some(":1".to_string()),
            ..locator()
        };
        let other_port = RendezvousLocator { port: 8, ..locator() };

        assert_ne!(base, other_user.locate());
        assert_ne!(base, other_display.locate());
        assert_ne!(base, other_port.locate());
    }

    #[test]
    fn test_locate_stays_in_temp_dir() {
        let path = locator().locate();
        assert_eq!(path.parent(), Some(PathBuf::from("/tmp").as_path()));
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some(STUB_EXTENSION));
    }

    #[test]
    fn test_from_env_uses_config() {
        let instance = InstanceConfig {
            app_name: "Viewer".to_string(),
            port: 4242,
            ..InstanceConfig::default()
        };
        let locator = RendezvousLocator::from_env_in(&instance, "/var/tmp");
        assert_eq!(locator.port, 4242);
        assert_eq!(locator.app_name, "Viewer");
        assert_eq!(locator.temp_dir, PathBuf::from("/var/tmp"));
        assert!(locator.locate().starts_with("/var/tmp"));
    }

    #[test]
    fn test_sanitize_display() {
        assert_eq!(sanitize_display(":0"), "_0");
        assert_eq!(sanitize_display("a/b:c"), "a_b_c");
        assert_eq!(sanitize_display("plain"), "plain");
    }

    proptest! {
        #[test]
        fn prop_sanitize_only_touches_colon_and_slash(display in ".*") {
            let sanitized = sanitize_display(&display);
            prop_assert!(!sanitized.contains(':'));
            prop_assert!(!sanitized.contains('/'));
            prop_assert_eq!(sanitized.chars().count(), display.chars().count());
            for (before, after) in display.chars().zip(sanitized.chars()) {
                if before == ':' || before == '/' {
                    prop_assert_eq!(after, '_');
                } else {
                    prop_assert_eq!(after, before);
                }
            }
        }

        #[test]
        fn prop_locate_is_pure(user in "[a-z]{1,12}", port in any::<u16>()) {
            let a = RendezvousLocator { user: user.clone(), port, ..locator() };
            let b = RendezvousLocator { user, port, ..locator() };
            prop_assert_eq!(a.locate(), b.locate());
        }
    }
}
