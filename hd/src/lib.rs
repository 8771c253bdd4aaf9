//! handoff - single-instance launch handoff
//!
//! When an application starts, handoff decides whether another instance of it
//! (same user, same display, same port) is already running. If so, the launch
//! arguments are forwarded to that instance and the new process can exit.
//! Otherwise the process becomes the instance that later launches talk to.
//!
//! # Modules
//!
//! - [`rendezvous`] - Deterministic rendezvous file location
//! - [`handle`] - Contact handle persistence and liveness probing
//! - [`ipc`] - Unix socket protocol between launches and the instance
//! - [`server`] - The listening instance
//! - [`dispatch`] - Command grammar and execution
//! - [`coordinator`] - Startup decision: delegate or serve
//! - [`prefs`] - Host application preferences gating the feature
//! - [`config`] - Configuration types and loading
//! - [`host`] - Headless console application actions
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod handle;
pub mod host;
pub mod ipc;
pub mod prefs;
pub mod rendezvous;
pub mod server;

pub use config::Config;
pub use coordinator::{LaunchCoordinator, translate_arguments};
pub use dispatch::{ApplicationActions, Command, Dispatcher};
pub use handle::{ContactHandle, HandleError, HandleStore};
pub use ipc::{EndpointClient, EndpointError};
pub use prefs::ListenerPreference;
pub use rendezvous::RendezvousLocator;
pub use server::{InstanceServer, ServerStartError};
