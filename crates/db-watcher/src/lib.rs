//! Database Watcher
//!
//! Listens on a PostgreSQL notification channel and launches a Docker
//! container for every image reference published on it.
//!
//! This crate provides:
//! - PostgreSQL LISTEN session and notification pump
//! - Docker launcher (inspect, pull, create, start)
//! - Controller that bridges the two and manages start/stop

pub mod config;
pub mod controller;
pub mod docker;
pub mod error;
pub mod notification;
pub mod postgres;
pub mod retry;
pub mod shutdown;

#[cfg(test)]
mod testing;

pub use config::WatcherConfig;
pub use controller::{Controller, ControllerState, RunSummary, RunningController, StopHandle};
pub use error::{ControllerError, EngineError, LaunchError, LaunchPhase, ListenerError};
