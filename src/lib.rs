//! BLE peripheral session core.
//!
//! Exposes the pure-logic modules for integration testing and the host
//! simulation.  All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod events;
pub mod session;
pub mod timer;

mod error;

pub use error::{ConfigError, ControllerError, Result, SessionError, TimerError, Violation};
