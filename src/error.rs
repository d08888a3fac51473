//! Unified error types for the peripheral session core.
//!
//! A single [`SessionError`] enum that every component converts into, so the
//! orchestrator and the main loop inspect one outcome type.  All variants are
//! `Copy` so they can be returned through the event path without allocation.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level session error
// ---------------------------------------------------------------------------

/// Every fallible session operation funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    /// Configuration was malformed or contradictory at `initialize`.
    Config(ConfigError),
    /// The link controller refused a command.
    ControllerRejected(ControllerError),
    /// Advertising is already running or a link is live.
    ControllerBusy,
    /// `begin_session` was called before `initialize`.
    StartupIncomplete,
    /// A second link was reported while one is live.
    AlreadyConnected,
    /// An operation needed a live link and there is none.
    NoActiveConnection,
    /// Negotiation retries ran out (handled per policy, surfaced for logs).
    NegotiationExhausted,
    /// An event contradicted a session invariant; it was rejected.
    InvariantViolation(Violation),
    /// The timer service could not take another timer.
    Timer(TimerError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "config: {e}"),
            Self::ControllerRejected(e) => write!(f, "controller rejected: {e}"),
            Self::ControllerBusy => write!(f, "controller busy"),
            Self::StartupIncomplete => write!(f, "session not initialized"),
            Self::AlreadyConnected => write!(f, "already connected"),
            Self::NoActiveConnection => write!(f, "no active connection"),
            Self::NegotiationExhausted => write!(f, "parameter negotiation exhausted"),
            Self::InvariantViolation(v) => write!(f, "invariant violation: {v}"),
            Self::Timer(e) => write!(f, "timer: {e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// A field is outside its allowed range.  Names the field.
    OutOfRange(&'static str),
    /// Two fields contradict each other.  Describes the conflict.
    Contradictory(&'static str),
    /// The encoded advertising payload exceeds 31 bytes.
    PayloadTooLong,
    /// A stored or provisioned configuration blob did not decode.
    Malformed,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfRange(field) => write!(f, "{field} out of range"),
            Self::Contradictory(msg) => write!(f, "contradictory policy: {msg}"),
            Self::PayloadTooLong => write!(f, "advertising payload exceeds 31 bytes"),
            Self::Malformed => write!(f, "configuration blob malformed"),
        }
    }
}

impl From<ConfigError> for SessionError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Controller errors
// ---------------------------------------------------------------------------

/// Reasons a link controller may refuse a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerError {
    /// The command is not valid in the controller's current state.
    InvalidState,
    /// A parameter was rejected.
    InvalidParam,
    /// The connection handle is unknown to the controller.
    UnknownHandle,
    /// The controller is out of resources; try later.
    Busy,
    /// Vendor-specific status code.
    Vendor(u32),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidState => write!(f, "invalid state"),
            Self::InvalidParam => write!(f, "invalid parameter"),
            Self::UnknownHandle => write!(f, "unknown connection handle"),
            Self::Busy => write!(f, "busy"),
            Self::Vendor(code) => write!(f, "vendor status 0x{code:x}"),
        }
    }
}

impl From<ControllerError> for SessionError {
    fn from(e: ControllerError) -> Self {
        Self::ControllerRejected(e)
    }
}

// ---------------------------------------------------------------------------
// Invariant violations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    /// A Connected event arrived while a link was already live.
    SecondConnection { live: u16, offered: u16 },
    /// A Connected event carried the invalid-handle sentinel.
    InvalidHandle,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SecondConnection { live, offered } => write!(
                f,
                "connection {offered} offered while {live} is live"
            ),
            Self::InvalidHandle => write!(f, "connection reported with invalid handle"),
        }
    }
}

// ---------------------------------------------------------------------------
// Timer errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerError {
    /// Every timer slot is occupied.
    NoFreeSlot,
}

impl fmt::Display for TimerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoFreeSlot => write!(f, "no free timer slot"),
        }
    }
}

impl From<TimerError> for SessionError {
    fn from(e: TimerError) -> Self {
        Self::Timer(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, SessionError>;
