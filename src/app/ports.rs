//! Port traits: the hexagonal boundary between the session core and the
//! outside world.
//!
//! ```text
//!   LinkController ──▶ LinkEvent ──▶ Session (domain) ──▶ EventSink
//!   TimerPort      ──▶ TimerToken ─┘        │
//!        ▲                                  │
//!        └──────── commands ◀───────────────┘
//! ```
//!
//! The radio stack and the timer service are collaborators, not part of the
//! core.  [`Session`](crate::session::Session) owns one implementation of
//! each, handed over at construction, and never touches hardware directly.

use embassy_time::Duration;

use crate::config::{AdvertisingConfig, ConnectionParams};
use crate::error::{ControllerError, TimerError};
use crate::session::address::DeviceAddress;
use crate::session::advertising::AdvertisingMode;
use crate::session::connection::{ConnectionHandle, DisconnectReason};

// ───────────────────────────────────────────────────────────────
// Link controller port (driven adapter: domain → radio stack)
// ───────────────────────────────────────────────────────────────

/// PHY preference for a PHY update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phy {
    /// Let the controller pick.
    Auto,
    Le1M,
    Le2M,
    Coded,
}

/// Command sink of the link-layer controller.
///
/// Every command returns immediately; outcomes that take radio time arrive
/// later as [`LinkEvent`](super::events::LinkEvent)s.
pub trait LinkController {
    /// Start connectable advertising with `config` in the given mode.
    fn start_advertising(
        &mut self,
        config: &AdvertisingConfig,
        mode: AdvertisingMode,
    ) -> Result<(), ControllerError>;

    fn stop_advertising(&mut self) -> Result<(), ControllerError>;

    /// Apply a new on-air address.
    fn set_address(&mut self, address: &DeviceAddress) -> Result<(), ControllerError>;

    /// Ask the central for the preferred parameters in `params`.
    fn request_param_update(
        &mut self,
        handle: ConnectionHandle,
        params: &ConnectionParams,
    ) -> Result<(), ControllerError>;

    fn disconnect(
        &mut self,
        handle: ConnectionHandle,
        reason: DisconnectReason,
    ) -> Result<(), ControllerError>;

    /// Propose PHYs for both directions of `handle`.
    fn update_phy(&mut self, handle: ConnectionHandle, tx: Phy, rx: Phy)
    -> Result<(), ControllerError>;
}

// ───────────────────────────────────────────────────────────────
// Timer port (driven adapter: domain → timer service)
// ───────────────────────────────────────────────────────────────

/// Which component a timer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Connection-parameter negotiation attempt.
    ParamUpdate,
    /// Private address rotation.
    AddressRotation,
}

/// Opaque payload handed back on expiry.
///
/// `epoch` is the owner's generation at scheduling time.  Owners bump their
/// epoch whenever they cancel or leave the state that armed the timer, so a
/// token that fires late no longer matches and is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerToken {
    pub kind: TimerKind,
    pub epoch: u32,
}

/// Handle to a scheduled timer.  The generation distinguishes successive
/// users of the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerId {
    pub slot: u8,
    pub generation: u16,
}

/// One-shot and repeating timers that report back with a [`TimerToken`].
pub trait TimerPort {
    fn schedule_once(&mut self, delay: Duration, token: TimerToken) -> Result<TimerId, TimerError>;

    fn schedule_repeating(
        &mut self,
        period: Duration,
        token: TimerToken,
    ) -> Result<TimerId, TimerError>;

    /// Cancel `id`.  Unknown or already-expired ids are ignored.
    fn cancel(&mut self, id: TimerId);
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / indication)
// ───────────────────────────────────────────────────────────────

/// The session emits structured [`SessionEvent`](super::events::SessionEvent)s
/// through this port.  Adapters decide where they go (serial log, status
/// LED, telemetry characteristic, etc.).
pub trait EventSink {
    fn emit(&mut self, event: &super::events::SessionEvent);
}
