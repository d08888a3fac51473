//! Inbound controller events and outbound session events.
//!
//! [`LinkEvent`] is everything the link controller can report; it reaches the
//! session through one entry point,
//! [`Session::handle_event`](crate::session::Session::handle_event).
//! [`SessionEvent`] is what the session publishes through the
//! [`EventSink`](super::ports::EventSink) port.

use crate::config::LinkParams;
use crate::error::{ControllerError, SessionError, Violation};
use crate::session::SessionState;
use crate::session::address::DeviceAddress;
use crate::session::connection::ConnectionHandle;

/// Advertising transitions reported by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertisingEvent {
    FastModeEntered,
    SlowModeEntered,
    /// The current advertising phase ran out.
    TimedOut,
}

/// Asynchronous notifications from the link controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// A central connected with the given initial parameters.
    Connected {
        handle: ConnectionHandle,
        params: LinkParams,
    },
    Disconnected {
        handle: ConnectionHandle,
        reason: u8,
    },
    /// The controller applied new parameters on `handle`.
    ParamUpdateSucceeded {
        handle: ConnectionHandle,
        params: LinkParams,
    },
    /// The central refused or the procedure timed out.
    ParamUpdateFailed { handle: ConnectionHandle },
    PhyUpdateRequested { handle: ConnectionHandle },
    AdvertisingStateChanged(AdvertisingEvent),
    /// Anything this core does not model.  Logged and ignored.
    Unknown(u16),
}

/// How a negotiation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationOutcome {
    /// The link runs with parameters inside the preferred window.
    Accepted,
    /// Retries ran out; the link stays up with what the central chose.
    AcceptedSubOptimal,
    /// Retries ran out; the link is being torn down.
    Disconnecting,
}

/// Structured events emitted by the session core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// `begin_session` succeeded with this on-air address.
    Started { address: DeviceAddress },

    StateChanged { from: SessionState, to: SessionState },

    Connected(ConnectionHandle),

    Disconnected { handle: ConnectionHandle, reason: u8 },

    NegotiationSettled {
        handle: ConnectionHandle,
        outcome: NegotiationOutcome,
    },

    AddressRotated(DeviceAddress),

    /// The controller refused a new address; the previous one stays.
    AddressRotationFailed(ControllerError),

    PhyUpdateFailed(ControllerError),

    /// Advertising could not be (re)started.
    AdvertisingFailed(SessionError),

    /// An event was rejected because it contradicted session state.
    InvariantViolation(Violation),
}
