//! Connection supervisor.
//!
//! Owns the single connection handle and drives connection-parameter
//! negotiation after a central connects.
//!
//! ```text
//!                on_connected            settled / exhausted (accept)
//!  NoConnection ─────────────▶ Negotiating ─────────────────────▶ Stable
//!       ▲                          │                                │
//!       │                          │ exhausted (disconnect)         │ request_disconnect
//!       │                          ▼                                ▼
//!       └──── on_disconnected ── Disconnecting ◀────────────────────┘
//! ```
//!
//! Each attempt is a one-shot timer.  Leaving `Negotiating` cancels it and
//! bumps the epoch, so a firing that was already queued is dropped.

use core::fmt;

use log::{debug, error, info, warn};

use crate::app::events::NegotiationOutcome;
use crate::app::ports::{LinkController, TimerId, TimerKind, TimerPort, TimerToken};
use crate::config::{ConnectionParams, LinkParams};
use crate::error::{SessionError, Violation};

use embassy_time::Duration;

// ───────────────────────────────────────────────────────────────
// Handle and reason codes
// ───────────────────────────────────────────────────────────────

/// Controller-assigned link identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(u16);

impl ConnectionHandle {
    /// No link.
    pub const INVALID: Self = Self(0xFFFF);

    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "#{}", self.0)
        } else {
            write!(f, "#invalid")
        }
    }
}

/// HCI disconnect reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisconnectReason(pub u8);

impl DisconnectReason {
    pub const REMOTE_USER_TERMINATED: Self = Self(0x13);
    pub const UNACCEPTABLE_CONN_PARAMS: Self = Self(0x3B);
}

// ───────────────────────────────────────────────────────────────
// Supervisor
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    NoConnection,
    Negotiating,
    Stable,
    Disconnecting,
}

pub struct ConnectionSupervisor {
    params: ConnectionParams,
    state: LinkState,
    handle: ConnectionHandle,
    /// Update requests sent on the current link.
    attempts: u8,
    /// Parameters the controller last reported for the current link.
    applied: Option<LinkParams>,
    retry_timer: Option<TimerId>,
    epoch: u32,
}

impl ConnectionSupervisor {
    pub fn new(params: ConnectionParams) -> Self {
        Self {
            params,
            state: LinkState::NoConnection,
            handle: ConnectionHandle::INVALID,
            attempts: 0,
            applied: None,
            retry_timer: None,
            epoch: 0,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Live handle, or [`ConnectionHandle::INVALID`].
    pub fn handle(&self) -> ConnectionHandle {
        self.handle
    }

    /// Bind a new link and schedule the first negotiation attempt.
    pub fn on_connected(
        &mut self,
        handle: ConnectionHandle,
        params: LinkParams,
        timers: &mut impl TimerPort,
    ) -> Result<(), SessionError> {
        if self.state != LinkState::NoConnection {
            return Err(SessionError::AlreadyConnected);
        }
        if !handle.is_valid() {
            return Err(SessionError::InvariantViolation(Violation::InvalidHandle));
        }

        self.handle = handle;
        self.attempts = 0;
        self.applied = Some(params);
        self.state = LinkState::Negotiating;
        info!(
            "ConnSup: {} connected (interval {}, latency {}, timeout {})",
            handle, params.interval, params.latency, params.supervision_timeout
        );

        if let Err(e) = self.arm(self.params.first_update_delay(), timers) {
            error!("ConnSup: cannot schedule negotiation ({}), accepting link as is", e);
            self.state = LinkState::Stable;
        }
        Ok(())
    }

    /// Negotiation timer callback.  Returns the outcome once settled.
    pub fn on_retry_timer(
        &mut self,
        epoch: u32,
        link: &mut impl LinkController,
        timers: &mut impl TimerPort,
    ) -> Option<NegotiationOutcome> {
        if self.state != LinkState::Negotiating
            || self.retry_timer.is_none()
            || epoch != self.epoch
        {
            debug!("ConnSup: stale negotiation token (epoch {} vs {})", epoch, self.epoch);
            return None;
        }
        self.retry_timer = None;

        if self.applied.is_some_and(|p| self.params.accepts(&p)) {
            return Some(self.settle());
        }

        if self.attempts >= self.params.max_update_count {
            return Some(self.exhausted(link, timers));
        }
        self.attempts += 1;

        match link.request_param_update(self.handle, &self.params) {
            Ok(()) => info!(
                "ConnSup: update request {}/{} on {}",
                self.attempts, self.params.max_update_count, self.handle
            ),
            Err(e) => warn!(
                "ConnSup: update request {}/{} rejected ({})",
                self.attempts, self.params.max_update_count, e
            ),
        }

        if let Err(e) = self.arm(self.params.next_update_delay(), timers) {
            error!("ConnSup: cannot schedule next attempt ({})", e);
            return Some(self.exhausted(link, timers));
        }
        None
    }

    /// The controller applied new parameters.
    pub fn on_param_update_succeeded(
        &mut self,
        handle: ConnectionHandle,
        params: LinkParams,
        timers: &mut impl TimerPort,
    ) -> Option<NegotiationOutcome> {
        if handle != self.handle || self.state == LinkState::NoConnection {
            debug!("ConnSup: param update for {} ignored", handle);
            return None;
        }
        self.applied = Some(params);

        if self.state == LinkState::Negotiating && self.params.accepts(&params) {
            self.cancel_retry(timers);
            return Some(self.settle());
        }
        debug!(
            "ConnSup: {} now interval {}, latency {}, timeout {}",
            handle, params.interval, params.latency, params.supervision_timeout
        );
        None
    }

    /// The central refused.  Runs the exhaustion branch immediately.
    pub fn on_param_update_failed(
        &mut self,
        handle: ConnectionHandle,
        link: &mut impl LinkController,
        timers: &mut impl TimerPort,
    ) -> Option<NegotiationOutcome> {
        if handle != self.handle || self.state != LinkState::Negotiating {
            debug!("ConnSup: param update failure for {} ignored", handle);
            return None;
        }
        warn!("ConnSup: central refused parameter update on {}", handle);
        Some(self.exhausted(link, timers))
    }

    /// Link gone.  Returns `false` for spurious notifications.
    pub fn on_disconnected(
        &mut self,
        handle: ConnectionHandle,
        timers: &mut impl TimerPort,
    ) -> bool {
        if self.state == LinkState::NoConnection {
            debug!("ConnSup: duplicate disconnect for {} ignored", handle);
            return false;
        }
        if handle != self.handle {
            warn!("ConnSup: disconnect for {} while {} is live ignored", handle, self.handle);
            return false;
        }

        self.cancel_retry(timers);
        info!("ConnSup: {} disconnected", self.handle);
        self.handle = ConnectionHandle::INVALID;
        self.applied = None;
        self.attempts = 0;
        self.state = LinkState::NoConnection;
        true
    }

    /// Ask the controller to drop the live link.
    pub fn request_disconnect(
        &mut self,
        reason: DisconnectReason,
        link: &mut impl LinkController,
        timers: &mut impl TimerPort,
    ) -> Result<(), SessionError> {
        if !matches!(self.state, LinkState::Negotiating | LinkState::Stable) {
            return Err(SessionError::NoActiveConnection);
        }
        link.disconnect(self.handle, reason)?;
        self.cancel_retry(timers);
        self.state = LinkState::Disconnecting;
        info!("ConnSup: disconnecting {} (reason 0x{:02x})", self.handle, reason.0);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn settle(&mut self) -> NegotiationOutcome {
        self.state = LinkState::Stable;
        info!("ConnSup: {} parameters accepted", self.handle);
        NegotiationOutcome::Accepted
    }

    /// Disconnect or accept, per policy.  Never schedules another attempt.
    fn exhausted(
        &mut self,
        link: &mut impl LinkController,
        timers: &mut impl TimerPort,
    ) -> NegotiationOutcome {
        self.cancel_retry(timers);
        warn!("ConnSup: {} on {}", SessionError::NegotiationExhausted, self.handle);

        if self.params.disconnect_on_fail {
            match link.disconnect(self.handle, DisconnectReason::UNACCEPTABLE_CONN_PARAMS) {
                Ok(()) => {
                    self.state = LinkState::Disconnecting;
                    return NegotiationOutcome::Disconnecting;
                }
                Err(e) => error!("ConnSup: disconnect rejected ({}), keeping link", e),
            }
        }
        self.state = LinkState::Stable;
        NegotiationOutcome::AcceptedSubOptimal
    }

    fn arm(&mut self, delay: Duration, timers: &mut impl TimerPort) -> Result<(), SessionError> {
        self.epoch = self.epoch.wrapping_add(1);
        let token = TimerToken {
            kind: TimerKind::ParamUpdate,
            epoch: self.epoch,
        };
        self.retry_timer = Some(timers.schedule_once(delay, token)?);
        Ok(())
    }

    fn cancel_retry(&mut self, timers: &mut impl TimerPort) {
        if let Some(id) = self.retry_timer.take() {
            timers.cancel(id);
        }
        self.epoch = self.epoch.wrapping_add(1);
    }
}
