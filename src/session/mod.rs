//! Session orchestrator, the hexagonal core.
//!
//! [`Session`] owns the three session components and the authoritative
//! [`SessionState`].  Controller events enter through
//! [`Session::handle_event`], timer expiries through [`Session::on_timer`];
//! both run on the one serialized execution context (see
//! [`crate::events::EventMailbox`] for the hand-off from callback context).
//!
//! ```text
//!          begin_session                 Connected
//!   Idle ───────────────▶ Advertising ─────────────▶ Connected ◀─┐ PhyUpdateRequested
//!    ▲  ◀── WentIdle ────     ▲                        │   │  ───┘
//!    │                        │     Disconnected       │   │ request_disconnect /
//!    │                        └────(auto-restart)──────┘   │ negotiation exhausted
//!    │                                                     ▼
//!    └──────── Disconnected after end_session ─────── Disconnecting
//! ```
//!
//! Components never change the session state themselves; they return
//! outcomes and the orchestrator decides.

pub mod address;
pub mod advertising;
pub mod connection;
pub mod qwr;

use log::{debug, error, info, warn};
use rand_core::RngCore;

use crate::app::events::{LinkEvent, NegotiationOutcome, SessionEvent};
use crate::app::ports::{EventSink, LinkController, Phy, TimerKind, TimerPort, TimerToken};
use crate::config::{AddressPolicy, AdvertisingConfig, ConnectionParams, SessionConfig};
use crate::error::{Result, SessionError, Violation};
use crate::events::{EventMailbox, Incoming};
use crate::timer::TickTimerService;

use address::{AddressRotation, DeviceAddress, RotationOutcome};
use advertising::{AdvTransition, AdvertisingManager, AdvertisingMode};
use connection::{ConnectionHandle, ConnectionSupervisor, DisconnectReason, LinkState};
use qwr::QueuedWriteGuard;

// ---------------------------------------------------------------------------
// State identity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SessionState {
    Idle = 0,
    Advertising = 1,
    Connected = 2,
    Disconnecting = 3,
}

/// Components built by `initialize`.
struct Components {
    advertising: AdvertisingManager,
    connection: ConnectionSupervisor,
    address: AddressRotation,
}

impl Components {
    /// The session state implied by the components alone.
    fn implied_state(&self) -> SessionState {
        match self.connection.state() {
            LinkState::Negotiating | LinkState::Stable => SessionState::Connected,
            LinkState::Disconnecting => SessionState::Disconnecting,
            LinkState::NoConnection if self.advertising.is_advertising() => {
                SessionState::Advertising
            }
            LinkState::NoConnection => SessionState::Idle,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Session
// ───────────────────────────────────────────────────────────────

/// One peripheral session.  Owns its collaborators; no global state, so any
/// number of sessions can coexist (tests run many in parallel).
pub struct Session<L, T, S, R> {
    link: L,
    timers: T,
    sink: S,
    rng: R,
    parts: Option<Components>,
    queued_writes: QueuedWriteGuard,
    state: SessionState,
    started: bool,
    /// Set by `end_session`; suppresses the advertising auto-restart.
    ending: bool,
}

impl<L, T, S, R> Session<L, T, S, R>
where
    L: LinkController,
    T: TimerPort,
    S: EventSink,
    R: RngCore,
{
    /// Wire the collaborators.  Call [`Session::initialize`] next.
    pub fn new(link: L, timers: T, sink: S, rng: R) -> Self {
        Self {
            link,
            timers,
            sink,
            rng,
            parts: None,
            queued_writes: QueuedWriteGuard::new(),
            state: SessionState::Idle,
            started: false,
            ending: false,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Validate and install the GAP parameters and address policy.
    pub fn initialize(
        &mut self,
        advertising: AdvertisingConfig,
        connection: ConnectionParams,
        address: AddressPolicy,
    ) -> Result<()> {
        if self.state != SessionState::Idle {
            warn!("Session: initialize refused in {:?}", self.state);
            return Err(SessionError::ControllerBusy);
        }
        if let Some(parts) = self.parts.as_mut() {
            parts.address.stop(&mut self.timers);
        }

        let config = SessionConfig {
            advertising,
            connection,
            address,
        };
        config
            .validate()
            .inspect_err(|e| error!("Session: invalid configuration ({})", e))?;

        self.parts = Some(Components {
            advertising: AdvertisingManager::new(config.advertising)?,
            connection: ConnectionSupervisor::new(config.connection),
            address: AddressRotation::new(config.address),
        });
        info!("Session: initialized ({:?})", config.address);
        Ok(())
    }

    /// Convenience for a whole [`SessionConfig`].
    pub fn initialize_with(&mut self, config: SessionConfig) -> Result<()> {
        self.initialize(config.advertising, config.connection, config.address)
    }

    /// Apply the startup address and start advertising.
    pub fn begin_session(&mut self) -> Result<()> {
        let Some(parts) = self.parts.as_mut() else {
            warn!("Session: begin_session before initialize");
            return Err(SessionError::StartupIncomplete);
        };
        if self.state != SessionState::Idle {
            warn!("Session: begin_session in {:?}", self.state);
            return Err(SessionError::ControllerBusy);
        }

        let address = parts
            .address
            .start(&mut self.link, &mut self.timers, &mut self.rng)?;
        parts
            .advertising
            .start(self.state, &mut self.link)?;

        self.ending = false;
        if !self.started {
            self.started = true;
            self.sink.emit(&SessionEvent::Started { address });
        }
        self.transition(SessionState::Advertising);
        Ok(())
    }

    /// Orderly teardown.  Settles in `Idle` once any live link has dropped.
    pub fn end_session(&mut self) -> Result<()> {
        let Some(parts) = self.parts.as_mut() else {
            return Err(SessionError::StartupIncomplete);
        };

        match self.state {
            SessionState::Idle => {
                parts.address.stop(&mut self.timers);
            }
            SessionState::Advertising => {
                parts.advertising.stop(&mut self.link)?;
                parts.address.stop(&mut self.timers);
                self.transition(SessionState::Idle);
            }
            SessionState::Connected => {
                parts.connection.request_disconnect(
                    DisconnectReason::REMOTE_USER_TERMINATED,
                    &mut self.link,
                    &mut self.timers,
                )?;
                self.transition(SessionState::Disconnecting);
            }
            SessionState::Disconnecting => {}
        }
        self.ending = true;
        info!("Session: ending");
        Ok(())
    }

    /// Drop the live link.  Advertising restarts once the controller confirms.
    pub fn request_disconnect(&mut self, reason: DisconnectReason) -> Result<()> {
        let Some(parts) = self.parts.as_mut() else {
            return Err(SessionError::NoActiveConnection);
        };
        parts
            .connection
            .request_disconnect(reason, &mut self.link, &mut self.timers)?;
        self.transition(SessionState::Disconnecting);
        Ok(())
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn current_state(&self) -> SessionState {
        self.state
    }

    /// Last on-air address the controller accepted; `None` before
    /// `begin_session`.
    pub fn current_address(&self) -> Option<DeviceAddress> {
        self.parts.as_ref().and_then(|p| p.address.current())
    }

    pub fn connection_handle(&self) -> ConnectionHandle {
        self.parts
            .as_ref()
            .map_or(ConnectionHandle::INVALID, |p| p.connection.handle())
    }

    pub fn link_state(&self) -> Option<LinkState> {
        self.parts.as_ref().map(|p| p.connection.state())
    }

    pub fn is_advertising(&self) -> bool {
        self.parts
            .as_ref()
            .is_some_and(|p| p.advertising.is_advertising())
    }

    /// Advertising mode last commanded, `None` while not advertising.
    pub fn advertising_mode(&self) -> Option<AdvertisingMode> {
        self.parts.as_ref().and_then(|p| p.advertising.mode())
    }

    pub fn is_rotating(&self) -> bool {
        self.parts.as_ref().is_some_and(|p| p.address.is_rotating())
    }

    /// Encoded advertising payload, once initialized.
    pub fn advertising_payload(&self) -> Option<&[u8]> {
        self.parts.as_ref().map(|p| p.advertising.payload())
    }

    pub fn queued_writes(&mut self) -> &mut QueuedWriteGuard {
        &mut self.queued_writes
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn timers(&self) -> &T {
        &self.timers
    }

    pub fn timers_mut(&mut self) -> &mut T {
        &mut self.timers
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    // ── Event entry points ────────────────────────────────────

    /// Single entry point for everything drained from the mailbox.
    pub fn dispatch(&mut self, incoming: Incoming) {
        match incoming {
            Incoming::Link(event) => {
                if let Err(e) = self.handle_event(event) {
                    debug!("Session: {:?} rejected ({})", event, e);
                }
            }
            Incoming::Timer(token) => self.on_timer(token),
        }
    }

    /// Route one controller event.
    pub fn handle_event(&mut self, event: LinkEvent) -> Result<()> {
        let Some(parts) = self.parts.as_mut() else {
            warn!("Session: {:?} before initialize ignored", event);
            return Ok(());
        };

        match event {
            LinkEvent::Connected { handle, params } => {
                match parts.connection.on_connected(handle, params, &mut self.timers) {
                    Ok(()) => {}
                    Err(SessionError::AlreadyConnected) => {
                        let violation = Violation::SecondConnection {
                            live: parts.connection.handle().raw(),
                            offered: handle.raw(),
                        };
                        return Err(self.reject(violation));
                    }
                    Err(SessionError::InvariantViolation(violation)) => {
                        return Err(self.reject(violation));
                    }
                    Err(e) => return Err(e),
                }

                // Most controllers halt advertising on connect; stop anyway
                // so the manager's view matches.
                if let Err(e) = parts.advertising.stop(&mut self.link) {
                    debug!("Session: advertising stop after connect ({})", e);
                    parts.advertising.mark_halted();
                }
                self.queued_writes.bind(handle);
                self.sink.emit(&SessionEvent::Connected(handle));
                self.transition(SessionState::Connected);
            }

            LinkEvent::Disconnected { handle, reason } => {
                if !parts.connection.on_disconnected(handle, &mut self.timers) {
                    return Ok(());
                }
                self.queued_writes.release();
                self.sink.emit(&SessionEvent::Disconnected { handle, reason });

                if self.ending {
                    parts.address.stop(&mut self.timers);
                    self.transition(SessionState::Idle);
                    return Ok(());
                }

                let view = parts.implied_state();
                match parts.advertising.start(view, &mut self.link) {
                    Ok(()) => self.transition(SessionState::Advertising),
                    Err(e) => {
                        warn!("Session: advertising restart failed ({})", e);
                        self.sink.emit(&SessionEvent::AdvertisingFailed(e));
                        self.transition(SessionState::Idle);
                    }
                }
            }

            LinkEvent::ParamUpdateSucceeded { handle, params } => {
                let outcome =
                    parts
                        .connection
                        .on_param_update_succeeded(handle, params, &mut self.timers);
                self.settled(handle, outcome);
            }

            LinkEvent::ParamUpdateFailed { handle } => {
                let outcome = parts.connection.on_param_update_failed(
                    handle,
                    &mut self.link,
                    &mut self.timers,
                );
                self.settled(handle, outcome);
            }

            LinkEvent::PhyUpdateRequested { handle } => {
                if self.state != SessionState::Connected || handle != parts.connection.handle() {
                    debug!("Session: PHY request for {} ignored in {:?}", handle, self.state);
                    return Ok(());
                }
                if let Err(e) = self.link.update_phy(handle, Phy::Auto, Phy::Auto) {
                    warn!("Session: PHY update on {} rejected ({})", handle, e);
                    self.sink.emit(&SessionEvent::PhyUpdateFailed(e));
                }
            }

            LinkEvent::AdvertisingStateChanged(adv_event) => {
                if matches!(self.state, SessionState::Connected | SessionState::Disconnecting) {
                    debug!("Session: {:?} with live link ignored", adv_event);
                    return Ok(());
                }
                let edge = parts
                    .advertising
                    .on_advertising_event(adv_event, &mut self.link);
                match (edge, self.state) {
                    (Some(AdvTransition::WentIdle), SessionState::Advertising) => {
                        self.transition(SessionState::Idle);
                    }
                    (Some(AdvTransition::EnteredAdvertising), SessionState::Idle) => {
                        self.transition(SessionState::Advertising);
                    }
                    _ => {}
                }
            }

            LinkEvent::Unknown(code) => {
                info!("Session: unhandled controller event 0x{:04x} ignored", code);
            }
        }
        Ok(())
    }

    /// Timer expiry from the timer service.
    pub fn on_timer(&mut self, token: TimerToken) {
        let Some(parts) = self.parts.as_mut() else {
            return;
        };

        match token.kind {
            TimerKind::ParamUpdate => {
                let handle = parts.connection.handle();
                let outcome =
                    parts
                        .connection
                        .on_retry_timer(token.epoch, &mut self.link, &mut self.timers);
                self.settled(handle, outcome);
            }
            TimerKind::AddressRotation => {
                match parts
                    .address
                    .on_rotation_due(token.epoch, &mut self.link, &mut self.rng)
                {
                    RotationOutcome::Rotated(address) => {
                        self.sink.emit(&SessionEvent::AddressRotated(address));
                    }
                    RotationOutcome::Rejected(e) => {
                        self.sink.emit(&SessionEvent::AddressRotationFailed(e));
                    }
                    RotationOutcome::Stale => {}
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn settled(&mut self, handle: ConnectionHandle, outcome: Option<NegotiationOutcome>) {
        let Some(outcome) = outcome else { return };
        self.sink
            .emit(&SessionEvent::NegotiationSettled { handle, outcome });
        if outcome == NegotiationOutcome::Disconnecting {
            self.transition(SessionState::Disconnecting);
        }
    }

    fn reject(&mut self, violation: Violation) -> SessionError {
        error!("Session: {}, rejected, live link kept", violation);
        self.sink.emit(&SessionEvent::InvariantViolation(violation));
        SessionError::InvariantViolation(violation)
    }

    fn transition(&mut self, to: SessionState) {
        if to == self.state {
            return;
        }
        info!("Session: {:?} -> {:?}", self.state, to);
        self.sink.emit(&SessionEvent::StateChanged {
            from: self.state,
            to,
        });
        self.state = to;
    }
}

impl<L, S, R> Session<L, TickTimerService, S, R>
where
    L: LinkController,
    S: EventSink,
    R: RngCore,
{
    /// One main-loop pass: drain queued controller events in order, then
    /// advance the timer service by `elapsed` and deliver each expiry.
    ///
    /// Expiries go straight to [`Session::on_timer`]; only controller
    /// callbacks share the bounded mailbox.  Returns the events drained.
    pub fn run_once(
        &mut self,
        mailbox: &EventMailbox,
        elapsed: embassy_time::Duration,
    ) -> usize {
        let drained = mailbox.drain(|incoming| self.dispatch(incoming));
        for token in self.timers.advance(elapsed) {
            self.on_timer(token);
        }
        drained
    }
}
