//! Mock link controller and event sink for integration tests.
//!
//! Records every controller command so tests can assert on the full command
//! history without a radio.  Individual commands can be made to fail.

use embassy_time::Duration;
use periph_session::ControllerError;
use periph_session::app::events::SessionEvent;
use periph_session::app::ports::{EventSink, LinkController, Phy};
use periph_session::config::{AdvertisingConfig, ConnectionParams, LinkParams, SessionConfig};
use periph_session::session::address::DeviceAddress;
use periph_session::session::advertising::AdvertisingMode;
use periph_session::session::connection::{ConnectionHandle, DisconnectReason};
use periph_session::session::{Session, SessionState};
use periph_session::timer::TickTimerService;
use rand::SeedableRng;
use rand::rngs::StdRng;

// ── Controller call record ────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCall {
    StartAdvertising(AdvertisingMode),
    StopAdvertising,
    SetAddress(DeviceAddress),
    ParamUpdate(ConnectionHandle),
    Disconnect(ConnectionHandle, DisconnectReason),
    UpdatePhy(ConnectionHandle, Phy, Phy),
}

// ── MockLink ──────────────────────────────────────────────────

#[derive(Default)]
pub struct MockLink {
    pub calls: Vec<LinkCall>,
    pub fail_start: Option<ControllerError>,
    pub fail_stop: Option<ControllerError>,
    pub fail_set_address: Option<ControllerError>,
    pub fail_disconnect: Option<ControllerError>,
    pub fail_phy: Option<ControllerError>,
}

#[allow(dead_code)]
impl MockLink {
    pub fn count(&self, pred: impl Fn(&LinkCall) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    pub fn disconnects(&self) -> usize {
        self.count(|c| matches!(c, LinkCall::Disconnect(..)))
    }

    pub fn param_updates(&self) -> usize {
        self.count(|c| matches!(c, LinkCall::ParamUpdate(_)))
    }

    pub fn addresses(&self) -> Vec<DeviceAddress> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                LinkCall::SetAddress(a) => Some(*a),
                _ => None,
            })
            .collect()
    }

    pub fn starts(&self) -> usize {
        self.count(|c| matches!(c, LinkCall::StartAdvertising(_)))
    }
}

impl LinkController for MockLink {
    fn start_advertising(
        &mut self,
        _config: &AdvertisingConfig,
        mode: AdvertisingMode,
    ) -> Result<(), ControllerError> {
        if let Some(e) = self.fail_start {
            return Err(e);
        }
        self.calls.push(LinkCall::StartAdvertising(mode));
        Ok(())
    }

    fn stop_advertising(&mut self) -> Result<(), ControllerError> {
        if let Some(e) = self.fail_stop {
            return Err(e);
        }
        self.calls.push(LinkCall::StopAdvertising);
        Ok(())
    }

    fn set_address(&mut self, address: &DeviceAddress) -> Result<(), ControllerError> {
        if let Some(e) = self.fail_set_address {
            return Err(e);
        }
        self.calls.push(LinkCall::SetAddress(*address));
        Ok(())
    }

    fn request_param_update(
        &mut self,
        handle: ConnectionHandle,
        _params: &ConnectionParams,
    ) -> Result<(), ControllerError> {
        self.calls.push(LinkCall::ParamUpdate(handle));
        Ok(())
    }

    fn disconnect(
        &mut self,
        handle: ConnectionHandle,
        reason: DisconnectReason,
    ) -> Result<(), ControllerError> {
        if let Some(e) = self.fail_disconnect {
            return Err(e);
        }
        self.calls.push(LinkCall::Disconnect(handle, reason));
        Ok(())
    }

    fn update_phy(
        &mut self,
        handle: ConnectionHandle,
        tx: Phy,
        rx: Phy,
    ) -> Result<(), ControllerError> {
        if let Some(e) = self.fail_phy {
            return Err(e);
        }
        self.calls.push(LinkCall::UpdatePhy(handle, tx, rx));
        Ok(())
    }
}

// ── RecordingSink ─────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<SessionEvent>,
}

#[allow(dead_code)]
impl RecordingSink {
    /// Every `to` of a `StateChanged`, in order.
    pub fn transitions(&self) -> Vec<SessionState> {
        self.events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::StateChanged { to, .. } => Some(*to),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&SessionEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &SessionEvent) {
        self.events.push(*event);
    }
}

// ── Session fixtures ──────────────────────────────────────────

pub type TestSession = Session<MockLink, TickTimerService, RecordingSink, StdRng>;

/// Parameters a central typically picks on connect: 30 ms, outside the
/// default 100..200 ms window.
pub const CENTRAL_DEFAULT: LinkParams = LinkParams {
    interval: 24,
    latency: 0,
    supervision_timeout: 400,
};

/// Inside the default window.
pub const PREFERRED: LinkParams = LinkParams {
    interval: 120,
    latency: 0,
    supervision_timeout: 400,
};

pub fn new_session() -> TestSession {
    Session::new(
        MockLink::default(),
        TickTimerService::new(),
        RecordingSink::default(),
        StdRng::seed_from_u64(42),
    )
}

pub fn started(config: SessionConfig) -> TestSession {
    let mut session = new_session();
    session.initialize_with(config).unwrap();
    session.begin_session().unwrap();
    session
}

/// Advance the timer service in 1 s steps, delivering every expiry.
pub fn advance_secs(session: &mut TestSession, secs: u64) {
    for _ in 0..secs {
        let fired = session.timers_mut().advance(Duration::from_secs(1));
        for token in fired {
            session.on_timer(token);
        }
    }
}

pub fn h(raw: u16) -> ConnectionHandle {
    ConnectionHandle::new(raw)
}
