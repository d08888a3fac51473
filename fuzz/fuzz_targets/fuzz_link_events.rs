//! Fuzz target: `Session::handle_event` / `Session::on_timer`
//!
//! Decodes the input into a stream of controller events and clock ticks
//! and checks the single-link invariants after every step.
//!
//! cargo fuzz run fuzz_link_events

#![no_main]

use embassy_time::Duration;
use libfuzzer_sys::fuzz_target;
use periph_session::ControllerError;
use periph_session::adapters::entropy::EntropySource;
use periph_session::app::events::{AdvertisingEvent, LinkEvent, SessionEvent};
use periph_session::app::ports::{EventSink, LinkController, Phy};
use periph_session::config::{AdvertisingConfig, ConnectionParams, LinkParams, SessionConfig};
use periph_session::session::address::DeviceAddress;
use periph_session::session::advertising::AdvertisingMode;
use periph_session::session::connection::{ConnectionHandle, DisconnectReason};
use periph_session::session::{Session, SessionState};
use periph_session::timer::TickTimerService;

/// Controller that accepts everything.
struct Accepting;

impl LinkController for Accepting {
    fn start_advertising(
        &mut self,
        _config: &AdvertisingConfig,
        _mode: AdvertisingMode,
    ) -> Result<(), ControllerError> {
        Ok(())
    }
    fn stop_advertising(&mut self) -> Result<(), ControllerError> {
        Ok(())
    }
    fn set_address(&mut self, _address: &DeviceAddress) -> Result<(), ControllerError> {
        Ok(())
    }
    fn request_param_update(
        &mut self,
        _handle: ConnectionHandle,
        _params: &ConnectionParams,
    ) -> Result<(), ControllerError> {
        Ok(())
    }
    fn disconnect(
        &mut self,
        _handle: ConnectionHandle,
        _reason: DisconnectReason,
    ) -> Result<(), ControllerError> {
        Ok(())
    }
    fn update_phy(
        &mut self,
        _handle: ConnectionHandle,
        _tx: Phy,
        _rx: Phy,
    ) -> Result<(), ControllerError> {
        Ok(())
    }
}

struct Discard;

impl EventSink for Discard {
    fn emit(&mut self, _event: &SessionEvent) {}
}

fn params(byte: u8) -> LinkParams {
    LinkParams {
        interval: 6 + u16::from(byte),
        latency: 0,
        supervision_timeout: 400,
    }
}

fn decode(chunk: &[u8]) -> Option<LinkEvent> {
    let handle = ConnectionHandle::new(u16::from(chunk[1] & 0x03));
    Some(match chunk[0] % 8 {
        0 => LinkEvent::Connected { handle, params: params(chunk[2]) },
        1 => LinkEvent::Disconnected { handle, reason: chunk[2] },
        2 => LinkEvent::ParamUpdateSucceeded { handle, params: params(chunk[2]) },
        3 => LinkEvent::ParamUpdateFailed { handle },
        4 => LinkEvent::PhyUpdateRequested { handle },
        5 => LinkEvent::AdvertisingStateChanged(match chunk[2] % 3 {
            0 => AdvertisingEvent::FastModeEntered,
            1 => AdvertisingEvent::SlowModeEntered,
            _ => AdvertisingEvent::TimedOut,
        }),
        6 => LinkEvent::Unknown(u16::from_le_bytes([chunk[1], chunk[2]])),
        _ => return None,
    })
}

fuzz_target!(|data: &[u8]| {
    let mut session = Session::new(
        Accepting,
        TickTimerService::new(),
        Discard,
        EntropySource::seeded(7),
    );
    if session.initialize_with(SessionConfig::default()).is_err()
        || session.begin_session().is_err()
    {
        return;
    }

    for chunk in data.chunks_exact(3) {
        match decode(chunk) {
            Some(event) => {
                let _ = session.handle_event(event);
            }
            None => {
                let fired = session
                    .timers_mut()
                    .advance(Duration::from_secs(u64::from(chunk[2])));
                for token in fired {
                    session.on_timer(token);
                }
            }
        }

        let handle = session.connection_handle();
        let state = session.current_state();
        assert_eq!(
            handle.is_valid(),
            matches!(state, SessionState::Connected | SessionState::Disconnecting)
        );
        assert!(!(session.is_advertising() && handle.is_valid()));
    }
});
