//! Session lifecycle: startup, advertising, single-link enforcement,
//! teardown.

use crate::mock_link::{
    CENTRAL_DEFAULT, LinkCall, advance_secs, h, new_session, started,
};

use periph_session::app::events::{AdvertisingEvent, LinkEvent, SessionEvent};
use periph_session::app::ports::Phy;
use periph_session::config::{AddressPolicy, SessionConfig, SlowAdvertising};
use periph_session::session::SessionState;
use periph_session::session::advertising::AdvertisingMode;
use periph_session::session::connection::{ConnectionHandle, DisconnectReason};
use periph_session::session::qwr::QueuedWriteError;
use periph_session::{ConfigError, ControllerError, SessionError, Violation};

fn connected(raw: u16) -> LinkEvent {
    LinkEvent::Connected {
        handle: h(raw),
        params: CENTRAL_DEFAULT,
    }
}

fn disconnected(raw: u16) -> LinkEvent {
    LinkEvent::Disconnected {
        handle: h(raw),
        reason: 0x13,
    }
}

// ── Startup ───────────────────────────────────────────────────

#[test]
fn begin_before_initialize_is_rejected() {
    let mut session = new_session();
    assert_eq!(session.begin_session(), Err(SessionError::StartupIncomplete));
    assert_eq!(session.current_state(), SessionState::Idle);
    assert!(session.link().calls.is_empty());
}

#[test]
fn invalid_configuration_is_rejected_at_initialize() {
    let mut session = new_session();
    let mut config = SessionConfig::default();
    config.connection.min_interval = 200;
    config.connection.max_interval = 100;
    assert_eq!(
        session.initialize_with(config),
        Err(SessionError::Config(ConfigError::Contradictory(
            "min_interval above max_interval"
        )))
    );
    assert_eq!(session.begin_session(), Err(SessionError::StartupIncomplete));
}

#[test]
fn begin_session_sets_address_then_advertises() {
    let session = started(SessionConfig::default());

    assert_eq!(session.current_state(), SessionState::Advertising);
    let calls = &session.link().calls;
    assert!(matches!(calls[0], LinkCall::SetAddress(_)));
    assert_eq!(calls[1], LinkCall::StartAdvertising(AdvertisingMode::Fast));

    let address = session.current_address().unwrap();
    assert!(address.is_valid());
    assert_eq!(
        session.sink().events[0],
        SessionEvent::Started { address }
    );
    assert_eq!(session.sink().transitions(), vec![SessionState::Advertising]);
    assert!(session.is_rotating());
}

#[test]
fn second_begin_reports_busy() {
    let mut session = started(SessionConfig::default());
    let calls_before = session.link().calls.len();

    assert_eq!(session.begin_session(), Err(SessionError::ControllerBusy));
    assert_eq!(session.current_state(), SessionState::Advertising);
    assert_eq!(session.link().calls.len(), calls_before);
}

#[test]
fn controller_refusing_start_leaves_session_idle() {
    let mut session = new_session();
    session.initialize_with(SessionConfig::default()).unwrap();
    session.link_mut().fail_start = Some(ControllerError::Busy);

    assert_eq!(
        session.begin_session(),
        Err(SessionError::ControllerRejected(ControllerError::Busy))
    );
    assert_eq!(session.current_state(), SessionState::Idle);
    assert!(!session.is_advertising());

    session.link_mut().fail_start = None;
    session.begin_session().unwrap();
    assert_eq!(session.current_state(), SessionState::Advertising);
}

// ── Connect / disconnect ──────────────────────────────────────

#[test]
fn connect_stops_advertising_and_binds_handle() {
    let mut session = started(SessionConfig::default());
    session.handle_event(connected(1)).unwrap();

    assert_eq!(session.current_state(), SessionState::Connected);
    assert_eq!(session.connection_handle(), h(1));
    assert!(!session.is_advertising());
    assert_eq!(session.link().calls.last(), Some(&LinkCall::StopAdvertising));
    assert_eq!(session.queued_writes().bound_handle(), h(1));
    assert!(session.sink().events.contains(&SessionEvent::Connected(h(1))));
}

#[test]
fn second_connection_is_rejected_and_first_kept() {
    let mut session = started(SessionConfig::default());
    session.handle_event(connected(1)).unwrap();

    let violation = Violation::SecondConnection { live: 1, offered: 2 };
    assert_eq!(
        session.handle_event(connected(2)),
        Err(SessionError::InvariantViolation(violation))
    );
    assert_eq!(session.connection_handle(), h(1));
    assert_eq!(session.current_state(), SessionState::Connected);
    assert_eq!(
        session.sink().events.last(),
        Some(&SessionEvent::InvariantViolation(violation))
    );
}

#[test]
fn invalid_handle_never_becomes_connected() {
    let mut session = started(SessionConfig::default());
    let result = session.handle_event(LinkEvent::Connected {
        handle: ConnectionHandle::INVALID,
        params: CENTRAL_DEFAULT,
    });
    assert_eq!(
        result,
        Err(SessionError::InvariantViolation(Violation::InvalidHandle))
    );
    assert_eq!(session.current_state(), SessionState::Advertising);
    assert_eq!(session.connection_handle(), ConnectionHandle::INVALID);
}

#[test]
fn disconnect_restarts_advertising() {
    let mut session = started(SessionConfig::default());
    session.handle_event(connected(1)).unwrap();
    session.handle_event(disconnected(1)).unwrap();

    assert_eq!(session.current_state(), SessionState::Advertising);
    assert_eq!(session.connection_handle(), ConnectionHandle::INVALID);
    assert_eq!(session.link().starts(), 2);
    assert_eq!(
        session.sink().transitions(),
        vec![
            SessionState::Advertising,
            SessionState::Connected,
            SessionState::Advertising
        ]
    );
}

#[test]
fn spurious_disconnect_is_ignored() {
    let mut session = started(SessionConfig::default());
    let events_before = session.sink().events.len();

    session.handle_event(disconnected(5)).unwrap();
    assert_eq!(session.current_state(), SessionState::Advertising);
    assert_eq!(session.sink().events.len(), events_before);
    assert_eq!(session.link().starts(), 1);
}

#[test]
fn controller_halted_advertising_on_connect() {
    let mut session = started(SessionConfig::default());
    session.link_mut().fail_stop = Some(ControllerError::InvalidState);
    session.handle_event(connected(3)).unwrap();
    assert_eq!(session.current_state(), SessionState::Connected);
    assert!(!session.is_advertising());

    session.link_mut().fail_stop = None;
    session.handle_event(disconnected(3)).unwrap();
    assert_eq!(session.current_state(), SessionState::Advertising);
}

#[test]
fn failed_restart_after_disconnect_goes_idle() {
    let mut session = started(SessionConfig::default());
    session.handle_event(connected(1)).unwrap();
    session.link_mut().fail_start = Some(ControllerError::Vendor(7));
    session.handle_event(disconnected(1)).unwrap();

    assert_eq!(session.current_state(), SessionState::Idle);
    assert!(session.sink().events.contains(&SessionEvent::AdvertisingFailed(
        SessionError::ControllerRejected(ControllerError::Vendor(7))
    )));
}

#[test]
fn disconnect_discards_queued_writes() {
    let mut session = started(SessionConfig::default());
    session.handle_event(connected(1)).unwrap();
    session.queued_writes().prepare(h(1), 0x2A).unwrap();
    session.handle_event(disconnected(1)).unwrap();

    assert_eq!(session.queued_writes().in_flight(), None);
    assert_eq!(
        session.queued_writes().execute(h(1)),
        Err(QueuedWriteError::NotConnected)
    );
}

// ── Advertising timeouts ──────────────────────────────────────

#[test]
fn fast_timeout_without_slow_mode_goes_idle() {
    let mut session = started(SessionConfig::default());
    session
        .handle_event(LinkEvent::AdvertisingStateChanged(AdvertisingEvent::TimedOut))
        .unwrap();
    assert_eq!(session.current_state(), SessionState::Idle);

    // An entry edge nobody asked for does not revive the session.
    session
        .handle_event(LinkEvent::AdvertisingStateChanged(
            AdvertisingEvent::FastModeEntered,
        ))
        .unwrap();
    assert_eq!(session.current_state(), SessionState::Idle);
    assert_eq!(session.advertising_mode(), None);

    // An explicit begin does.
    session.begin_session().unwrap();
    assert_eq!(session.current_state(), SessionState::Advertising);
    assert_eq!(session.advertising_mode(), Some(AdvertisingMode::Fast));
}

#[test]
fn fast_timeout_falls_back_to_slow_mode() {
    let mut config = SessionConfig::default();
    config.advertising.slow = Some(SlowAdvertising {
        interval: 1600,
        timeout_secs: 0,
    });
    let mut session = started(config);
    session
        .handle_event(LinkEvent::AdvertisingStateChanged(AdvertisingEvent::TimedOut))
        .unwrap();

    assert_eq!(session.current_state(), SessionState::Advertising);
    assert_eq!(session.advertising_mode(), Some(AdvertisingMode::Slow));
    assert_eq!(
        session.link().calls.last(),
        Some(&LinkCall::StartAdvertising(AdvertisingMode::Slow))
    );

    // The fast-mode entry edge queued before the switch is stale.
    session
        .handle_event(LinkEvent::AdvertisingStateChanged(
            AdvertisingEvent::FastModeEntered,
        ))
        .unwrap();
    assert_eq!(session.advertising_mode(), Some(AdvertisingMode::Slow));
}

// ── PHY and unknown events ────────────────────────────────────

#[test]
fn phy_request_answered_with_auto() {
    let mut session = started(SessionConfig::default());
    session.handle_event(connected(1)).unwrap();
    session
        .handle_event(LinkEvent::PhyUpdateRequested { handle: h(1) })
        .unwrap();
    assert_eq!(
        session.link().calls.last(),
        Some(&LinkCall::UpdatePhy(h(1), Phy::Auto, Phy::Auto))
    );
}

#[test]
fn phy_rejection_keeps_link() {
    let mut session = started(SessionConfig::default());
    session.handle_event(connected(1)).unwrap();
    session.link_mut().fail_phy = Some(ControllerError::InvalidParam);
    session
        .handle_event(LinkEvent::PhyUpdateRequested { handle: h(1) })
        .unwrap();

    assert_eq!(session.current_state(), SessionState::Connected);
    assert_eq!(
        session.sink().events.last(),
        Some(&SessionEvent::PhyUpdateFailed(ControllerError::InvalidParam))
    );
}

#[test]
fn unknown_event_changes_nothing() {
    let mut session = started(SessionConfig::default());
    let events_before = session.sink().events.len();
    session.handle_event(LinkEvent::Unknown(0x00FE)).unwrap();
    assert_eq!(session.current_state(), SessionState::Advertising);
    assert_eq!(session.sink().events.len(), events_before);
}

// ── Teardown ──────────────────────────────────────────────────

#[test]
fn end_session_while_advertising() {
    let mut session = started(SessionConfig::default());
    session.end_session().unwrap();

    assert_eq!(session.current_state(), SessionState::Idle);
    assert_eq!(session.link().calls.last(), Some(&LinkCall::StopAdvertising));
    assert!(!session.is_rotating());
    assert_eq!(session.timers().active_count(), 0);
}

#[test]
fn end_session_while_connected_settles_idle() {
    let mut session = started(SessionConfig::default());
    session.handle_event(connected(4)).unwrap();
    session.end_session().unwrap();

    assert_eq!(session.current_state(), SessionState::Disconnecting);
    assert_eq!(
        session.link().calls.last(),
        Some(&LinkCall::Disconnect(h(4), DisconnectReason::REMOTE_USER_TERMINATED))
    );

    session.handle_event(disconnected(4)).unwrap();
    assert_eq!(session.current_state(), SessionState::Idle);
    assert_eq!(session.link().starts(), 1);
    assert_eq!(session.timers().active_count(), 0);

    // The session can be started again.
    session.begin_session().unwrap();
    assert_eq!(session.current_state(), SessionState::Advertising);
}

#[test]
fn request_disconnect_needs_a_link() {
    let mut session = started(SessionConfig::default());
    assert_eq!(
        session.request_disconnect(DisconnectReason::REMOTE_USER_TERMINATED),
        Err(SessionError::NoActiveConnection)
    );

    session.handle_event(connected(1)).unwrap();
    session
        .request_disconnect(DisconnectReason::REMOTE_USER_TERMINATED)
        .unwrap();
    assert_eq!(session.current_state(), SessionState::Disconnecting);

    session.handle_event(disconnected(1)).unwrap();
    assert_eq!(session.current_state(), SessionState::Advertising);
}

#[test]
fn static_address_survives_restart() {
    let mut config = SessionConfig::default();
    config.address = AddressPolicy::StaticRandom;
    let mut session = started(config);
    let first = session.current_address().unwrap();

    session.end_session().unwrap();
    session.begin_session().unwrap();
    advance_secs(&mut session, 60);

    assert_eq!(session.current_address(), Some(first));
    assert_eq!(session.link().addresses(), vec![first]);
}
