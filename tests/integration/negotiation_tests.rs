//! Connection-parameter negotiation: retry timing, exhaustion policy, stale
//! timers.

use crate::mock_link::{
    CENTRAL_DEFAULT, LinkCall, PREFERRED, TestSession, advance_secs, h, started,
};

use periph_session::ControllerError;
use periph_session::app::events::{LinkEvent, NegotiationOutcome, SessionEvent};
use periph_session::app::ports::{TimerKind, TimerToken};
use periph_session::config::SessionConfig;
use periph_session::session::SessionState;
use periph_session::session::connection::{DisconnectReason, LinkState};

fn connected_session(disconnect_on_fail: bool) -> TestSession {
    let mut config = SessionConfig::default();
    config.connection.disconnect_on_fail = disconnect_on_fail;
    let mut session = started(config);
    session
        .handle_event(LinkEvent::Connected {
            handle: h(1),
            params: CENTRAL_DEFAULT,
        })
        .unwrap();
    session
}

fn settled(session: &TestSession) -> Vec<NegotiationOutcome> {
    session
        .sink()
        .events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::NegotiationSettled { outcome, .. } => Some(*outcome),
            _ => None,
        })
        .collect()
}

#[test]
fn first_attempt_waits_for_first_delay() {
    let mut session = connected_session(false);
    advance_secs(&mut session, 4);
    assert_eq!(session.link().param_updates(), 0);
    advance_secs(&mut session, 1);
    assert_eq!(session.link().param_updates(), 1);
    assert_eq!(session.link_state(), Some(LinkState::Negotiating));
}

#[test]
fn accepted_update_settles_negotiation() {
    let mut session = connected_session(true);
    advance_secs(&mut session, 5);
    session
        .handle_event(LinkEvent::ParamUpdateSucceeded {
            handle: h(1),
            params: PREFERRED,
        })
        .unwrap();

    assert_eq!(session.link_state(), Some(LinkState::Stable));
    assert_eq!(settled(&session), vec![NegotiationOutcome::Accepted]);

    advance_secs(&mut session, 300);
    assert_eq!(session.link().param_updates(), 1);
    assert_eq!(session.link().disconnects(), 0);
}

#[test]
fn preferred_initial_parameters_need_no_request() {
    let mut session = started(SessionConfig::default());
    session
        .handle_event(LinkEvent::Connected {
            handle: h(1),
            params: PREFERRED,
        })
        .unwrap();
    advance_secs(&mut session, 5);

    assert_eq!(session.link().param_updates(), 0);
    assert_eq!(session.link_state(), Some(LinkState::Stable));
    assert_eq!(settled(&session), vec![NegotiationOutcome::Accepted]);
}

#[test]
fn unanswered_attempts_end_in_exactly_one_disconnect() {
    let mut session = connected_session(true);

    // Attempts at 5 s, 35 s and 65 s; the budget runs out at 95 s.
    advance_secs(&mut session, 94);
    assert_eq!(session.link().param_updates(), 3);
    assert_eq!(session.link().disconnects(), 0);

    advance_secs(&mut session, 1);
    assert_eq!(
        session.link().calls.last(),
        Some(&LinkCall::Disconnect(
            h(1),
            DisconnectReason::UNACCEPTABLE_CONN_PARAMS
        ))
    );
    assert_eq!(session.current_state(), SessionState::Disconnecting);
    assert_eq!(settled(&session), vec![NegotiationOutcome::Disconnecting]);

    advance_secs(&mut session, 300);
    assert_eq!(session.link().disconnects(), 1);
    assert_eq!(session.link().param_updates(), 3);
}

#[test]
fn refused_update_runs_exhaustion_at_once() {
    let mut session = connected_session(true);
    advance_secs(&mut session, 5);
    session
        .handle_event(LinkEvent::ParamUpdateFailed { handle: h(1) })
        .unwrap();

    assert_eq!(session.link().disconnects(), 1);
    assert_eq!(session.current_state(), SessionState::Disconnecting);

    // A duplicate refusal and the old retry schedule change nothing.
    session
        .handle_event(LinkEvent::ParamUpdateFailed { handle: h(1) })
        .unwrap();
    advance_secs(&mut session, 120);
    assert_eq!(session.link().disconnects(), 1);
    assert_eq!(session.link().param_updates(), 1);
}

#[test]
fn three_refusals_produce_exactly_one_disconnect() {
    let mut session = connected_session(true);
    for _ in 0..3 {
        advance_secs(&mut session, 30);
        session
            .handle_event(LinkEvent::ParamUpdateFailed { handle: h(1) })
            .unwrap();
    }

    assert_eq!(session.link().disconnects(), 1);
    assert_eq!(
        session.link().calls.last(),
        Some(&LinkCall::Disconnect(
            h(1),
            DisconnectReason::UNACCEPTABLE_CONN_PARAMS
        ))
    );
    assert_eq!(session.current_state(), SessionState::Disconnecting);
    assert_eq!(session.link_state(), Some(LinkState::Disconnecting));
}

#[test]
fn refusals_without_disconnect_policy_settle_stable() {
    let mut session = connected_session(false);
    for _ in 0..3 {
        advance_secs(&mut session, 30);
        session
            .handle_event(LinkEvent::ParamUpdateFailed { handle: h(1) })
            .unwrap();
    }

    assert_eq!(session.link().disconnects(), 0);
    assert_eq!(session.link_state(), Some(LinkState::Stable));
    assert_eq!(session.current_state(), SessionState::Connected);
    assert_eq!(settled(&session), vec![NegotiationOutcome::AcceptedSubOptimal]);

    advance_secs(&mut session, 300);
    assert_eq!(session.link().disconnects(), 0);
}

#[test]
fn largest_attempt_budget_still_runs_out() {
    let mut config = SessionConfig::default();
    config.connection.disconnect_on_fail = true;
    config.connection.max_update_count = u8::MAX;
    config.connection.next_update_delay_ms = 1_000;
    let mut session = started(config);
    session
        .handle_event(LinkEvent::Connected {
            handle: h(1),
            params: CENTRAL_DEFAULT,
        })
        .unwrap();

    // First attempt at 5 s, then one per second: the 255th goes out at 259 s.
    advance_secs(&mut session, 259);
    assert_eq!(session.link().param_updates(), 255);
    assert_eq!(session.link().disconnects(), 0);

    advance_secs(&mut session, 1);
    assert_eq!(session.link().disconnects(), 1);
    assert_eq!(session.current_state(), SessionState::Disconnecting);

    advance_secs(&mut session, 600);
    assert_eq!(session.link().param_updates(), 255);
    assert_eq!(session.link().disconnects(), 1);
}

#[test]
fn exhaustion_without_disconnect_accepts_link() {
    let mut session = connected_session(false);
    advance_secs(&mut session, 95);

    assert_eq!(session.link().param_updates(), 3);
    assert_eq!(session.link().disconnects(), 0);
    assert_eq!(session.link_state(), Some(LinkState::Stable));
    assert_eq!(session.current_state(), SessionState::Connected);
    assert_eq!(settled(&session), vec![NegotiationOutcome::AcceptedSubOptimal]);

    advance_secs(&mut session, 300);
    assert_eq!(session.link().param_updates(), 3);
}

#[test]
fn rejected_exhaustion_disconnect_keeps_link() {
    let mut session = connected_session(true);
    session.link_mut().fail_disconnect = Some(ControllerError::UnknownHandle);
    advance_secs(&mut session, 95);

    assert_eq!(session.current_state(), SessionState::Connected);
    assert_eq!(session.link_state(), Some(LinkState::Stable));
    assert_eq!(settled(&session), vec![NegotiationOutcome::AcceptedSubOptimal]);
}

#[test]
fn non_preferred_update_keeps_retrying() {
    let mut session = connected_session(true);
    advance_secs(&mut session, 5);
    session
        .handle_event(LinkEvent::ParamUpdateSucceeded {
            handle: h(1),
            params: CENTRAL_DEFAULT,
        })
        .unwrap();
    assert_eq!(session.link_state(), Some(LinkState::Negotiating));

    advance_secs(&mut session, 30);
    assert_eq!(session.link().param_updates(), 2);
}

#[test]
fn stale_timer_from_previous_link_is_dropped() {
    let mut session = connected_session(true);
    advance_secs(&mut session, 3);
    session
        .handle_event(LinkEvent::Disconnected {
            handle: h(1),
            reason: 0x08,
        })
        .unwrap();
    session
        .handle_event(LinkEvent::Connected {
            handle: h(2),
            params: CENTRAL_DEFAULT,
        })
        .unwrap();

    // The first link's attempt carried epoch 1.
    session.on_timer(TimerToken {
        kind: TimerKind::ParamUpdate,
        epoch: 1,
    });
    assert_eq!(session.link().param_updates(), 0);

    advance_secs(&mut session, 5);
    assert_eq!(session.link().param_updates(), 1);
    assert_eq!(session.link().calls.last(), Some(&LinkCall::ParamUpdate(h(2))));
}

#[test]
fn updates_after_settling_are_only_recorded() {
    let mut session = connected_session(true);
    advance_secs(&mut session, 5);
    session
        .handle_event(LinkEvent::ParamUpdateSucceeded {
            handle: h(1),
            params: PREFERRED,
        })
        .unwrap();
    let events_before = session.sink().events.len();

    session
        .handle_event(LinkEvent::ParamUpdateSucceeded {
            handle: h(1),
            params: CENTRAL_DEFAULT,
        })
        .unwrap();
    assert_eq!(session.sink().events.len(), events_before);
    assert_eq!(session.link_state(), Some(LinkState::Stable));
}
