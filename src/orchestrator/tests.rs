use std::{cell::RefCell, rc::Rc};

use embassy_time::Duration;

use super::*;
use crate::{
    provisioning::ProvisioningEvent,
    testing::{portal_identity, sample_profile, Rig, SimOrchestrator},
    types::{BusError, LinkError},
};

type Events = Rc<RefCell<Vec<(bool, u64)>>>;

fn record_connection(rig: &Rig, orchestrator: &mut SimOrchestrator) -> Events {
    let events: Events = Rc::default();
    let sink = events.clone();
    let clock = rig.clone();
    orchestrator.on_connection_change(move |up| sink.borrow_mut().push((up, clock.now_ms())));
    events
}

fn flags(events: &Events) -> Vec<bool> {
    events.borrow().iter().map(|(up, _)| *up).collect()
}

fn run_for(rig: &Rig, orchestrator: &mut SimOrchestrator, ms: u64) {
    let end = rig.now_ms() + ms;
    while rig.now_ms() < end {
        let wait = orchestrator.tick();
        rig.state.borrow_mut().now_ms += wait.as_millis();
    }
}

fn booted() -> (Rig, SimOrchestrator, Events) {
    let rig = Rig::new();
    rig.state.borrow_mut().stored = Some(sample_profile());
    let mut orchestrator = rig.orchestrator();
    let events = record_connection(&rig, &mut orchestrator);
    assert_eq!(orchestrator.begin(portal_identity()), BeginOutcome::Ready);
    (rig, orchestrator, events)
}

#[test]
fn first_boot_provisions_then_becomes_ready_once() {
    let rig = Rig::new();
    rig.confirm_at(50, sample_profile());
    let mut orchestrator = rig.orchestrator();
    let events = record_connection(&rig, &mut orchestrator);

    assert_eq!(orchestrator.begin(portal_identity()), BeginOutcome::Ready);
    assert!(orchestrator.is_ready());
    assert_eq!(orchestrator.mode(), Mode::Steady);
    assert!(!orchestrator.is_provisioning_active());
    assert_eq!(flags(&events), vec![true]);
    assert_eq!(orchestrator.client_id(), "dev-1");
    assert_eq!(orchestrator.public_id(), "pub-1");

    {
        let state = rig.state.borrow();
        assert_eq!(state.portal_activations, 1);
        assert_eq!(state.portal_deactivations, 1);
        assert!(state.stored.as_ref().is_some_and(|profile| profile.confirmed));
        assert_eq!(state.bus_connects, vec![50]);
        assert_eq!(state.bus_endpoint.map(|endpoint| endpoint.buffer_size), Some(1024));
        assert_eq!(state.published[0].topic, "pub-1/devices/sync");
        // The notification follows the settle window and the sync marker.
        assert!(events.borrow()[0].1 >= 550);
    }

    run_for(&rig, &mut orchestrator, 5_000);
    assert_eq!(flags(&events), vec![true]);
}

#[test]
fn stored_profile_skips_provisioning() {
    let (rig, orchestrator, _) = booted();
    assert!(orchestrator.is_ready());
    let state = rig.state.borrow();
    assert_eq!(state.portal_activations, 0);
    assert_eq!(state.save_calls, 0);
}

#[test]
fn four_bus_failures_at_startup_reprovision() {
    let rig = Rig::new();
    {
        let mut state = rig.state.borrow_mut();
        state.stored = Some(sample_profile());
        state.bus_script.extend([Err(BusError::Refused); 4]);
    }
    rig.confirm_at(0, sample_profile());
    let mut orchestrator = rig.orchestrator();
    let events = record_connection(&rig, &mut orchestrator);

    assert_eq!(orchestrator.begin(portal_identity()), BeginOutcome::Ready);
    assert_eq!(orchestrator.consecutive_bus_failures(), 0);
    assert_eq!(flags(&events), vec![true]);

    let state = rig.state.borrow();
    assert_eq!(state.bus_connects, vec![0, 2_000, 4_000, 6_000, 6_000]);
    assert_eq!(state.clear_calls, 1);
    assert_eq!(state.portal_activations, 1);
    assert_eq!(state.save_calls, 1);
    assert_eq!(orchestrator.stats().reprovisions, 1);
    assert_eq!(orchestrator.stats().bus_connect_failures, 4);
}

#[test]
fn three_bus_failures_only_back_off() {
    let rig = Rig::new();
    {
        let mut state = rig.state.borrow_mut();
        state.stored = Some(sample_profile());
        state.bus_script.extend([Err(BusError::Unreachable); 3]);
    }
    let mut orchestrator = rig.orchestrator();

    assert_eq!(orchestrator.begin(portal_identity()), BeginOutcome::Ready);
    let state = rig.state.borrow();
    assert_eq!(state.bus_connects, vec![0, 2_000, 4_000, 6_000]);
    assert_eq!(state.clear_calls, 0);
    assert_eq!(state.portal_activations, 0);
}

#[test]
fn drop_while_settling_earns_one_reconnect() {
    let rig = Rig::new();
    {
        let mut state = rig.state.borrow_mut();
        state.stored = Some(sample_profile());
        state.bus_drops_ms.push_back(200);
    }
    let mut orchestrator = rig.orchestrator();
    let events = record_connection(&rig, &mut orchestrator);

    assert_eq!(orchestrator.begin(portal_identity()), BeginOutcome::Ready);
    assert_eq!(rig.state.borrow().bus_connects, vec![0, 200]);
    assert_eq!(flags(&events), vec![true]);
    assert!(events.borrow()[0].1 >= 700);
    assert_eq!(orchestrator.stats().gate_rejections, 1);
}

#[test]
fn failed_settle_reconnect_restarts() {
    let rig = Rig::new();
    {
        let mut state = rig.state.borrow_mut();
        state.stored = Some(sample_profile());
        state.bus_drops_ms.push_back(200);
        state.bus_script.extend([Ok(()), Err(BusError::Unreachable)]);
    }
    let mut orchestrator = rig.orchestrator();
    let events = record_connection(&rig, &mut orchestrator);

    assert_eq!(
        orchestrator.begin(portal_identity()),
        BeginOutcome::Restarting(RestartReason::SessionUnstable)
    );
    let state = rig.state.borrow();
    assert_eq!(state.bus_connects.len(), 2);
    assert_eq!(state.restarts, vec![RestartReason::SessionUnstable]);
    assert!(flags(&events).is_empty());
}

#[test]
fn second_link_failure_restarts() {
    let rig = Rig::new();
    {
        let mut state = rig.state.borrow_mut();
        state.stored = Some(sample_profile());
        state
            .link_script
            .extend([Err(LinkError::Timeout), Err(LinkError::AuthRejected)]);
    }
    rig.confirm_at(0, sample_profile());
    let mut orchestrator = rig.orchestrator();

    assert_eq!(
        orchestrator.begin(portal_identity()),
        BeginOutcome::Restarting(RestartReason::LinkLostAfterReprovision)
    );
    let state = rig.state.borrow();
    assert_eq!(state.link_connects.len(), 2);
    assert_eq!(state.clear_calls, 1);
    assert_eq!(state.portal_activations, 1);
    assert!(state.bus_connects.is_empty());
    assert_eq!(state.restarts, vec![RestartReason::LinkLostAfterReprovision]);
}

#[test]
fn link_recovers_with_fresh_credentials() {
    let rig = Rig::new();
    {
        let mut state = rig.state.borrow_mut();
        state.stored = Some(sample_profile());
        state.link_script.push_back(Err(LinkError::NotFound));
    }
    rig.confirm_at(0, sample_profile());
    let mut orchestrator = rig.orchestrator();

    assert_eq!(orchestrator.begin(portal_identity()), BeginOutcome::Ready);
    let state = rig.state.borrow();
    assert_eq!(state.link_connects, vec![0, 15_000]);
    assert!(state.restarts.is_empty());
}

#[test]
fn portal_reset_restarts_with_cleared_store() {
    let rig = Rig::new();
    rig.state
        .borrow_mut()
        .portal_events
        .push_back((30, ProvisioningEvent::ResetRequested));
    let mut orchestrator = rig.orchestrator();

    assert_eq!(
        orchestrator.begin(portal_identity()),
        BeginOutcome::Restarting(RestartReason::PortalReset)
    );
    let state = rig.state.borrow();
    assert_eq!(state.clear_calls, 1);
    assert!(state.link_connects.is_empty());
}

#[test]
fn failed_save_continues_with_working_profile() {
    let rig = Rig::new();
    rig.state.borrow_mut().save_fails = true;
    rig.confirm_at(0, sample_profile());
    let mut orchestrator = rig.orchestrator();

    assert_eq!(orchestrator.begin(portal_identity()), BeginOutcome::Ready);
    assert_eq!(orchestrator.client_id(), "dev-1");
    assert!(rig.state.borrow().stored.is_none());
}

#[test]
fn publish_and_subscribe_refuse_when_not_ready() {
    let rig = Rig::new();
    rig.state.borrow_mut().bus_up = true;
    let mut orchestrator = rig.orchestrator();

    assert_eq!(orchestrator.publish("t", b"x", false), Err(SessionError::NotReady));
    assert_eq!(orchestrator.subscribe("t"), Err(SessionError::NotReady));

    let (rig, mut orchestrator, _) = booted();
    let sent = rig.state.borrow().published.len();
    rig.state.borrow_mut().bus_up = false;
    assert_eq!(orchestrator.publish("t", b"x", false), Err(SessionError::NotReady));
    assert_eq!(orchestrator.subscribe("t"), Err(SessionError::NotReady));
    let state = rig.state.borrow();
    assert_eq!(state.published.len(), sent);
    assert!(state.subscribed.is_empty());
}

#[test]
fn ready_publish_waits_for_dwell_since_connect() {
    let (rig, mut orchestrator, _) = booted();
    assert_eq!(orchestrator.publish("dev/telemetry", b"42", false), Ok(()));
    assert_eq!(orchestrator.subscribe("dev/cmd"), Ok(()));

    let state = rig.state.borrow();
    let telemetry = state
        .published
        .iter()
        .find(|message| message.topic == "dev/telemetry")
        .expect("telemetry published");
    assert!(telemetry.at_ms >= 800);
    assert_eq!(state.subscribed[0].0, "dev/cmd");
}

#[test]
fn session_stability_tracks_notify_dwell() {
    let (rig, orchestrator, _) = booted();
    // Session came up at 0 and begin returned after the settle and sync rounds.
    assert!(rig.now_ms() < 800);
    assert!(!orchestrator.is_session_stable());
    rig.state.borrow_mut().now_ms = 800;
    assert!(orchestrator.is_session_stable());
}

#[test]
fn bus_drop_notifies_false_before_reconnect_then_true_once() {
    let (rig, mut orchestrator, events) = booted();
    let drop_at = rig.now_ms() + 100;
    rig.drop_bus_at(drop_at);

    run_for(&rig, &mut orchestrator, 5_000);

    assert_eq!(flags(&events), vec![true, false, true]);
    let recorded = events.borrow();
    let reconnect_at = rig.state.borrow().bus_connects[1];
    assert!(recorded[1].1 <= reconnect_at);
    assert!(recorded[2].1 >= reconnect_at + 800);
    assert!(orchestrator.is_ready());
}

#[test]
fn reconnect_that_drops_inside_dwell_stays_silent() {
    let (rig, mut orchestrator, events) = booted();
    let start = rig.now_ms();
    rig.drop_bus_at(start + 100);
    // The immediate reconnect comes up at start + 100 and drops before 800 ms pass.
    rig.drop_bus_at(start + 500);

    run_for(&rig, &mut orchestrator, 8_000);

    assert_eq!(flags(&events), vec![true, false, true]);
    assert_eq!(orchestrator.stats().gate_rejections, 1);
    assert!(orchestrator.is_ready());
    let connects = rig.state.borrow().bus_connects.clone();
    assert_eq!(connects.len(), 3);
    assert!(connects[2] - connects[1] >= 5_000);
    assert!(events.borrow()[2].1 >= connects[2] + 800);
}

#[test]
fn steady_success_resets_consecutive_failures() {
    let (rig, mut orchestrator, events) = booted();
    rig.state.borrow_mut().bus_script.extend([
        Err(BusError::Refused),
        Err(BusError::Refused),
        Err(BusError::Refused),
        Ok(()),
    ]);
    rig.drop_bus_at(rig.now_ms() + 100);

    run_for(&rig, &mut orchestrator, 1_000);
    assert_eq!(orchestrator.consecutive_bus_failures(), 1);
    run_for(&rig, &mut orchestrator, 5_000);
    assert_eq!(orchestrator.consecutive_bus_failures(), 2);
    run_for(&rig, &mut orchestrator, 5_000);
    assert_eq!(orchestrator.consecutive_bus_failures(), 3);
    assert_eq!(orchestrator.mode(), Mode::Steady);

    run_for(&rig, &mut orchestrator, 5_000);
    assert_eq!(orchestrator.consecutive_bus_failures(), 0);
    assert_eq!(flags(&events), vec![true, false, true]);

    rig.state
        .borrow_mut()
        .bus_script
        .push_back(Err(BusError::Unreachable));
    rig.drop_bus_at(rig.now_ms() + 100);
    run_for(&rig, &mut orchestrator, 5_000);

    assert_eq!(orchestrator.consecutive_bus_failures(), 1);
    assert_eq!(orchestrator.mode(), Mode::Steady);
    assert_eq!(rig.state.borrow().clear_calls, 0);
    assert_eq!(flags(&events), vec![true, false, true, false]);
}

#[test]
fn steady_bus_retries_are_spaced_and_escalate() {
    let (rig, mut orchestrator, events) = booted();
    {
        let mut state = rig.state.borrow_mut();
        state.bus_default = Err(BusError::NotAuthorized);
        let drop_at = state.now_ms + 100;
        state.bus_drops_ms.push_back(drop_at);
    }

    run_for(&rig, &mut orchestrator, 20_000);

    assert_eq!(flags(&events), vec![true, false]);
    assert_eq!(orchestrator.mode(), Mode::Provisioning);
    assert!(orchestrator.is_provisioning_active());
    {
        let state = rig.state.borrow();
        let retries = &state.bus_connects[1..];
        assert_eq!(retries.len(), 4);
        assert!(retries.windows(2).all(|pair| pair[1] - pair[0] >= 5_000));
        assert!(state.stored.is_none());
        assert_eq!(state.clear_calls, 1);
    }
    assert_eq!(orchestrator.tick(), Duration::from_millis(10));

    // A fresh confirmation brings the device back through the full sequence.
    rig.state.borrow_mut().bus_default = Ok(());
    rig.confirm_at(rig.now_ms(), sample_profile());
    run_for(&rig, &mut orchestrator, 2_000);

    assert_eq!(orchestrator.mode(), Mode::Steady);
    assert_eq!(orchestrator.consecutive_bus_failures(), 0);
    assert_eq!(flags(&events), vec![true, false, true]);
}

#[test]
fn link_drop_kicks_reconnect_at_most_every_retry_interval() {
    let (rig, mut orchestrator, events) = booted();
    {
        let mut state = rig.state.borrow_mut();
        state.link_restore_on_reconnect = false;
        state.link_drop_at_ms = Some(state.now_ms + 100);
    }

    run_for(&rig, &mut orchestrator, 10_000);

    let state = rig.state.borrow();
    assert_eq!(state.link_reconnects.len(), 4);
    assert!(state
        .link_reconnects
        .windows(2)
        .all(|pair| pair[1] - pair[0] >= 3_000));
    assert_eq!(state.bus_connects.len(), 1);
    assert_eq!(flags(&events), vec![true, false]);
}

#[test]
fn link_recovery_regates_before_notifying() {
    let (rig, mut orchestrator, events) = booted();
    let drop_at = rig.now_ms() + 100;
    rig.state.borrow_mut().link_drop_at_ms = Some(drop_at);

    run_for(&rig, &mut orchestrator, 3_000);

    assert_eq!(rig.state.borrow().link_reconnects.len(), 1);
    assert_eq!(flags(&events), vec![true, false, true]);
    assert!(orchestrator.stats().link_reconnect_kicks >= 1);
}

#[test]
fn reset_config_from_steady() {
    let (rig, mut orchestrator, events) = booted();
    orchestrator.reset_config();

    assert_eq!(orchestrator.mode(), Mode::Provisioning);
    assert!(orchestrator.is_provisioning_active());
    assert!(!orchestrator.is_ready());
    assert_eq!(orchestrator.client_id(), "");
    assert_eq!(flags(&events), vec![true, false]);
    let state = rig.state.borrow();
    assert!(state.stored.is_none());
    assert_eq!(state.clear_calls, 1);
    assert!(!state.bus_up);
}

#[test]
fn reset_config_before_begin_and_twice() {
    let rig = Rig::new();
    rig.state.borrow_mut().stored = Some(sample_profile());
    let mut orchestrator = rig.orchestrator();
    let events = record_connection(&rig, &mut orchestrator);

    orchestrator.reset_config();
    orchestrator.reset_config();

    assert_eq!(orchestrator.mode(), Mode::Provisioning);
    assert!(orchestrator.is_provisioning_active());
    assert!(flags(&events).is_empty());
    let state = rig.state.borrow();
    assert!(state.stored.is_none());
    assert_eq!(state.clear_calls, 2);
    assert_eq!(state.portal_activations, 1);
}

#[test]
fn last_registered_handlers_win() {
    let (rig, mut orchestrator, first) = booted();
    let second = record_connection(&rig, &mut orchestrator);

    let early: Rc<RefCell<Vec<Vec<u8>>>> = Rc::default();
    let late: Rc<RefCell<Vec<Vec<u8>>>> = Rc::default();
    let sink = early.clone();
    orchestrator.on_message(move |_, payload| sink.borrow_mut().push(payload.to_vec()));
    let sink = late.clone();
    orchestrator.on_message(move |topic, payload| {
        assert_eq!(topic, "dev/cmd");
        sink.borrow_mut().push(payload.to_vec());
    });

    rig.state
        .borrow_mut()
        .inbound
        .push_back(("dev/cmd".into(), b"on".to_vec()));
    orchestrator.tick();

    assert!(early.borrow().is_empty());
    assert_eq!(late.borrow().as_slice(), &[b"on".to_vec()]);

    orchestrator.reset_config();
    assert_eq!(flags(&first), vec![true]);
    assert_eq!(flags(&second), vec![false]);
}

#[test]
fn poll_hint_follows_mode() {
    let (rig, mut orchestrator, _) = booted();
    assert_eq!(orchestrator.tick(), Duration::from_millis(100));
    orchestrator.reset_config();
    assert_eq!(orchestrator.tick(), Duration::from_millis(10));
    assert_eq!(rig.state.borrow().restarts.len(), 0);
}
