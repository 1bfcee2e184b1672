use core::fmt::Write as _;

use embassy_time::Duration;
use heapless::String;
use log::{info, warn};

use crate::{
    config::ConnectionPolicy,
    ports::{BusClient, Clock, MessageSink},
    types::SessionError,
};

use super::StabilityGate;

// Service rounds around an application publish: before (drain pending) and after (PUBACK).
const PUBLISH_PREPARE_ROUNDS: u8 = 3;
const PUBLISH_ACK_ROUNDS: u8 = 3;
const PUBLISH_ROUND_MS: u64 = 10;
const SUBSCRIBE_PREPARE_MS: u64 = 20;
// Short SUBACK window; long timeouts here stall the caller's loop.
const SUBSCRIBE_ACK_ROUNDS: u8 = 10;
const SUBSCRIBE_ROUND_MS: u64 = 15;
const SYNC_PREPARE_ROUNDS: u8 = 5;
const SYNC_ROUND_MS: u64 = 20;

pub const SYNC_TOPIC_SUFFIX: &str = "/devices/sync";
pub const SYNC_PAYLOAD: &[u8] = b"ok";
pub const SYNC_TOPIC_MAX: usize = 128;

/// Everything a gated bus operation needs, borrowed from the orchestrator.
pub(crate) struct SessionCtx<'a, B: ?Sized, C: ?Sized> {
    pub(crate) bus: &'a mut B,
    pub(crate) clock: &'a mut C,
    pub(crate) gate: &'a mut StabilityGate,
    pub(crate) inbox: &'a mut dyn MessageSink,
    pub(crate) policy: &'a ConnectionPolicy,
}

impl<B, C> SessionCtx<'_, B, C>
where
    B: BusClient + ?Sized,
    C: Clock + ?Sized,
{
    fn service_rounds(&mut self, rounds: u8, round: Duration) {
        for _ in 0..rounds {
            self.bus.service(self.inbox);
            self.clock.delay(round);
        }
    }

    fn await_dwell(&mut self, dwell_ms: u32) -> bool {
        // A session the client re-established on its own starts its window now.
        if !self.gate.is_tracking() && self.bus.is_connected() {
            self.gate.mark_connected(self.clock.now());
        }
        self.gate.wait_until_stable(
            self.bus,
            self.clock,
            self.inbox,
            Duration::from_millis(u64::from(dwell_ms)),
            self.policy.gate_step(),
        )
    }

    pub(crate) fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        retained: bool,
    ) -> Result<(), SessionError> {
        if !self.bus.is_connected() {
            warn!("bus: publish skipped topic={} reason=not_connected", topic);
            return Err(SessionError::NotReady);
        }
        if !self.await_dwell(self.policy.publish_dwell_ms) {
            warn!("bus: publish skipped topic={} reason=unstable", topic);
            return Err(SessionError::Unstable);
        }

        self.service_rounds(
            PUBLISH_PREPARE_ROUNDS,
            Duration::from_millis(PUBLISH_ROUND_MS),
        );
        if !self.bus.is_connected() {
            warn!("bus: publish skipped topic={} reason=dropped", topic);
            self.gate.mark_disconnected();
            return Err(SessionError::DroppedDuringPrepare);
        }

        match self.bus.publish(topic, payload, retained) {
            Ok(()) => {
                info!("bus: publish ok topic={} len={}", topic, payload.len());
                self.service_rounds(PUBLISH_ACK_ROUNDS, Duration::from_millis(PUBLISH_ROUND_MS));
                Ok(())
            }
            Err(err) => {
                warn!("bus: publish err={} topic={}", err.as_str(), topic);
                Err(SessionError::Rejected)
            }
        }
    }

    pub(crate) fn subscribe(&mut self, topic: &str) -> Result<(), SessionError> {
        if !self.bus.is_connected() {
            warn!("bus: subscribe skipped topic={} reason=not_connected", topic);
            return Err(SessionError::NotReady);
        }
        if !self.await_dwell(self.policy.subscribe_dwell_ms) {
            warn!("bus: subscribe skipped topic={} reason=unstable", topic);
            return Err(SessionError::Unstable);
        }

        self.bus.service(self.inbox);
        self.clock.delay(Duration::from_millis(SUBSCRIBE_PREPARE_MS));
        if !self.bus.is_connected() {
            self.gate.mark_disconnected();
            return Err(SessionError::DroppedDuringPrepare);
        }

        if let Err(err) = self.bus.subscribe(topic) {
            warn!("bus: subscribe err={} topic={}", err.as_str(), topic);
            return Err(SessionError::Rejected);
        }
        info!("bus: subscribe ok topic={}", topic);

        for _ in 0..SUBSCRIBE_ACK_ROUNDS {
            if !self.bus.is_connected() {
                warn!("bus: subscribe dropped awaiting ack topic={}", topic);
                self.gate.mark_disconnected();
                return Err(SessionError::DroppedAwaitingAck);
            }
            self.bus.service(self.inbox);
            self.clock.delay(Duration::from_millis(SUBSCRIBE_ROUND_MS));
        }
        Ok(())
    }

    /// Announces a fresh session on `{public_id}/devices/sync`.
    pub(crate) fn publish_sync_marker(&mut self, public_id: &str) -> Result<(), SessionError> {
        if !self.bus.is_connected() {
            return Err(SessionError::NotReady);
        }
        let Some(topic) = sync_topic(public_id) else {
            warn!("bus: sync marker skipped reason=no_public_id");
            return Err(SessionError::Rejected);
        };

        self.service_rounds(SYNC_PREPARE_ROUNDS, Duration::from_millis(SYNC_ROUND_MS));
        let result = self.bus.publish(&topic, SYNC_PAYLOAD, false);
        self.bus.service(self.inbox);
        match result {
            Ok(()) => {
                info!("bus: sync marker sent topic={}", topic);
                Ok(())
            }
            Err(err) => {
                warn!("bus: sync marker err={} topic={}", err.as_str(), topic);
                Err(SessionError::Rejected)
            }
        }
    }
}

pub fn sync_topic(public_id: &str) -> Option<String<SYNC_TOPIC_MAX>> {
    if public_id.is_empty() {
        return None;
    }
    let mut topic = String::new();
    write!(topic, "{}{}", public_id, SYNC_TOPIC_SUFFIX).ok()?;
    Some(topic)
}
