//! Simulated collaborators sharing one clock and one scripted world.

use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use embassy_time::{Duration, Instant};
use embedded_storage::{ReadStorage, Storage};

use crate::{
    config::{BusEndpoint, PortalIdentity},
    orchestrator::Orchestrator,
    ports::{BusClient, Clock, CredentialStore, DeviceControl, LinkManager, MessageSink, ProvisioningSurface},
    provisioning::ProvisioningEvent,
    types::{BusError, ConnectionProfile, LinkError, RestartReason, StoreError},
};

// Any scenario still running after ten simulated minutes is stuck.
const HORIZON_MS: u64 = 600_000;

#[derive(Clone, Debug)]
pub(crate) struct Published {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retained: bool,
    pub at_ms: u64,
}

pub(crate) struct SimState {
    pub now_ms: u64,

    pub link_up: bool,
    pub link_script: VecDeque<Result<(), LinkError>>,
    pub link_connects: Vec<u64>,
    pub link_reconnects: Vec<u64>,
    pub link_drop_at_ms: Option<u64>,
    pub link_restore_on_reconnect: bool,

    pub bus_up: bool,
    pub bus_script: VecDeque<Result<(), BusError>>,
    pub bus_default: Result<(), BusError>,
    pub bus_connects: Vec<u64>,
    pub bus_drops_ms: VecDeque<u64>,
    pub bus_service_calls: u32,
    pub bus_endpoint: Option<BusEndpoint>,
    pub bus_disconnects: u32,
    pub published: Vec<Published>,
    pub subscribed: Vec<(String, u64)>,
    pub inbound: VecDeque<(String, Vec<u8>)>,

    pub portal_active: bool,
    pub portal_activations: u32,
    pub portal_deactivations: u32,
    pub portal_events: VecDeque<(u64, ProvisioningEvent)>,

    pub stored: Option<ConnectionProfile>,
    pub save_calls: u32,
    pub clear_calls: u32,
    pub save_fails: bool,

    pub restarts: Vec<RestartReason>,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            now_ms: 0,
            link_up: false,
            link_script: VecDeque::new(),
            link_connects: Vec::new(),
            link_reconnects: Vec::new(),
            link_drop_at_ms: None,
            link_restore_on_reconnect: true,
            bus_up: false,
            bus_script: VecDeque::new(),
            bus_default: Ok(()),
            bus_connects: Vec::new(),
            bus_drops_ms: VecDeque::new(),
            bus_service_calls: 0,
            bus_endpoint: None,
            bus_disconnects: 0,
            published: Vec::new(),
            subscribed: Vec::new(),
            inbound: VecDeque::new(),
            portal_active: false,
            portal_activations: 0,
            portal_deactivations: 0,
            portal_events: VecDeque::new(),
            stored: None,
            save_calls: 0,
            clear_calls: 0,
            save_fails: false,
            restarts: Vec::new(),
        }
    }
}

impl SimState {
    fn poll_drops(&mut self) {
        if let Some(at) = self.link_drop_at_ms {
            if self.now_ms >= at {
                self.link_drop_at_ms = None;
                self.link_up = false;
                self.bus_up = false;
            }
        }
        while self.bus_drops_ms.front().is_some_and(|&at| self.now_ms >= at) {
            self.bus_drops_ms.pop_front();
            self.bus_up = false;
        }
    }
}

#[derive(Clone, Default)]
pub(crate) struct Rig {
    pub state: Rc<RefCell<SimState>>,
}

pub(crate) type SimOrchestrator =
    Orchestrator<SimStore, SimLink, SimBus, SimPortal, SimDevice, SimClock>;

impl Rig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now_ms(&self) -> u64 {
        self.state.borrow().now_ms
    }

    pub fn orchestrator(&self) -> SimOrchestrator {
        Orchestrator::new(
            SimStore::new(self),
            SimLink::new(self),
            SimBus::new(self),
            SimPortal::new(self),
            SimDevice::new(self),
            SimClock::new(self),
            BusEndpoint::new("broker.test", 1883),
        )
    }

    /// Schedules a bus session drop at `at_ms`. Drops fire in queue order.
    pub fn drop_bus_at(&self, at_ms: u64) {
        self.state.borrow_mut().bus_drops_ms.push_back(at_ms);
    }

    /// Queues a portal submission that becomes visible at `at_ms`.
    pub fn confirm_at(&self, at_ms: u64, profile: ConnectionProfile) {
        self.state
            .borrow_mut()
            .portal_events
            .push_back((at_ms, ProvisioningEvent::Confirmed(profile)));
    }
}

pub(crate) fn sample_profile() -> ConnectionProfile {
    ConnectionProfile::confirmed("home", "secret", "dev-1", "tok-1", "pub-1")
        .expect("sample profile fits")
}

pub(crate) fn portal_identity() -> PortalIdentity {
    PortalIdentity::new("Test-Setup", "Test App")
}

pub(crate) struct SimClock {
    rig: Rig,
}

impl SimClock {
    pub fn new(rig: &Rig) -> Self {
        Self { rig: rig.clone() }
    }
}

impl Clock for SimClock {
    fn now(&self) -> Instant {
        Instant::from_millis(self.rig.now_ms())
    }

    fn delay(&mut self, duration: Duration) {
        let mut state = self.rig.state.borrow_mut();
        state.now_ms += duration.as_millis();
        assert!(
            state.now_ms <= HORIZON_MS,
            "simulated clock ran past {} ms",
            HORIZON_MS
        );
    }
}

pub(crate) struct SimLink {
    rig: Rig,
}

impl SimLink {
    pub fn new(rig: &Rig) -> Self {
        Self { rig: rig.clone() }
    }
}

impl LinkManager for SimLink {
    fn connect(&mut self, _profile: &ConnectionProfile, timeout: Duration) -> Result<(), LinkError> {
        let mut state = self.rig.state.borrow_mut();
        let now = state.now_ms;
        state.link_connects.push(now);
        let result = state.link_script.pop_front().unwrap_or(Ok(()));
        match result {
            Ok(()) => state.link_up = true,
            Err(_) => {
                state.link_up = false;
                state.now_ms += timeout.as_millis();
            }
        }
        result
    }

    fn reconnect(&mut self) {
        let mut state = self.rig.state.borrow_mut();
        let now = state.now_ms;
        state.link_reconnects.push(now);
        if state.link_restore_on_reconnect {
            state.link_up = true;
        }
    }

    fn is_connected(&self) -> bool {
        let mut state = self.rig.state.borrow_mut();
        state.poll_drops();
        state.link_up
    }
}

pub(crate) struct SimBus {
    rig: Rig,
}

impl SimBus {
    pub fn new(rig: &Rig) -> Self {
        Self { rig: rig.clone() }
    }
}

impl BusClient for SimBus {
    fn configure(&mut self, endpoint: &BusEndpoint) {
        self.rig.state.borrow_mut().bus_endpoint = Some(*endpoint);
    }

    fn connect(&mut self, _profile: &ConnectionProfile) -> Result<(), BusError> {
        let mut state = self.rig.state.borrow_mut();
        let now = state.now_ms;
        state.bus_connects.push(now);
        let result = match state.bus_script.pop_front() {
            Some(result) => result,
            None => state.bus_default,
        };
        state.bus_up = result.is_ok();
        result
    }

    fn service(&mut self, inbox: &mut dyn MessageSink) {
        let pending: Vec<(String, Vec<u8>)> = {
            let mut state = self.rig.state.borrow_mut();
            state.bus_service_calls += 1;
            state.poll_drops();
            if state.bus_up {
                state.inbound.drain(..).collect()
            } else {
                Vec::new()
            }
        };
        for (topic, payload) in pending {
            inbox.deliver(&topic, &payload);
        }
    }

    fn is_connected(&self) -> bool {
        let mut state = self.rig.state.borrow_mut();
        state.poll_drops();
        state.bus_up
    }

    fn publish(&mut self, topic: &str, payload: &[u8], retained: bool) -> Result<(), BusError> {
        let mut state = self.rig.state.borrow_mut();
        if !state.bus_up {
            return Err(BusError::Transport);
        }
        let at_ms = state.now_ms;
        state.published.push(Published {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            retained,
            at_ms,
        });
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), BusError> {
        let mut state = self.rig.state.borrow_mut();
        if !state.bus_up {
            return Err(BusError::Transport);
        }
        let at_ms = state.now_ms;
        state.subscribed.push((topic.to_string(), at_ms));
        Ok(())
    }

    fn disconnect(&mut self) {
        let mut state = self.rig.state.borrow_mut();
        state.bus_up = false;
        state.bus_disconnects += 1;
    }
}

pub(crate) struct SimPortal {
    rig: Rig,
}

impl SimPortal {
    pub fn new(rig: &Rig) -> Self {
        Self { rig: rig.clone() }
    }
}

impl ProvisioningSurface for SimPortal {
    fn activate(&mut self, _identity: &PortalIdentity) {
        let mut state = self.rig.state.borrow_mut();
        state.portal_active = true;
        state.portal_activations += 1;
    }

    fn deactivate(&mut self) {
        let mut state = self.rig.state.borrow_mut();
        state.portal_active = false;
        state.portal_deactivations += 1;
    }

    fn service_step(&mut self) -> ProvisioningEvent {
        let mut state = self.rig.state.borrow_mut();
        let due = matches!(state.portal_events.front(), Some((at, _)) if *at <= state.now_ms);
        if !state.portal_active || !due {
            return ProvisioningEvent::Idle;
        }
        match state.portal_events.pop_front() {
            Some((_, event)) => event,
            None => ProvisioningEvent::Idle,
        }
    }
}

pub(crate) struct SimStore {
    rig: Rig,
}

impl SimStore {
    pub fn new(rig: &Rig) -> Self {
        Self { rig: rig.clone() }
    }
}

impl CredentialStore for SimStore {
    fn load(&mut self) -> Result<ConnectionProfile, StoreError> {
        self.rig.state.borrow().stored.clone().ok_or(StoreError::Empty)
    }

    fn save(&mut self, profile: &ConnectionProfile) -> Result<(), StoreError> {
        let mut state = self.rig.state.borrow_mut();
        state.save_calls += 1;
        if state.save_fails {
            return Err(StoreError::Io);
        }
        state.stored = Some(profile.clone());
        Ok(())
    }

    fn clear(&mut self) {
        let mut state = self.rig.state.borrow_mut();
        state.clear_calls += 1;
        state.stored = None;
    }
}

pub(crate) struct SimDevice {
    rig: Rig,
}

impl SimDevice {
    pub fn new(rig: &Rig) -> Self {
        Self { rig: rig.clone() }
    }
}

impl DeviceControl for SimDevice {
    fn restart(&mut self, reason: RestartReason) {
        self.rig.state.borrow_mut().restarts.push(reason);
    }
}

/// Byte-addressed NOR flash in RAM, erased to `0xFF`.
pub(crate) struct RamFlash {
    bytes: Vec<u8>,
    pub fail_reads: bool,
}

impl RamFlash {
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![0xFF; size],
            fail_reads: false,
        }
    }
}

#[derive(Debug)]
pub(crate) struct RamFlashError;

impl ReadStorage for RamFlash {
    type Error = RamFlashError;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        if self.fail_reads {
            return Err(RamFlashError);
        }
        let start = offset as usize;
        let end = start + bytes.len();
        let source = self.bytes.get(start..end).ok_or(RamFlashError)?;
        bytes.copy_from_slice(source);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.bytes.len()
    }
}

impl Storage for RamFlash {
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        let start = offset as usize;
        let end = start + bytes.len();
        let target = self.bytes.get_mut(start..end).ok_or(RamFlashError)?;
        target.copy_from_slice(bytes);
        Ok(())
    }
}
