use std::{cell::RefCell, collections::VecDeque, process, rc::Rc};

use embassy_time::{Duration, Instant};
use iotlink::{
    BusClient, BusEndpoint, BusError, Clock, ConnectionProfile, CredentialStore, DeviceControl,
    LinkError, LinkManager, MessageSink, PortalIdentity, ProvisioningDraft, ProvisioningEvent,
    ProvisioningSurface, RestartReason, StoreError,
};

use crate::trace::{FormSubmission, TraceAction, TraceEvent};

/// The simulated surroundings of one device: radio, broker, flash and a
/// human at the portal, advanced by the trace as simulated time passes.
pub struct World {
    now_ms: u64,
    horizon_ms: u64,
    pending: VecDeque<TraceEvent>,
    link_up: bool,
    link_failures: u32,
    bus_up: bool,
    bus_failures: u32,
    portal_active: bool,
    portal_queue: VecDeque<ProvisioningEvent>,
    stored: Option<ConnectionProfile>,
    inbound: VecDeque<(String, Vec<u8>)>,
    app_actions: VecDeque<TraceAction>,
    restart: Option<RestartReason>,
}

pub type SharedWorld = Rc<RefCell<World>>;

impl World {
    pub fn shared(
        events: Vec<TraceEvent>,
        stored: Option<ConnectionProfile>,
        horizon_ms: u64,
    ) -> SharedWorld {
        Rc::new(RefCell::new(Self {
            now_ms: 0,
            horizon_ms,
            pending: events.into(),
            link_up: false,
            link_failures: 0,
            bus_up: false,
            bus_failures: 0,
            portal_active: false,
            portal_queue: VecDeque::new(),
            stored,
            inbound: VecDeque::new(),
            app_actions: VecDeque::new(),
            restart: None,
        }))
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    /// Time passing between ticks of the driver loop.
    pub fn idle(&mut self, duration: Duration) {
        self.now_ms += duration.as_millis();
        self.advance();
    }

    /// Time passing inside the orchestrator. Startup can block on the portal
    /// forever, so this is where a trace that never confirms ends.
    fn sleep(&mut self, duration: Duration) {
        self.now_ms += duration.as_millis();
        if self.now_ms > self.horizon_ms {
            println!(
                "[{:>7} ms] trace horizon reached while blocked inside startup",
                self.now_ms
            );
            process::exit(0);
        }
        self.advance();
    }

    pub fn take_app_actions(&mut self) -> Vec<TraceAction> {
        self.advance();
        self.app_actions.drain(..).collect()
    }

    pub fn take_restart(&mut self) -> Option<RestartReason> {
        self.restart.take()
    }

    /// Power cycle: connections and the portal go away, flash survives.
    pub fn reboot(&mut self) {
        self.link_up = false;
        self.bus_up = false;
        self.portal_active = false;
        self.inbound.clear();
        self.restart = None;
    }

    fn advance(&mut self) {
        while self
            .pending
            .front()
            .is_some_and(|event| event.at_ms <= self.now_ms)
        {
            if let Some(event) = self.pending.pop_front() {
                self.apply(event.action);
            }
        }
    }

    fn apply(&mut self, action: TraceAction) {
        match action {
            TraceAction::LinkDown => {
                self.link_up = false;
                self.bus_up = false;
            }
            TraceAction::LinkUp => self.link_up = true,
            TraceAction::LinkFail(count) => self.link_failures += count,
            TraceAction::BusDown => self.bus_up = false,
            TraceAction::BusUp => self.bus_up = self.link_up,
            TraceAction::BusFail(count) => self.bus_failures += count,
            TraceAction::Confirm(form) => match submit(&form) {
                Some(profile) => self
                    .portal_queue
                    .push_back(ProvisioningEvent::Confirmed(profile)),
                None => println!("[{:>7} ms] portal form rejected", self.now_ms),
            },
            TraceAction::PortalReset => self.portal_queue.push_back(ProvisioningEvent::ResetRequested),
            TraceAction::Message { topic, payload } => {
                self.inbound.push_back((topic, payload.into_bytes()))
            }
            action @ (TraceAction::ResetConfig | TraceAction::Publish { .. }) => {
                self.app_actions.push_back(action)
            }
        }
    }
}

fn submit(form: &FormSubmission) -> Option<ConnectionProfile> {
    let mut draft = ProvisioningDraft::new();
    for (key, value) in &form.fields {
        draft.apply(key, value).ok()?;
    }
    draft.confirm().ok()
}

pub fn sample_profile() -> Option<ConnectionProfile> {
    ConnectionProfile::confirmed("sim-net", "sim-secret", "sim-device", "sim-token", "sim-public")
        .ok()
}

pub struct SimStore(pub SharedWorld);

impl CredentialStore for SimStore {
    fn load(&mut self) -> Result<ConnectionProfile, StoreError> {
        self.0.borrow().stored.clone().ok_or(StoreError::Empty)
    }

    fn save(&mut self, profile: &ConnectionProfile) -> Result<(), StoreError> {
        self.0.borrow_mut().stored = Some(profile.clone());
        Ok(())
    }

    fn clear(&mut self) {
        self.0.borrow_mut().stored = None;
    }
}

pub struct SimLink(pub SharedWorld);

impl LinkManager for SimLink {
    fn connect(&mut self, _profile: &ConnectionProfile, timeout: Duration) -> Result<(), LinkError> {
        let mut world = self.0.borrow_mut();
        world.advance();
        if world.link_failures > 0 {
            world.link_failures -= 1;
            world.sleep(timeout);
            return Err(LinkError::Timeout);
        }
        world.link_up = true;
        Ok(())
    }

    fn reconnect(&mut self) {
        let mut world = self.0.borrow_mut();
        if world.link_failures > 0 {
            world.link_failures -= 1;
        } else {
            world.link_up = true;
        }
    }

    fn is_connected(&self) -> bool {
        let mut world = self.0.borrow_mut();
        world.advance();
        world.link_up
    }
}

pub struct SimBus(pub SharedWorld);

impl BusClient for SimBus {
    fn configure(&mut self, endpoint: &BusEndpoint) {
        let now = self.0.borrow().now_ms;
        println!(
            "[{:>7} ms] bus endpoint {}:{}",
            now, endpoint.host, endpoint.port
        );
    }

    fn connect(&mut self, _profile: &ConnectionProfile) -> Result<(), BusError> {
        let mut world = self.0.borrow_mut();
        world.advance();
        if !world.link_up {
            return Err(BusError::Unreachable);
        }
        if world.bus_failures > 0 {
            world.bus_failures -= 1;
            world.bus_up = false;
            return Err(BusError::Refused);
        }
        world.bus_up = true;
        Ok(())
    }

    fn service(&mut self, inbox: &mut dyn MessageSink) {
        let delivered: Vec<(String, Vec<u8>)> = {
            let mut world = self.0.borrow_mut();
            world.advance();
            if world.bus_up {
                world.inbound.drain(..).collect()
            } else {
                Vec::new()
            }
        };
        for (topic, payload) in delivered {
            inbox.deliver(&topic, &payload);
        }
    }

    fn is_connected(&self) -> bool {
        let mut world = self.0.borrow_mut();
        world.advance();
        world.bus_up
    }

    fn publish(&mut self, topic: &str, payload: &[u8], retained: bool) -> Result<(), BusError> {
        let world = self.0.borrow();
        if !world.bus_up {
            return Err(BusError::Transport);
        }
        println!(
            "[{:>7} ms] bus tx topic={} len={} retained={}",
            world.now_ms,
            topic,
            payload.len(),
            retained
        );
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), BusError> {
        let world = self.0.borrow();
        if !world.bus_up {
            return Err(BusError::Transport);
        }
        println!("[{:>7} ms] bus subscribe topic={}", world.now_ms, topic);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.0.borrow_mut().bus_up = false;
    }
}

pub struct SimPortal(pub SharedWorld);

impl ProvisioningSurface for SimPortal {
    fn activate(&mut self, identity: &PortalIdentity) {
        let mut world = self.0.borrow_mut();
        world.portal_active = true;
        println!(
            "[{:>7} ms] portal up ap={} app={}",
            world.now_ms, identity.ap_name, identity.app_name
        );
    }

    fn deactivate(&mut self) {
        let mut world = self.0.borrow_mut();
        world.portal_active = false;
        println!("[{:>7} ms] portal down", world.now_ms);
    }

    fn service_step(&mut self) -> ProvisioningEvent {
        let mut world = self.0.borrow_mut();
        world.advance();
        if !world.portal_active {
            return ProvisioningEvent::Idle;
        }
        world
            .portal_queue
            .pop_front()
            .unwrap_or(ProvisioningEvent::Idle)
    }
}

pub struct SimDevice(pub SharedWorld);

impl DeviceControl for SimDevice {
    fn restart(&mut self, reason: RestartReason) {
        self.0.borrow_mut().restart = Some(reason);
    }
}

pub struct SimClock(pub SharedWorld);

impl Clock for SimClock {
    fn now(&self) -> Instant {
        Instant::from_millis(self.0.borrow().now_ms)
    }

    fn delay(&mut self, duration: Duration) {
        self.0.borrow_mut().sleep(duration);
    }
}
