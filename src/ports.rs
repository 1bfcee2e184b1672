//! Collaborators the orchestrator drives. Implementations live with the board
//! support code; the orchestrator only sees these seams.

use embassy_time::{Duration, Instant};

use crate::{
    config::{BusEndpoint, PortalIdentity},
    provisioning::ProvisioningEvent,
    types::{BusError, ConnectionProfile, LinkError, RestartReason, StoreError},
};

pub trait CredentialStore {
    fn load(&mut self) -> Result<ConnectionProfile, StoreError>;
    fn save(&mut self, profile: &ConnectionProfile) -> Result<(), StoreError>;
    fn clear(&mut self);
}

pub trait LinkManager {
    /// Blocks until the link is up or `timeout` elapses.
    fn connect(&mut self, profile: &ConnectionProfile, timeout: Duration) -> Result<(), LinkError>;
    /// Kicks a reconnect with the last applied configuration. Must not block.
    fn reconnect(&mut self);
    fn is_connected(&self) -> bool;
}

pub trait BusClient {
    fn configure(&mut self, endpoint: &BusEndpoint);
    fn connect(&mut self, profile: &ConnectionProfile) -> Result<(), BusError>;
    /// Processes pending I/O once and hands inbound messages to `inbox`.
    fn service(&mut self, inbox: &mut dyn MessageSink);
    fn is_connected(&self) -> bool;
    fn publish(&mut self, topic: &str, payload: &[u8], retained: bool) -> Result<(), BusError>;
    fn subscribe(&mut self, topic: &str) -> Result<(), BusError>;
    fn disconnect(&mut self);
}

/// Receives inbound bus messages while the client is serviced.
pub trait MessageSink {
    fn deliver(&mut self, topic: &str, payload: &[u8]);
}

impl<F> MessageSink for F
where
    F: FnMut(&str, &[u8]),
{
    fn deliver(&mut self, topic: &str, payload: &[u8]) {
        self(topic, payload)
    }
}

pub trait ProvisioningSurface {
    fn activate(&mut self, identity: &PortalIdentity);
    fn deactivate(&mut self);
    /// Serves at most one pending request. Must not block.
    fn service_step(&mut self) -> ProvisioningEvent;
}

pub trait DeviceControl {
    /// Reboots the device. Hardware implementations do not return.
    fn restart(&mut self, reason: RestartReason);
}

pub trait Clock {
    fn now(&self) -> Instant;
    /// Busy-waits the calling thread.
    fn delay(&mut self, duration: Duration);
}
