//! The connection orchestrator: startup sequencing, steady-state supervision
//! and the application-facing operations on top of them.

mod engine;
mod handlers;
mod machine;
mod startup;
mod state;
mod supervise;
#[cfg(test)]
mod tests;

use alloc::boxed::Box;

use embassy_time::Duration;
use log::info;

use crate::{
    config::{BusEndpoint, ConnectionPolicy, PortalIdentity},
    ports::{BusClient, Clock, CredentialStore, DeviceControl, LinkManager, ProvisioningSurface},
    session::SessionCtx,
    telemetry::ConnectionStats,
    types::{ConnectionProfile, Mode, RestartReason, SessionError},
};

use handlers::{ConnectionSlot, MessageSlot};
use state::OrchestratorState;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BeginOutcome {
    Ready,
    /// The device was asked to restart. Only observable where
    /// [`DeviceControl::restart`] returns.
    Restarting(RestartReason),
}

/// Owns the working profile, the transient connection state and every
/// collaborator. Constructed once; driven by [`Orchestrator::begin`] and then
/// [`Orchestrator::tick`] from a single cooperative caller.
pub struct Orchestrator<S, L, B, P, D, C> {
    store: S,
    link: L,
    bus: B,
    portal: P,
    device: D,
    clock: C,
    endpoint: BusEndpoint,
    policy: ConnectionPolicy,
    identity: PortalIdentity,
    profile: ConnectionProfile,
    state: OrchestratorState,
    on_connection: ConnectionSlot,
    on_message: MessageSlot,
    initialized: bool,
}

impl<S, L, B, P, D, C> Orchestrator<S, L, B, P, D, C>
where
    S: CredentialStore,
    L: LinkManager,
    B: BusClient,
    P: ProvisioningSurface,
    D: DeviceControl,
    C: Clock,
{
    pub fn new(store: S, link: L, bus: B, portal: P, device: D, clock: C, endpoint: BusEndpoint) -> Self {
        let policy = ConnectionPolicy::defaults();
        Self {
            store,
            link,
            bus,
            portal,
            device,
            clock,
            endpoint,
            policy,
            identity: PortalIdentity::default(),
            profile: ConnectionProfile::empty(),
            state: OrchestratorState::new(&policy),
            on_connection: ConnectionSlot::default(),
            on_message: MessageSlot::default(),
            initialized: false,
        }
    }

    /// Replaces the timing policy. Only meaningful before [`Orchestrator::begin`].
    pub fn with_policy(mut self, policy: ConnectionPolicy) -> Self {
        let policy = policy.sanitized();
        self.policy = policy;
        self.state = OrchestratorState::new(&policy);
        self
    }

    pub fn policy(&self) -> &ConnectionPolicy {
        &self.policy
    }

    pub fn mode(&self) -> Mode {
        self.state.engine.mode()
    }

    pub fn stats(&self) -> ConnectionStats {
        self.state.stats
    }

    pub fn consecutive_bus_failures(&self) -> u8 {
        self.state.bus_failures.count()
    }

    /// True when steady state is active and both link and bus report connected.
    pub fn is_ready(&self) -> bool {
        self.mode() == Mode::Steady && self.link.is_connected() && self.bus.is_connected()
    }

    pub fn is_provisioning_active(&self) -> bool {
        self.state.portal_active
    }

    /// Whether the current session has outlived the notification dwell.
    pub fn is_session_stable(&self) -> bool {
        self.state.gate.is_stable(
            self.clock.now(),
            self.bus.is_connected(),
            Duration::from_millis(u64::from(self.policy.notify_dwell_ms)),
        )
    }

    pub fn client_id(&self) -> &str {
        self.profile.bus_client_id.as_str()
    }

    pub fn public_id(&self) -> &str {
        self.profile.bus_public_id.as_str()
    }

    pub fn publish(&mut self, topic: &str, payload: &[u8], retained: bool) -> Result<(), SessionError> {
        if !self.is_ready() {
            return Err(SessionError::NotReady);
        }
        let result = self.session().publish(topic, payload, retained);
        self.note_gate_result(result)
    }

    pub fn subscribe(&mut self, topic: &str) -> Result<(), SessionError> {
        if !self.is_ready() {
            return Err(SessionError::NotReady);
        }
        let result = self.session().subscribe(topic);
        self.note_gate_result(result)
    }

    pub fn on_connection_change<F>(&mut self, handler: F)
    where
        F: FnMut(bool) + 'static,
    {
        self.on_connection.set(Box::new(handler));
    }

    pub fn on_message<F>(&mut self, handler: F)
    where
        F: FnMut(&str, &[u8]) + 'static,
    {
        self.on_message.set(Box::new(handler));
    }

    /// Wipes stored credentials, leaves steady state and opens provisioning.
    pub fn reset_config(&mut self) {
        info!("iot: reset config");
        self.fall_back_to_provisioning();
    }

    fn session(&mut self) -> SessionCtx<'_, B, C> {
        SessionCtx {
            bus: &mut self.bus,
            clock: &mut self.clock,
            gate: &mut self.state.gate,
            inbox: &mut self.on_message,
            policy: &self.policy,
        }
    }

    fn note_gate_result(&mut self, result: Result<(), SessionError>) -> Result<(), SessionError> {
        if matches!(
            result,
            Err(SessionError::Unstable
                | SessionError::DroppedDuringPrepare
                | SessionError::DroppedAwaitingAck)
        ) {
            crate::telemetry::bump(&mut self.state.stats.gate_rejections);
        }
        result
    }

    fn notify(&mut self, connected: bool) {
        info!("iot: connection changed connected={}", connected);
        self.state.stats.record_notification(connected);
        self.on_connection.notify(connected);
    }

    /// Clears the stored and working profile, drops any bus session, tells
    /// the application it is offline and opens provisioning.
    fn fall_back_to_provisioning(&mut self) {
        self.discard_profile();
        if self.state.was_connected {
            self.state.was_connected = false;
            self.notify(false);
        }
        self.state.bus_failures.reset();
        self.enter_provisioning();
    }
}
