use embassy_time::Duration;
use log::{error, info, warn};

use crate::{
    config::PortalIdentity,
    ports::{BusClient, Clock, CredentialStore, DeviceControl, LinkManager, ProvisioningSurface},
    provisioning::ProvisioningEvent,
    telemetry::bump,
    types::{BusError, ConnectionProfile, LinkError, RestartReason, StoreError},
};

use super::{machine::ModeCommand, state::FailureVerdict, BeginOutcome, Orchestrator};

/// What one provisioning service step amounted to.
pub(super) enum PortalStep {
    Waiting,
    Committed,
    Reset,
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
    /// Brings the device from cold boot to a stable bus session.
    ///
    /// Blocks while provisioning waits for a human. Returns only once steady
    /// state is active, or after the device was asked to restart.
    pub fn begin(&mut self, identity: PortalIdentity) -> BeginOutcome {
        self.identity = identity;
        self.initialized = true;
        info!(
            "iot: begin ap={} app={} host={} port={}",
            identity.ap_name, identity.app_name, self.endpoint.host, self.endpoint.port
        );

        self.profile = match self.store.load() {
            Ok(profile) => profile,
            Err(StoreError::Empty) => {
                info!("cfg: no stored profile");
                ConnectionProfile::empty()
            }
            Err(err) => {
                warn!("cfg: stored profile unusable err={}", err.as_str());
                ConnectionProfile::empty()
            }
        };

        if !self.profile.confirmed {
            if let Err(reason) = self.await_provisioning() {
                return self.request_restart(reason);
            }
        }

        match self.establish() {
            Ok(()) => BeginOutcome::Ready,
            Err(reason) => self.request_restart(reason),
        }
    }

    /// Link, bus, settle, announce, then steady state. Every failure either
    /// retries here, re-provisions, or ends in a restart reason.
    pub(super) fn establish(&mut self) -> Result<(), RestartReason> {
        self.acquire_link()?;

        self.bus.configure(&self.endpoint);
        info!(
            "bus: configured host={} port={} buffer={} keep_alive_s={}",
            self.endpoint.host,
            self.endpoint.port,
            self.endpoint.buffer_size,
            self.endpoint.keep_alive_s
        );

        self.connect_bus()?;
        self.settle_session()?;
        self.announce_session();
        self.enter_steady();
        Ok(())
    }

    fn await_provisioning(&mut self) -> Result<(), RestartReason> {
        self.enter_provisioning();
        let poll = self.policy.provisioning_poll();
        loop {
            match self.step_provisioning() {
                PortalStep::Waiting => self.clock.delay(poll),
                PortalStep::Committed => return Ok(()),
                PortalStep::Reset => return Err(RestartReason::PortalReset),
            }
        }
    }

    /// Serves one provisioning request without blocking.
    pub(super) fn step_provisioning(&mut self) -> PortalStep {
        match self.portal.service_step() {
            ProvisioningEvent::Idle => PortalStep::Waiting,
            ProvisioningEvent::Confirmed(profile) => {
                if !self.commit_profile(profile) {
                    return PortalStep::Waiting;
                }
                self.leave_provisioning();
                PortalStep::Committed
            }
            ProvisioningEvent::ResetRequested => {
                warn!("portal: reset requested");
                self.store.clear();
                self.profile.clear();
                PortalStep::Reset
            }
        }
    }

    fn commit_profile(&mut self, mut profile: ConnectionProfile) -> bool {
        if let Err(err) = profile.confirm() {
            warn!("cfg: confirmation rejected err={}", err.as_str());
            return false;
        }
        if let Err(err) = self.store.save(&profile) {
            warn!("cfg: save failed err={}, continuing unsaved", err.as_str());
        }
        info!(
            "cfg: profile confirmed network_id={} client_id={}",
            profile.network_id, profile.bus_client_id
        );
        self.profile = profile;
        true
    }

    pub(super) fn enter_provisioning(&mut self) {
        let now = self.clock.now();
        self.state.engine.apply(ModeCommand::EnterProvisioning, now);
        if !self.state.portal_active {
            self.portal.activate(&self.identity);
            self.state.portal_active = true;
            info!("portal: active ap={}", self.identity.ap_name);
        }
    }

    fn leave_provisioning(&mut self) {
        if self.state.portal_active {
            self.portal.deactivate();
            self.state.portal_active = false;
            info!("portal: closed");
        }
        let now = self.clock.now();
        self.state.engine.apply(ModeCommand::ProfileConfirmed, now);
    }

    fn acquire_link(&mut self) -> Result<(), RestartReason> {
        let attempts = self.policy.link_attempts;
        let mut attempt = 1;
        loop {
            let err = match self.connect_link() {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };
            warn!(
                "net: link connect failed attempt={}/{} err={}",
                attempt,
                attempts,
                err.as_str()
            );
            if attempt >= attempts {
                return Err(if attempt > 1 {
                    RestartReason::LinkLostAfterReprovision
                } else {
                    RestartReason::LinkUnavailable
                });
            }
            self.discard_profile();
            self.await_provisioning()?;
            attempt += 1;
        }
    }

    /// Fresh credentials and a single link attempt with them.
    fn reprovision_link(&mut self) -> Result<(), RestartReason> {
        self.discard_profile();
        self.await_provisioning()?;
        self.connect_link().map_err(|err| {
            warn!("net: link failed after reprovision err={}", err.as_str());
            RestartReason::LinkLostAfterReprovision
        })
    }

    fn connect_link(&mut self) -> Result<(), LinkError> {
        if !self.profile.link_ready() {
            return Err(LinkError::MissingNetworkId);
        }
        bump(&mut self.state.stats.link_connect_attempts);
        info!("net: connecting network_id={}", self.profile.network_id);
        let result = self
            .link
            .connect(&self.profile, self.policy.link_connect_timeout());
        match result {
            Ok(()) => info!("net: link up"),
            Err(_) => bump(&mut self.state.stats.link_connect_failures),
        }
        result
    }

    fn connect_bus(&mut self) -> Result<(), RestartReason> {
        loop {
            let err = match self.try_bus_connect() {
                Ok(()) => {
                    self.state.bus_failures.reset();
                    return Ok(());
                }
                Err(err) => err,
            };
            match self.state.bus_failures.record_failure() {
                FailureVerdict::Retry { attempt } => {
                    warn!(
                        "bus: connect failed attempt={}/{} err={}",
                        attempt,
                        self.state.bus_failures.threshold(),
                        err.as_str()
                    );
                    self.clock.delay(self.policy.bus_backoff());
                }
                FailureVerdict::Escalate => {
                    warn!(
                        "bus: connect failed {} times err={}, reprovisioning",
                        self.state.bus_failures.threshold(),
                        err.as_str()
                    );
                    self.state.bus_failures.reset();
                    self.reprovision_link()?;
                }
            }
        }
    }

    pub(super) fn try_bus_connect(&mut self) -> Result<(), BusError> {
        if !self.profile.bus_ready() {
            return Err(BusError::MissingCredentials);
        }
        bump(&mut self.state.stats.bus_connect_attempts);
        info!("bus: connecting client_id={}", self.profile.bus_client_id);
        match self.bus.connect(&self.profile) {
            Ok(()) => {
                self.state.gate.mark_connected(self.clock.now());
                info!("bus: session up");
                Ok(())
            }
            Err(err) => {
                bump(&mut self.state.stats.bus_connect_failures);
                self.state.gate.mark_disconnected();
                Err(err)
            }
        }
    }

    /// Settles a new session; a drop earns exactly one reconnect.
    fn settle_session(&mut self) -> Result<(), RestartReason> {
        if self.settle() {
            return Ok(());
        }
        bump(&mut self.state.stats.gate_rejections);
        warn!("bus: session dropped while settling, reconnecting once");
        if self.try_bus_connect().is_ok() && self.settle() {
            return Ok(());
        }
        bump(&mut self.state.stats.gate_rejections);
        Err(RestartReason::SessionUnstable)
    }

    fn settle(&mut self) -> bool {
        let dwell = Duration::from_millis(u64::from(self.policy.settle_ms));
        self.state.gate.wait_until_stable(
            &mut self.bus,
            &mut self.clock,
            &mut self.on_message,
            dwell,
            self.policy.settle_step(),
        )
    }

    fn announce_session(&mut self) {
        let public_id = self.profile.bus_public_id.clone();
        if let Err(err) = self.session().publish_sync_marker(&public_id) {
            warn!("bus: sync marker not sent err={}", err.as_str());
        }
    }

    fn enter_steady(&mut self) {
        let now = self.clock.now();
        self.state.engine.apply(ModeCommand::SessionStable, now);
        self.state.was_connected = true;
        self.state.bus_failures.reset();
        self.state.link_retry.reset();
        self.state.bus_retry.reset();
        info!("iot: ready client_id={}", self.profile.bus_client_id);
        self.notify(true);
    }

    pub(super) fn discard_profile(&mut self) {
        warn!("cfg: discarding credentials");
        self.store.clear();
        self.profile.clear();
        self.bus.disconnect();
        self.state.gate.mark_disconnected();
        bump(&mut self.state.stats.reprovisions);
    }

    pub(super) fn request_restart(&mut self, reason: RestartReason) -> BeginOutcome {
        error!("iot: restarting reason={}", reason.as_str());
        bump(&mut self.state.stats.restarts_requested);
        self.device.restart(reason);
        BeginOutcome::Restarting(reason)
    }
}
