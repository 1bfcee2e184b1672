use embassy_time::Duration;
use log::{info, warn};

use crate::{
    ports::{BusClient, Clock, CredentialStore, DeviceControl, LinkManager, ProvisioningSurface},
    telemetry::bump,
    types::{Mode, RestartReason},
};

use super::{startup::PortalStep, state::FailureVerdict, Orchestrator};

impl<S, L, B, P, D, C> Orchestrator<S, L, B, P, D, C>
where
    S: CredentialStore,
    L: LinkManager,
    B: BusClient,
    P: ProvisioningSurface,
    D: DeviceControl,
    C: Clock,
{
    /// Runs one scheduling step and returns how long the caller should wait
    /// before the next one.
    pub fn tick(&mut self) -> Duration {
        if !self.initialized {
            warn!("iot: tick before begin");
            return self.policy.provisioning_poll();
        }

        match self.mode() {
            Mode::Provisioning => {
                if let PortalStep::Reset = self.step_provisioning() {
                    self.request_restart(RestartReason::PortalReset);
                }
            }
            Mode::Connecting => {
                if let Err(reason) = self.establish() {
                    self.request_restart(reason);
                }
            }
            Mode::Steady => self.supervise(),
        }

        if self.state.portal_active {
            self.policy.provisioning_poll()
        } else {
            self.policy.steady_poll()
        }
    }

    fn supervise(&mut self) {
        let now = self.clock.now();

        if !self.link.is_connected() {
            self.mark_offline();
            if self.state.link_retry.try_acquire(now) {
                bump(&mut self.state.stats.link_reconnect_kicks);
                info!("net: link down, reconnecting");
                self.link.reconnect();
            }
            return;
        }

        if self.bus.is_connected() {
            // Reconnected by the client itself; the window starts now.
            if !self.state.gate.is_tracking() {
                self.state.gate.mark_connected(now);
            }
            self.bus.service(&mut self.on_message);
            self.state.bus_failures.reset();
            if !self.state.was_connected {
                self.confirm_reconnect();
            }
            return;
        }

        self.mark_offline();
        if !self.state.bus_retry.try_acquire(now) {
            return;
        }

        match self.try_bus_connect() {
            Ok(()) => {
                self.state.bus_failures.reset();
                self.confirm_reconnect();
            }
            Err(err) => match self.state.bus_failures.record_failure() {
                FailureVerdict::Retry { attempt } => {
                    warn!(
                        "bus: reconnect failed attempt={}/{} err={}",
                        attempt,
                        self.state.bus_failures.threshold(),
                        err.as_str()
                    );
                }
                FailureVerdict::Escalate => {
                    warn!(
                        "bus: reconnect failed {} times err={}, back to provisioning",
                        self.state.bus_failures.threshold(),
                        err.as_str()
                    );
                    self.fall_back_to_provisioning();
                }
            },
        }
    }

    /// Notifies `true` only once the session outlives the notification dwell.
    fn confirm_reconnect(&mut self) {
        let dwell = Duration::from_millis(u64::from(self.policy.notify_dwell_ms));
        let stable = self.state.gate.wait_until_stable(
            &mut self.bus,
            &mut self.clock,
            &mut self.on_message,
            dwell,
            self.policy.gate_step(),
        );
        if !stable {
            bump(&mut self.state.stats.gate_rejections);
            info!("bus: reconnected session dropped before it settled");
            return;
        }
        self.state.was_connected = true;
        self.notify(true);
    }

    fn mark_offline(&mut self) {
        self.state.gate.mark_disconnected();
        if self.state.was_connected {
            self.state.was_connected = false;
            self.notify(false);
        }
    }
}
