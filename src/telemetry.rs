/// Process-lifetime connection counters. Owned by the orchestrator and
/// discarded on restart together with the rest of its state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub link_connect_attempts: u32,
    pub link_connect_failures: u32,
    pub link_reconnect_kicks: u32,
    pub bus_connect_attempts: u32,
    pub bus_connect_failures: u32,
    pub gate_rejections: u32,
    pub reprovisions: u32,
    pub notifications_up: u32,
    pub notifications_down: u32,
    pub restarts_requested: u32,
}

impl ConnectionStats {
    pub(crate) fn record_notification(&mut self, connected: bool) {
        if connected {
            self.notifications_up = self.notifications_up.saturating_add(1);
        } else {
            self.notifications_down = self.notifications_down.saturating_add(1);
        }
    }
}

pub(crate) fn bump(counter: &mut u32) {
    *counter = counter.saturating_add(1);
}
