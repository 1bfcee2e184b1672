use embassy_time::{Duration, Instant};
use log::debug;

use crate::ports::{BusClient, Clock, MessageSink};

/// Minimum-dwell check for a freshly (re-)established bus session.
///
/// A session counts as stable only while it is connected and `dwell` has
/// passed since the connect was observed, with no disconnect observed since.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StabilityGate {
    stable_since: Option<Instant>,
}

impl StabilityGate {
    pub const fn new() -> Self {
        Self { stable_since: None }
    }

    pub fn mark_connected(&mut self, now: Instant) {
        self.stable_since = Some(now);
    }

    pub fn mark_disconnected(&mut self) {
        self.stable_since = None;
    }

    pub fn is_tracking(&self) -> bool {
        self.stable_since.is_some()
    }

    pub fn is_stable(&self, now: Instant, connected: bool, dwell: Duration) -> bool {
        if !connected {
            return false;
        }
        match self.stable_since {
            Some(since) => elapsed_since(now, since) >= dwell,
            None => false,
        }
    }

    /// Services the bus in `step` increments until `dwell` has passed since
    /// the session came up. Returns false as soon as a disconnect is seen.
    pub fn wait_until_stable<B, C>(
        &mut self,
        bus: &mut B,
        clock: &mut C,
        inbox: &mut dyn MessageSink,
        dwell: Duration,
        step: Duration,
    ) -> bool
    where
        B: BusClient + ?Sized,
        C: Clock + ?Sized,
    {
        if !bus.is_connected() {
            self.mark_disconnected();
            return false;
        }
        let Some(since) = self.stable_since else {
            return false;
        };
        loop {
            if !bus.is_connected() {
                debug!("bus: session dropped during dwell");
                self.mark_disconnected();
                return false;
            }
            if elapsed_since(clock.now(), since) >= dwell {
                return true;
            }
            bus.service(inbox);
            clock.delay(step);
        }
    }
}

pub(crate) fn elapsed_since(now: Instant, since: Instant) -> Duration {
    now.checked_duration_since(since)
        .unwrap_or(Duration::from_ticks(0))
}
