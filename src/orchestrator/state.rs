use embassy_time::{Duration, Instant};

use crate::{
    config::ConnectionPolicy,
    session::{elapsed_since, StabilityGate},
    telemetry::ConnectionStats,
};

use super::engine::ModeEngine;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FailureVerdict {
    Retry { attempt: u8 },
    Escalate,
}

/// Consecutive failure count against a fixed escalation threshold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FailureCounter {
    count: u8,
    threshold: u8,
}

impl FailureCounter {
    pub(crate) const fn new(threshold: u8) -> Self {
        Self {
            count: 0,
            threshold,
        }
    }

    pub(crate) fn count(&self) -> u8 {
        self.count
    }

    pub(crate) fn threshold(&self) -> u8 {
        self.threshold
    }

    pub(crate) fn reset(&mut self) {
        self.count = 0;
    }

    pub(crate) fn record_failure(&mut self) -> FailureVerdict {
        self.count = self.count.saturating_add(1);
        if self.count >= self.threshold {
            FailureVerdict::Escalate
        } else {
            FailureVerdict::Retry {
                attempt: self.count,
            }
        }
    }
}

/// Lets an attempt through at most once per `interval`. The first attempt
/// after construction or [`RetryLimiter::reset`] goes through immediately.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct RetryLimiter {
    interval: Duration,
    last: Option<Instant>,
}

impl RetryLimiter {
    pub(crate) const fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.last = None;
    }

    pub(crate) fn try_acquire(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last {
            if elapsed_since(now, last) < self.interval {
                return false;
            }
        }
        self.last = Some(now);
        true
    }
}

pub(crate) struct OrchestratorState {
    pub(crate) engine: ModeEngine,
    pub(crate) bus_failures: FailureCounter,
    pub(crate) link_retry: RetryLimiter,
    pub(crate) bus_retry: RetryLimiter,
    pub(crate) was_connected: bool,
    pub(crate) portal_active: bool,
    pub(crate) gate: StabilityGate,
    pub(crate) stats: ConnectionStats,
}

impl OrchestratorState {
    pub(crate) fn new(policy: &ConnectionPolicy) -> Self {
        Self {
            engine: ModeEngine::new(),
            bus_failures: FailureCounter::new(policy.bus_failure_threshold),
            link_retry: RetryLimiter::new(policy.link_retry()),
            bus_retry: RetryLimiter::new(policy.bus_retry()),
            was_connected: false,
            portal_active: false,
            gate: StabilityGate::new(),
            stats: ConnectionStats::default(),
        }
    }
}
