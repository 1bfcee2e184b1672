use embassy_time::Duration;

// Station join budget for a single blocking connect during startup.
pub const LINK_CONNECT_TIMEOUT_DEFAULT_MS: u32 = 15_000;
// Minimum spacing between link reconnect kicks in steady state.
pub const LINK_RETRY_DEFAULT_MS: u32 = 3_000;
// Minimum spacing between bus reconnect attempts in steady state.
pub const BUS_RETRY_DEFAULT_MS: u32 = 5_000;
// Fixed back-off between bus connect attempts during startup.
pub const BUS_BACKOFF_DEFAULT_MS: u32 = 2_000;
// Consecutive bus connect failures before credentials are discarded.
pub const BUS_FAILURE_THRESHOLD_DEFAULT: u8 = 4;
// Link attempts per startup before the device restarts (first try + one after reprovisioning).
pub const LINK_ATTEMPTS_DEFAULT: u8 = 2;

// Brokers were observed to silently drop publishes issued within ~800ms of CONNACK.
pub const PUBLISH_DWELL_DEFAULT_MS: u32 = 800;
// SUBSCRIBE tolerates a shorter margin than PUBLISH.
pub const SUBSCRIBE_DWELL_DEFAULT_MS: u32 = 600;
// Dwell a reconnected session must survive before the application hears about it.
pub const NOTIFY_DWELL_DEFAULT_MS: u32 = 800;
// Startup settle: 10 service rounds of 50ms right after the session is up.
pub const SETTLE_DEFAULT_MS: u32 = 500;
pub const SETTLE_STEP_DEFAULT_MS: u32 = 50;
pub const GATE_STEP_DEFAULT_MS: u32 = 10;

pub const PROVISIONING_POLL_DEFAULT_MS: u32 = 10;
pub const STEADY_POLL_DEFAULT_MS: u32 = 100;

pub const BUS_PORT_DEFAULT: u16 = 1883;
pub const BUS_BUFFER_DEFAULT: usize = 1024;
// Long keep-alive for slow uplinks.
pub const BUS_KEEP_ALIVE_DEFAULT_S: u16 = 60;

pub const PORTAL_AP_NAME_DEFAULT: &str = "IoT-Setup";
pub const PORTAL_APP_NAME_DEFAULT: &str = "IoT Connect";

/// Tuned timing and retry constants for the orchestrator.
///
/// The defaults encode field-tuned behaviour; [`ConnectionPolicy::sanitized`]
/// clamps overrides into ranges where the sequencing still makes sense.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionPolicy {
    pub link_connect_timeout_ms: u32,
    pub link_retry_ms: u32,
    pub link_attempts: u8,
    pub bus_retry_ms: u32,
    pub bus_backoff_ms: u32,
    pub bus_failure_threshold: u8,
    pub publish_dwell_ms: u32,
    pub subscribe_dwell_ms: u32,
    pub notify_dwell_ms: u32,
    pub settle_ms: u32,
    pub settle_step_ms: u32,
    pub gate_step_ms: u32,
    pub provisioning_poll_ms: u32,
    pub steady_poll_ms: u32,
}

impl ConnectionPolicy {
    pub const fn defaults() -> Self {
        Self {
            link_connect_timeout_ms: LINK_CONNECT_TIMEOUT_DEFAULT_MS,
            link_retry_ms: LINK_RETRY_DEFAULT_MS,
            link_attempts: LINK_ATTEMPTS_DEFAULT,
            bus_retry_ms: BUS_RETRY_DEFAULT_MS,
            bus_backoff_ms: BUS_BACKOFF_DEFAULT_MS,
            bus_failure_threshold: BUS_FAILURE_THRESHOLD_DEFAULT,
            publish_dwell_ms: PUBLISH_DWELL_DEFAULT_MS,
            subscribe_dwell_ms: SUBSCRIBE_DWELL_DEFAULT_MS,
            notify_dwell_ms: NOTIFY_DWELL_DEFAULT_MS,
            settle_ms: SETTLE_DEFAULT_MS,
            settle_step_ms: SETTLE_STEP_DEFAULT_MS,
            gate_step_ms: GATE_STEP_DEFAULT_MS,
            provisioning_poll_ms: PROVISIONING_POLL_DEFAULT_MS,
            steady_poll_ms: STEADY_POLL_DEFAULT_MS,
        }
    }

    pub const fn sanitized(self) -> Self {
        let link_connect_timeout_ms = clamp_u32(self.link_connect_timeout_ms, 1_000, 120_000);
        let link_retry_ms = clamp_u32(self.link_retry_ms, 100, 60_000);
        let link_attempts = clamp_u8(self.link_attempts, 1, 8);
        let bus_retry_ms = clamp_u32(self.bus_retry_ms, 100, 120_000);
        let bus_backoff_ms = clamp_u32(self.bus_backoff_ms, 0, 60_000);
        let bus_failure_threshold = clamp_u8(self.bus_failure_threshold, 1, 32);
        let publish_dwell_ms = clamp_u32(self.publish_dwell_ms, 0, 10_000);
        let subscribe_dwell_ms = clamp_u32(self.subscribe_dwell_ms, 0, 10_000);
        let notify_dwell_ms = clamp_u32(self.notify_dwell_ms, 0, 10_000);
        let settle_ms = clamp_u32(self.settle_ms, 0, 10_000);
        let settle_step_ms = clamp_u32(self.settle_step_ms, 1, 1_000);
        let gate_step_ms = clamp_u32(self.gate_step_ms, 1, 1_000);
        let provisioning_poll_ms = clamp_u32(self.provisioning_poll_ms, 1, 1_000);
        let steady_poll_ms = clamp_u32(self.steady_poll_ms, 1, 10_000);
        Self {
            link_connect_timeout_ms,
            link_retry_ms,
            link_attempts,
            bus_retry_ms,
            bus_backoff_ms,
            bus_failure_threshold,
            publish_dwell_ms,
            subscribe_dwell_ms,
            notify_dwell_ms,
            settle_ms,
            settle_step_ms,
            gate_step_ms,
            provisioning_poll_ms,
            steady_poll_ms,
        }
    }

    pub(crate) fn link_connect_timeout(&self) -> Duration {
        ms(self.link_connect_timeout_ms)
    }

    pub(crate) fn link_retry(&self) -> Duration {
        ms(self.link_retry_ms)
    }

    pub(crate) fn bus_retry(&self) -> Duration {
        ms(self.bus_retry_ms)
    }

    pub(crate) fn bus_backoff(&self) -> Duration {
        ms(self.bus_backoff_ms)
    }

    pub(crate) fn gate_step(&self) -> Duration {
        ms(self.gate_step_ms)
    }

    pub(crate) fn settle_step(&self) -> Duration {
        ms(self.settle_step_ms)
    }

    pub(crate) fn provisioning_poll(&self) -> Duration {
        ms(self.provisioning_poll_ms)
    }

    pub(crate) fn steady_poll(&self) -> Duration {
        ms(self.steady_poll_ms)
    }
}

impl Default for ConnectionPolicy {
    fn default() -> Self {
        Self::defaults()
    }
}

/// Where the bus client connects and how its session is sized.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BusEndpoint {
    pub host: &'static str,
    pub port: u16,
    pub buffer_size: usize,
    pub keep_alive_s: u16,
}

impl BusEndpoint {
    pub const fn new(host: &'static str, port: u16) -> Self {
        Self {
            host,
            port,
            buffer_size: BUS_BUFFER_DEFAULT,
            keep_alive_s: BUS_KEEP_ALIVE_DEFAULT_S,
        }
    }

    /// Endpoint baked in at build time from `IOTLINK_BUS_HOST` / `IOTLINK_BUS_PORT`.
    pub fn from_build_env() -> Option<Self> {
        let host = option_env!("IOTLINK_BUS_HOST")?;
        let port = option_env!("IOTLINK_BUS_PORT")
            .and_then(|raw| raw.parse::<u16>().ok())
            .unwrap_or(BUS_PORT_DEFAULT);
        Some(Self::new(host, port))
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(u64::from(self.keep_alive_s))
    }
}

/// Names shown by the provisioning surface: the access point name and the
/// application name rendered in the configuration page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortalIdentity {
    pub ap_name: &'static str,
    pub app_name: &'static str,
}

impl PortalIdentity {
    pub const fn new(ap_name: &'static str, app_name: &'static str) -> Self {
        Self { ap_name, app_name }
    }
}

impl Default for PortalIdentity {
    fn default() -> Self {
        Self::new(PORTAL_AP_NAME_DEFAULT, PORTAL_APP_NAME_DEFAULT)
    }
}

const fn ms(value: u32) -> Duration {
    Duration::from_millis(value as u64)
}

const fn clamp_u32(value: u32, min: u32, max: u32) -> u32 {
    if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    }
}

const fn clamp_u8(value: u8, min: u8, max: u8) -> u8 {
    if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    }
}
