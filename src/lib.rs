//! Connection orchestration for a provisioned, bus-connected device.
//!
//! The [`Orchestrator`] owns the device's working [`ConnectionProfile`] and
//! drives four collaborators (credential store, link manager, bus client,
//! provisioning surface) from first boot to a stable bus session, then keeps
//! it there from a cooperative [`Orchestrator::tick`].

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod orchestrator;
#[cfg(feature = "esp32")]
pub mod platform;
pub mod ports;
pub mod provisioning;
pub mod session;
pub mod storage;
pub mod telemetry;
#[cfg(test)]
pub(crate) mod testing;
pub mod types;

pub use config::{BusEndpoint, ConnectionPolicy, PortalIdentity};
pub use orchestrator::{BeginOutcome, Orchestrator};
pub use ports::{
    BusClient, Clock, CredentialStore, DeviceControl, LinkManager, MessageSink, ProvisioningSurface,
};
pub use provisioning::{ProvisioningDraft, ProvisioningEvent};
pub use session::StabilityGate;
pub use storage::FlashProfileStore;
pub use telemetry::ConnectionStats;
pub use types::{
    BusError, ConnectionProfile, LinkError, Mode, ProfileError, RestartReason, SessionError,
    StoreError,
};
