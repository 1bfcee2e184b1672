//! Bus-session stability gating and the gated operations built on it.

mod gate;
mod ops;

pub use gate::StabilityGate;
pub(crate) use gate::elapsed_since;
pub(crate) use ops::SessionCtx;
pub use ops::{sync_topic, SYNC_PAYLOAD, SYNC_TOPIC_SUFFIX};
