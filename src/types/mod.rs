mod errors;
mod mode;
pub(crate) mod profile;

pub use errors::{BusError, LinkError, ProfileError, RestartReason, SessionError, StoreError};
pub use mode::Mode;
pub use profile::{ConnectionProfile, ProfileField, PROFILE_FIELD_MAX};
