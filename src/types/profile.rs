use heapless::String;

use super::ProfileError;

/// Usable bytes per profile field; the persisted slot is 64 bytes with a
/// terminating length byte in front.
pub const PROFILE_FIELD_MAX: usize = 63;

pub type ProfileField = String<PROFILE_FIELD_MAX>;

/// Everything needed to reach the network and authenticate on the bus.
///
/// The orchestrator holds one working copy and commits or clears it as a
/// whole; fields are never persisted individually.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionProfile {
    pub network_id: ProfileField,
    pub network_secret: ProfileField,
    pub bus_client_id: ProfileField,
    pub bus_auth_token: ProfileField,
    pub bus_public_id: ProfileField,
    pub confirmed: bool,
}

impl ConnectionProfile {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a confirmed profile, rejecting empty or oversized fields.
    pub fn confirmed(
        network_id: &str,
        network_secret: &str,
        bus_client_id: &str,
        bus_auth_token: &str,
        bus_public_id: &str,
    ) -> Result<Self, ProfileError> {
        let mut profile = Self {
            network_id: field(network_id)?,
            network_secret: field(network_secret)?,
            bus_client_id: field(bus_client_id)?,
            bus_auth_token: field(bus_auth_token)?,
            bus_public_id: field(bus_public_id)?,
            confirmed: false,
        };
        profile.confirm()?;
        Ok(profile)
    }

    pub fn is_complete(&self) -> bool {
        !self.network_id.is_empty()
            && !self.network_secret.is_empty()
            && !self.bus_client_id.is_empty()
            && !self.bus_auth_token.is_empty()
            && !self.bus_public_id.is_empty()
    }

    pub fn link_ready(&self) -> bool {
        !self.network_id.is_empty()
    }

    pub fn bus_ready(&self) -> bool {
        !self.bus_client_id.is_empty() && !self.bus_auth_token.is_empty()
    }

    pub fn confirm(&mut self) -> Result<(), ProfileError> {
        if !self.is_complete() {
            return Err(ProfileError::Incomplete);
        }
        self.confirmed = true;
        Ok(())
    }

    pub fn clear(&mut self) {
        *self = Self::empty();
    }
}

pub(crate) fn field(value: &str) -> Result<ProfileField, ProfileError> {
    let mut out = ProfileField::new();
    out.push_str(value).map_err(|_| ProfileError::FieldTooLong)?;
    Ok(out)
}
