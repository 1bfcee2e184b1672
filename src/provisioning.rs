//! Credential intake shared by provisioning surfaces.
//!
//! A surface (captive portal, serial console, BLE) collects key/value pairs
//! from a human and feeds them into a [`ProvisioningDraft`]; once the draft
//! confirms, the surface reports [`ProvisioningEvent::Confirmed`] and the
//! orchestrator commits the profile.

use log::{info, warn};

use crate::types::{profile::field, ConnectionProfile, ProfileError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProvisioningEvent {
    Idle,
    Confirmed(ConnectionProfile),
    /// The human asked to wipe the device from the surface.
    ResetRequested,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormField {
    NetworkId,
    NetworkSecret,
    BusClientId,
    BusAuthToken,
    BusPublicId,
}

impl FormField {
    /// Accepts the form names and the camel-case spellings used by
    /// QR-code prefill links.
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "ssid" => Some(Self::NetworkId),
            "pass" => Some(Self::NetworkSecret),
            "clientid" | "clientId" => Some(Self::BusClientId),
            "token" => Some(Self::BusAuthToken),
            "publicid" | "publicId" => Some(Self::BusPublicId),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NetworkId => "ssid",
            Self::NetworkSecret => "pass",
            Self::BusClientId => "clientid",
            Self::BusAuthToken => "token",
            Self::BusPublicId => "publicid",
        }
    }

    const fn is_secret(self) -> bool {
        matches!(self, Self::NetworkSecret | Self::BusAuthToken)
    }
}

/// Profile under construction on a provisioning surface. Never persisted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProvisioningDraft {
    profile: ConnectionProfile,
}

impl ProvisioningDraft {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from previously stored values so the surface can show them.
    pub fn from_profile(profile: &ConnectionProfile) -> Self {
        let mut profile = profile.clone();
        profile.confirmed = false;
        Self { profile }
    }

    pub fn profile(&self) -> &ConnectionProfile {
        &self.profile
    }

    pub fn set(&mut self, which: FormField, value: &str) -> Result<(), ProfileError> {
        let value = field(value)?;
        if which.is_secret() {
            info!("portal: field {} set len={}", which.as_str(), value.len());
        } else {
            info!("portal: field {} set value={}", which.as_str(), value);
        }
        let slot = match which {
            FormField::NetworkId => &mut self.profile.network_id,
            FormField::NetworkSecret => &mut self.profile.network_secret,
            FormField::BusClientId => &mut self.profile.bus_client_id,
            FormField::BusAuthToken => &mut self.profile.bus_auth_token,
            FormField::BusPublicId => &mut self.profile.bus_public_id,
        };
        *slot = value;
        Ok(())
    }

    /// Applies one submitted pair. Unknown keys are ignored.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<(), ProfileError> {
        match FormField::from_key(key) {
            Some(which) => self.set(which, value),
            None => Ok(()),
        }
    }

    /// Applies prefill pairs, only for slots that are still empty.
    pub fn prefill(&mut self, key: &str, value: &str) -> Result<bool, ProfileError> {
        let Some(which) = FormField::from_key(key) else {
            return Ok(false);
        };
        let current = match which {
            FormField::NetworkId => &self.profile.network_id,
            FormField::NetworkSecret => &self.profile.network_secret,
            FormField::BusClientId => &self.profile.bus_client_id,
            FormField::BusAuthToken => &self.profile.bus_auth_token,
            FormField::BusPublicId => &self.profile.bus_public_id,
        };
        if !current.is_empty() || value.is_empty() {
            return Ok(false);
        }
        self.set(which, value)?;
        Ok(true)
    }

    pub fn confirm(self) -> Result<ConnectionProfile, ProfileError> {
        let mut profile = self.profile;
        if let Err(err) = profile.confirm() {
            warn!("portal: confirm rejected err={}", err.as_str());
            return Err(err);
        }
        Ok(profile)
    }
}
