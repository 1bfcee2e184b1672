use embedded_storage::Storage;
use log::{info, warn};

use crate::{
    ports::CredentialStore,
    types::{ConnectionProfile, ProfileField, StoreError, PROFILE_FIELD_MAX},
};

pub const PROFILE_STORE_MAGIC: u32 = 0x4C54_4F49;
pub const PROFILE_STORE_VERSION: u8 = 1;

const HEADER_LEN: usize = 6;
const SLOT_LEN: usize = PROFILE_FIELD_MAX + 1;
const SLOT_COUNT: usize = 5;
pub const PROFILE_STORE_RECORD_LEN: usize = HEADER_LEN + SLOT_COUNT * SLOT_LEN + 1;

const FLAG_CONFIRMED: u8 = 1 << 0;

/// Credential store holding one fixed-size profile record at `offset`.
pub struct FlashProfileStore<F> {
    flash: F,
    offset: u32,
}

impl<F> FlashProfileStore<F>
where
    F: Storage,
{
    pub fn new(flash: F, offset: u32) -> Self {
        Self { flash, offset }
    }

    /// Places the record at the start of the last `sector_size` bytes.
    pub fn in_last_sector(flash: F, sector_size: u32) -> Self {
        let capacity = flash.capacity() as u32;
        let offset = capacity.saturating_sub(sector_size);
        Self { flash, offset }
    }

    fn read_record(&mut self) -> Result<[u8; PROFILE_STORE_RECORD_LEN], StoreError> {
        let mut record = [0u8; PROFILE_STORE_RECORD_LEN];
        self.flash
            .read(self.offset, &mut record)
            .map_err(|_| StoreError::Io)?;
        Ok(record)
    }
}

impl<F> CredentialStore for FlashProfileStore<F>
where
    F: Storage,
{
    fn load(&mut self) -> Result<ConnectionProfile, StoreError> {
        let record = self.read_record()?;
        let profile = decode_record(&record)?;
        info!(
            "cfg: loaded network_id={} client_id={} public_id={} confirmed={}",
            profile.network_id, profile.bus_client_id, profile.bus_public_id, profile.confirmed
        );
        Ok(profile)
    }

    fn save(&mut self, profile: &ConnectionProfile) -> Result<(), StoreError> {
        let record = encode_record(profile);
        if let Ok(current) = self.read_record() {
            if current == record {
                return Ok(());
            }
        }
        self.flash.write(self.offset, &record).map_err(|_| {
            warn!("cfg: save failed");
            StoreError::Io
        })?;
        info!("cfg: profile saved confirmed={}", profile.confirmed);
        Ok(())
    }

    fn clear(&mut self) {
        let erased = [0xFFu8; PROFILE_STORE_RECORD_LEN];
        if self.flash.write(self.offset, &erased).is_err() {
            warn!("cfg: clear failed");
            return;
        }
        info!("cfg: profile cleared");
    }
}

pub(crate) fn encode_record(profile: &ConnectionProfile) -> [u8; PROFILE_STORE_RECORD_LEN] {
    let mut record = [0xFFu8; PROFILE_STORE_RECORD_LEN];
    record[0..4].copy_from_slice(&PROFILE_STORE_MAGIC.to_le_bytes());
    record[4] = PROFILE_STORE_VERSION;
    record[5] = if profile.confirmed { FLAG_CONFIRMED } else { 0 };
    for (idx, value) in slots(profile).into_iter().enumerate() {
        let start = HEADER_LEN + idx * SLOT_LEN;
        let bytes = value.as_bytes();
        record[start] = bytes.len() as u8;
        record[start + 1..start + 1 + bytes.len()].copy_from_slice(bytes);
    }
    record[PROFILE_STORE_RECORD_LEN - 1] = checksum8(&record[..PROFILE_STORE_RECORD_LEN - 1]);
    record
}

pub(crate) fn decode_record(
    record: &[u8; PROFILE_STORE_RECORD_LEN],
) -> Result<ConnectionProfile, StoreError> {
    if record.iter().all(|&byte| byte == 0xFF) {
        return Err(StoreError::Empty);
    }
    if u32::from_le_bytes([record[0], record[1], record[2], record[3]]) != PROFILE_STORE_MAGIC {
        return Err(StoreError::Corrupt);
    }
    if record[4] != PROFILE_STORE_VERSION {
        return Err(StoreError::Corrupt);
    }
    let expected = checksum8(&record[..PROFILE_STORE_RECORD_LEN - 1]);
    if record[PROFILE_STORE_RECORD_LEN - 1] != expected {
        return Err(StoreError::Corrupt);
    }

    let mut fields: [ProfileField; SLOT_COUNT] = Default::default();
    for (idx, out) in fields.iter_mut().enumerate() {
        let start = HEADER_LEN + idx * SLOT_LEN;
        let len = record[start] as usize;
        if len > PROFILE_FIELD_MAX {
            return Err(StoreError::Corrupt);
        }
        let text = core::str::from_utf8(&record[start + 1..start + 1 + len])
            .map_err(|_| StoreError::Corrupt)?;
        out.push_str(text).map_err(|_| StoreError::Corrupt)?;
    }

    let [network_id, network_secret, bus_client_id, bus_auth_token, bus_public_id] = fields;
    Ok(ConnectionProfile {
        network_id,
        network_secret,
        bus_client_id,
        bus_auth_token,
        bus_public_id,
        confirmed: record[5] & FLAG_CONFIRMED != 0,
    })
}

fn slots(profile: &ConnectionProfile) -> [&str; SLOT_COUNT] {
    [
        profile.network_id.as_str(),
        profile.network_secret.as_str(),
        profile.bus_client_id.as_str(),
        profile.bus_auth_token.as_str(),
        profile.bus_public_id.as_str(),
    ]
}

fn checksum8(bytes: &[u8]) -> u8 {
    let mut acc = 0x5Au8;
    for &byte in bytes {
        acc ^= byte.rotate_left(1);
    }
    acc
}
