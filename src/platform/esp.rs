use embassy_time::{Duration, Instant};
use esp_storage::FlashStorage;
use log::error;

use crate::{
    ports::{Clock, DeviceControl},
    storage::FlashProfileStore,
    types::RestartReason,
};

/// Monotonic clock on the esp-hal system timer; delays busy-wait.
#[derive(Clone, Copy, Default)]
pub struct EspClock;

impl EspClock {
    pub const fn new() -> Self {
        Self
    }
}

impl Clock for EspClock {
    fn now(&self) -> Instant {
        let since_boot = esp_hal::time::Instant::now().duration_since_epoch();
        Instant::from_micros(since_boot.as_micros())
    }

    fn delay(&mut self, duration: Duration) {
        let start = esp_hal::time::Instant::now();
        let wait = esp_hal::time::Duration::from_micros(duration.as_micros());
        while start.elapsed() < wait {}
    }
}

#[derive(Clone, Copy, Default)]
pub struct EspRestart;

impl DeviceControl for EspRestart {
    fn restart(&mut self, reason: RestartReason) {
        error!("iot: software reset reason={}", reason.as_str());
        esp_hal::system::software_reset();
    }
}

/// Credential record in the last sector of the internal flash.
pub fn flash_profile_store(
    flash: esp_hal::peripherals::FLASH<'_>,
) -> FlashProfileStore<FlashStorage<'_>> {
    let flash = FlashStorage::new(flash).multicore_auto_park();
    FlashProfileStore::in_last_sector(flash, FlashStorage::SECTOR_SIZE)
}

pub fn init_logger() {
    esp_println::logger::init_logger(log::LevelFilter::Info);
}
