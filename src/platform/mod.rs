//! Board adapters for the ESP32 build.

mod esp;

pub use esp::{flash_profile_store, init_logger, EspClock, EspRestart};
