//! Device identity derived from the ESP32 factory MAC address.
//!
//! The advertised name is `periph-xxyyzz` (last three MAC bytes, lowercase
//! hex).  It is stable across reboots while the on-air address is not, so
//! a user can still recognise the device in a scan list.

use core::fmt::Write;

use crate::config::DeviceName;

/// Full 6-byte MAC address.
pub type MacAddress = [u8; 6];

/// Read the factory MAC address from eFuse.
#[cfg(target_os = "espidf")]
pub fn read_mac() -> MacAddress {
    let mut mac: MacAddress = [0u8; 6];
    unsafe {
        esp_idf_svc::sys::esp_efuse_mac_get_default(mac.as_mut_ptr());
    }
    mac
}

/// Simulation: returns a deterministic fake MAC.
#[cfg(not(target_os = "espidf"))]
pub fn read_mac() -> MacAddress {
    [0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE]
}

/// Advertised device name for `mac`.
pub fn device_name(mac: &MacAddress) -> DeviceName {
    let mut name = DeviceName::new();
    let _ = write!(name, "periph-{:02x}{:02x}{:02x}", mac[3], mac[4], mac[5]);
    name
}

/// Seed material for the host entropy source (`EntropySource::from_mac`).
pub fn mac_seed(mac: &MacAddress) -> u64 {
    mac.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}
