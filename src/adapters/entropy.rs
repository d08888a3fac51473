//! Entropy source for address generation.
//!
//! - **`target_os = "espidf"`**: `esp_fill_random`, the hardware RNG (true
//!   random while the radio is on).
//! - **other targets**: `rand`'s `StdRng` seeded by the caller, for
//!   reproducible simulation runs.

use rand_core::RngCore;
#[cfg(target_os = "espidf")]
use rand_core::impls;

#[cfg(not(target_os = "espidf"))]
use rand::{SeedableRng, rngs::StdRng};

#[cfg(not(target_os = "espidf"))]
use crate::adapters::device_id::{MacAddress, mac_seed};

#[cfg(target_os = "espidf")]
pub struct EntropySource;

#[cfg(target_os = "espidf")]
impl EntropySource {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(target_os = "espidf")]
impl RngCore for EntropySource {
    fn next_u32(&mut self) -> u32 {
        impls::next_u32_via_fill(self)
    }

    fn next_u64(&mut self) -> u64 {
        impls::next_u64_via_fill(self)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        unsafe {
            esp_idf_svc::sys::esp_fill_random(dest.as_mut_ptr().cast(), dest.len());
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

#[cfg(not(target_os = "espidf"))]
pub struct EntropySource {
    rng: StdRng,
}

#[cfg(not(target_os = "espidf"))]
impl EntropySource {
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Seeded from the device MAC, so each simulated device draws its own
    /// address sequence.
    pub fn from_mac(mac: &MacAddress) -> Self {
        Self::seeded(mac_seed(mac))
    }
}

#[cfg(not(target_os = "espidf"))]
impl RngCore for EntropySource {
    fn next_u32(&mut self) -> u32 {
        self.rng.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.rng.fill_bytes(dest);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.rng.try_fill_bytes(dest)
    }
}
