//! Session configuration parameters
//!
//! Everything the session needs at `initialize`: advertising payload and
//! timing, connection-parameter negotiation policy, and the address privacy
//! strategy.  Built once at startup and read-only afterwards.
//!
//! Units follow the link layer: connection intervals in 1.25 ms, supervision
//! timeout in 10 ms, advertising intervals in 0.625 ms.

use embassy_time::Duration;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::session::advertising::build_adv_payload;

/// Longest device name the payload builder accepts.
pub const MAX_DEVICE_NAME_LEN: usize = 24;

/// Owned fixed-capacity device name.
pub type DeviceName = heapless::String<MAX_DEVICE_NAME_LEN>;

/// Top-level session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub advertising: AdvertisingConfig,
    pub connection: ConnectionParams,
    pub address: AddressPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            advertising: AdvertisingConfig::default(),
            connection: ConnectionParams::default(),
            address: AddressPolicy::PrivateNonResolvable { cycle_secs: 900 },
        }
    }
}

impl SessionConfig {
    /// Range and cross-field checks.  Runs before the session accepts the
    /// configuration; nothing is clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.advertising.validate()?;
        self.connection.validate()?;
        self.address.validate()?;

        // Continuous advertising plus a zero-budget disconnect policy cycles
        // connect/disconnect forever without a single update attempt.
        if self.advertising.fast_timeout_secs == 0
            && self.connection.disconnect_on_fail
            && self.connection.max_update_count == 0
        {
            return Err(ConfigError::Contradictory(
                "continuous advertising with zero-retry disconnect-on-fail",
            ));
        }
        Ok(())
    }

    /// Decode a postcard blob (the compact form kept in flash) and validate it.
    pub fn from_postcard(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config: Self = postcard::from_bytes(bytes).map_err(|_| ConfigError::Malformed)?;
        config.validate()?;
        Ok(config)
    }

    /// Encode into a postcard blob that fits `buf`.
    pub fn to_postcard<'a>(&self, buf: &'a mut [u8]) -> Result<&'a mut [u8], ConfigError> {
        postcard::to_slice(self, buf).map_err(|_| ConfigError::Malformed)
    }

    /// Decode a JSON document (the provisioning form) and validate it.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text).map_err(|e| {
            log::warn!("config JSON rejected: {e}");
            ConfigError::Malformed
        })?;
        config.validate()?;
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Advertising
// ---------------------------------------------------------------------------

/// How much of the device name goes into the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NameInclusion {
    None,
    /// Shortened local name, truncated to this many bytes.
    Short(u8),
    Full,
}

/// Discoverability flags carried in the Flags AD structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Discoverability {
    General,
    Limited,
}

/// Optional slow advertising phase after fast mode times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlowAdvertising {
    /// Interval in 0.625 ms units.
    pub interval: u16,
    /// Seconds before advertising stops; 0 = unbounded.
    pub timeout_secs: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvertisingConfig {
    pub device_name: DeviceName,
    pub name_inclusion: NameInclusion,
    /// GAP appearance value; included when `Some`.
    pub appearance: Option<u16>,
    pub discoverability: Discoverability,
    /// TX power annotation in dBm; included when `Some`.
    pub tx_power_dbm: Option<i8>,
    /// Fast-mode interval in 0.625 ms units.
    pub fast_interval: u16,
    /// Fast-mode timeout in seconds; 0 = continuous.
    pub fast_timeout_secs: u16,
    pub slow: Option<SlowAdvertising>,
}

impl Default for AdvertisingConfig {
    fn default() -> Self {
        let mut device_name = DeviceName::new();
        let _ = device_name.push_str("periph");
        Self {
            device_name,
            name_inclusion: NameInclusion::Full,
            appearance: None,
            discoverability: Discoverability::General,
            tx_power_dbm: None,
            fast_interval: 64, // 40 ms
            fast_timeout_secs: 180,
            slow: None,
        }
    }
}

impl AdvertisingConfig {
    /// `true` when fast mode never times out.
    pub fn is_continuous(&self) -> bool {
        self.fast_timeout_secs == 0
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !adv_interval_valid(self.fast_interval) {
            return Err(ConfigError::OutOfRange("fast_interval"));
        }
        if let Some(slow) = self.slow {
            if !adv_interval_valid(slow.interval) {
                return Err(ConfigError::OutOfRange("slow.interval"));
            }
            if self.is_continuous() {
                return Err(ConfigError::Contradictory(
                    "slow mode configured but fast mode never times out",
                ));
            }
        }
        if let NameInclusion::Short(0) = self.name_inclusion {
            return Err(ConfigError::OutOfRange("name_inclusion"));
        }
        build_adv_payload(self).map(|_| ())
    }
}

fn adv_interval_valid(interval: u16) -> bool {
    (0x0020..=0x4000).contains(&interval)
}

// ---------------------------------------------------------------------------
// Connection parameters
// ---------------------------------------------------------------------------

/// Parameters currently applied to a live link, as reported by the
/// controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkParams {
    /// Connection interval in 1.25 ms units.
    pub interval: u16,
    pub latency: u16,
    /// Supervision timeout in 10 ms units.
    pub supervision_timeout: u16,
}

/// Preferred link parameters and the policy for negotiating them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    pub min_interval: u16,
    pub max_interval: u16,
    pub slave_latency: u16,
    pub supervision_timeout: u16,

    /// Delay from connection to the first update attempt (ms).
    pub first_update_delay_ms: u32,
    /// Delay between subsequent attempts (ms).
    pub next_update_delay_ms: u32,
    /// Attempts allowed before the exhaustion branch runs.
    pub max_update_count: u8,
    /// Disconnect when negotiation fails instead of accepting the link as is.
    pub disconnect_on_fail: bool,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            min_interval: 80,  // 100 ms
            max_interval: 160, // 200 ms
            slave_latency: 0,
            supervision_timeout: 400, // 4 s
            first_update_delay_ms: 5_000,
            next_update_delay_ms: 30_000,
            max_update_count: 3,
            disconnect_on_fail: false,
        }
    }
}

impl ConnectionParams {
    pub fn first_update_delay(&self) -> Duration {
        Duration::from_millis(u64::from(self.first_update_delay_ms))
    }

    pub fn next_update_delay(&self) -> Duration {
        Duration::from_millis(u64::from(self.next_update_delay_ms))
    }

    /// Whether `applied` satisfies this policy: interval inside the preferred
    /// window, latency and supervision timeout exactly as preferred.
    pub fn accepts(&self, applied: &LinkParams) -> bool {
        (self.min_interval..=self.max_interval).contains(&applied.interval)
            && applied.latency == self.slave_latency
            && applied.supervision_timeout == self.supervision_timeout
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(6..=3200).contains(&self.min_interval) {
            return Err(ConfigError::OutOfRange("min_interval"));
        }
        if !(6..=3200).contains(&self.max_interval) {
            return Err(ConfigError::OutOfRange("max_interval"));
        }
        if self.min_interval > self.max_interval {
            return Err(ConfigError::Contradictory("min_interval above max_interval"));
        }
        if self.slave_latency > 499 {
            return Err(ConfigError::OutOfRange("slave_latency"));
        }
        if !(10..=3200).contains(&self.supervision_timeout) {
            return Err(ConfigError::OutOfRange("supervision_timeout"));
        }
        // timeout_ms > (1 + latency) * max_interval_ms * 2, in link units.
        let timeout = u32::from(self.supervision_timeout) * 4;
        let window = (1 + u32::from(self.slave_latency)) * u32::from(self.max_interval);
        if timeout <= window {
            return Err(ConfigError::Contradictory(
                "supervision_timeout too short for max_interval and latency",
            ));
        }
        if self.next_update_delay_ms == 0 {
            return Err(ConfigError::OutOfRange("next_update_delay_ms"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Address privacy
// ---------------------------------------------------------------------------

/// Address strategy, fixed for the session lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressPolicy {
    /// One static random address per boot; never rotated.
    StaticRandom,
    /// Fresh non-resolvable private address every `cycle_secs`.
    PrivateNonResolvable { cycle_secs: u32 },
}

impl AddressPolicy {
    /// Rotation period, or `None` when the policy never rotates.
    pub fn cycle(&self) -> Option<Duration> {
        match self {
            Self::StaticRandom => None,
            Self::PrivateNonResolvable { cycle_secs } => {
                Some(Duration::from_secs(u64::from(*cycle_secs)))
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::PrivateNonResolvable { cycle_secs: 0 } => {
                Err(ConfigError::OutOfRange("private_addr_cycle_secs"))
            }
            _ => Ok(()),
        }
    }
}
