//! On-air address and its rotation policy.
//!
//! Addresses are little-endian: byte 5 is the most significant.  The two
//! top bits of byte 5 encode the random sub-type:
//!
//! | Sub-type                  | Bits 47:46 |
//! |---------------------------|------------|
//! | Static random             | `0b11`     |
//! | Non-resolvable private    | `0b00`     |
//!
//! The other 46 bits are random and must be neither all zero nor all one.

use core::fmt;

use log::{debug, info, warn};
use rand_core::RngCore;

use crate::app::ports::{LinkController, TimerId, TimerKind, TimerPort, TimerToken};
use crate::config::AddressPolicy;
use crate::error::{ControllerError, SessionError};

const TYPE_MASK: u8 = 0b1100_0000;
const STATIC_RANDOM_BITS: u8 = 0b1100_0000;
const NON_RESOLVABLE_BITS: u8 = 0b0000_0000;

/// Random address sub-type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    StaticRandom,
    PrivateNonResolvable,
}

impl AddressKind {
    const fn type_bits(self) -> u8 {
        match self {
            Self::StaticRandom => STATIC_RANDOM_BITS,
            Self::PrivateNonResolvable => NON_RESOLVABLE_BITS,
        }
    }
}

/// A 48-bit random device address with its sub-type.
///
/// `Copy` and replaced as a whole value, so a reader never sees half of an
/// old address and half of a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceAddress {
    bytes: [u8; 6],
    kind: AddressKind,
}

impl DeviceAddress {
    /// Wrap raw bytes.  No validation; see [`DeviceAddress::is_valid`].
    pub const fn new(bytes: [u8; 6], kind: AddressKind) -> Self {
        Self { bytes, kind }
    }

    /// Draw a fresh address of `kind` from `rng`.
    pub fn generate(kind: AddressKind, rng: &mut impl RngCore) -> Self {
        let mut bytes = [0u8; 6];
        rng.fill_bytes(&mut bytes);
        bytes[5] = (bytes[5] & !TYPE_MASK) | kind.type_bits();

        // Force a valid random part without another draw.
        if random_part_is(&bytes, 0x00) {
            bytes[0] = 0x01;
        } else if random_part_is(&bytes, 0xFF) {
            bytes[0] = 0xFE;
        }
        Self { bytes, kind }
    }

    pub fn bytes(&self) -> [u8; 6] {
        self.bytes
    }

    pub fn kind(&self) -> AddressKind {
        self.kind
    }

    /// The two top bits as stored.
    pub fn type_bits(&self) -> u8 {
        self.bytes[5] & TYPE_MASK
    }

    /// Type bits match the kind and the random part is usable.
    pub fn is_valid(&self) -> bool {
        self.type_bits() == self.kind.type_bits()
            && !random_part_is(&self.bytes, 0x00)
            && !random_part_is(&self.bytes, 0xFF)
    }
}

fn random_part_is(bytes: &[u8; 6], fill: u8) -> bool {
    bytes[..5].iter().all(|b| *b == fill) && (bytes[5] & !TYPE_MASK) == (fill & !TYPE_MASK)
}

impl fmt::Display for DeviceAddress {
    /// Most significant byte first, the usual `AA:BB:CC:DD:EE:FF` form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.bytes;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[5], b[4], b[3], b[2], b[1], b[0]
        )
    }
}

// ═══════════════════════════════════════════════════════════════
//  Rotation policy
// ═══════════════════════════════════════════════════════════════

/// Result of a rotation timer firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationOutcome {
    /// The token belonged to a cancelled timer.
    Stale,
    Rotated(DeviceAddress),
    /// The controller kept the previous address.
    Rejected(ControllerError),
}

/// Owns the on-air address.  The only code that replaces it.
pub struct AddressRotation {
    policy: AddressPolicy,
    current: Option<DeviceAddress>,
    timer: Option<TimerId>,
    epoch: u32,
}

impl AddressRotation {
    pub fn new(policy: AddressPolicy) -> Self {
        Self {
            policy,
            current: None,
            timer: None,
            epoch: 0,
        }
    }

    pub fn kind(&self) -> AddressKind {
        match self.policy {
            AddressPolicy::StaticRandom => AddressKind::StaticRandom,
            AddressPolicy::PrivateNonResolvable { .. } => AddressKind::PrivateNonResolvable,
        }
    }

    /// Last address the controller accepted.
    pub fn current(&self) -> Option<DeviceAddress> {
        self.current
    }

    /// Whether the rotation timer is armed.
    pub fn is_rotating(&self) -> bool {
        self.timer.is_some()
    }

    /// Apply the startup address and arm rotation when the policy asks for it.
    ///
    /// A static address survives a stop/start cycle; a private one is redrawn.
    pub fn start(
        &mut self,
        link: &mut impl LinkController,
        timers: &mut impl TimerPort,
        rng: &mut impl RngCore,
    ) -> Result<DeviceAddress, SessionError> {
        let address = match (self.kind(), self.current) {
            (AddressKind::StaticRandom, Some(existing)) => existing,
            (kind, _) => {
                let fresh = DeviceAddress::generate(kind, rng);
                link.set_address(&fresh)?;
                self.current = Some(fresh);
                fresh
            }
        };
        info!("Address: {} ({:?})", address, address.kind());

        if let (Some(cycle), None) = (self.policy.cycle(), self.timer) {
            self.epoch = self.epoch.wrapping_add(1);
            let token = TimerToken {
                kind: TimerKind::AddressRotation,
                epoch: self.epoch,
            };
            self.timer = Some(timers.schedule_repeating(cycle, token)?);
            info!("Address: rotating every {}s", cycle.as_secs());
        }
        Ok(address)
    }

    /// Rotation timer callback.
    pub fn on_rotation_due(
        &mut self,
        epoch: u32,
        link: &mut impl LinkController,
        rng: &mut impl RngCore,
    ) -> RotationOutcome {
        if self.timer.is_none() || epoch != self.epoch {
            debug!("Address: stale rotation token (epoch {} vs {})", epoch, self.epoch);
            return RotationOutcome::Stale;
        }

        let next = DeviceAddress::generate(AddressKind::PrivateNonResolvable, rng);
        match link.set_address(&next) {
            Ok(()) => {
                self.current = Some(next);
                info!("Address: rotated to {}", next);
                RotationOutcome::Rotated(next)
            }
            Err(e) => {
                warn!("Address: rotation rejected ({}), keeping previous", e);
                RotationOutcome::Rejected(e)
            }
        }
    }

    /// Disarm rotation.  Late firings are dropped by the epoch check.
    pub fn stop(&mut self, timers: &mut impl TimerPort) {
        if let Some(id) = self.timer.take() {
            timers.cancel(id);
            info!("Address: rotation stopped");
        }
        self.epoch = self.epoch.wrapping_add(1);
    }
}
