//! Advertising manager.
//!
//! Owns the advertising configuration and its encoded payload, issues start
//! and stop commands, and folds controller-reported transitions into
//! Advertising↔Idle edges for the orchestrator.
//!
//! ```text
//!  start() ──▶ Fast ──TimedOut──▶ Slow ──TimedOut──▶ Idle
//!               │                  (only when configured)
//!               └──TimedOut (no slow mode)──────────▶ Idle
//! ```
//!
//! Failed starts are reported to the caller and never retried here.  A
//! controller entry edge only confirms a start this manager issued; one for
//! a mode no longer commanded is dropped.

use log::{debug, info, warn};

use crate::app::events::AdvertisingEvent;
use crate::app::ports::LinkController;
use crate::config::{AdvertisingConfig, Discoverability, NameInclusion};
use crate::error::{ConfigError, SessionError};

use super::SessionState;

/// Legacy advertising data limit.
pub const MAX_ADV_PAYLOAD: usize = 31;

/// Encoded advertising data.
pub type AdvPayload = heapless::Vec<u8, MAX_ADV_PAYLOAD>;

// AD types (Bluetooth Assigned Numbers, "Common Data Types").
const AD_FLAGS: u8 = 0x01;
const AD_SHORT_NAME: u8 = 0x08;
const AD_COMPLETE_NAME: u8 = 0x09;
const AD_TX_POWER: u8 = 0x0A;
const AD_APPEARANCE: u8 = 0x19;

const FLAG_LE_LIMITED: u8 = 0x01;
const FLAG_LE_GENERAL: u8 = 0x02;
const FLAG_BR_EDR_NOT_SUPPORTED: u8 = 0x04;

/// Encode `config` into AD structures: Flags, TX power, Appearance, name.
pub fn build_adv_payload(config: &AdvertisingConfig) -> Result<AdvPayload, ConfigError> {
    let mut out = AdvPayload::new();

    let discover = match config.discoverability {
        Discoverability::General => FLAG_LE_GENERAL,
        Discoverability::Limited => FLAG_LE_LIMITED,
    };
    push_ad(&mut out, AD_FLAGS, &[discover | FLAG_BR_EDR_NOT_SUPPORTED])?;

    if let Some(dbm) = config.tx_power_dbm {
        push_ad(&mut out, AD_TX_POWER, &dbm.to_le_bytes())?;
    }
    if let Some(appearance) = config.appearance {
        push_ad(&mut out, AD_APPEARANCE, &appearance.to_le_bytes())?;
    }

    let name = config.device_name.as_bytes();
    match config.name_inclusion {
        NameInclusion::None => {}
        NameInclusion::Short(len) if usize::from(len) < name.len() => {
            push_ad(&mut out, AD_SHORT_NAME, &name[..usize::from(len)])?;
        }
        NameInclusion::Short(_) | NameInclusion::Full => {
            push_ad(&mut out, AD_COMPLETE_NAME, name)?;
        }
    }
    Ok(out)
}

fn push_ad(out: &mut AdvPayload, ad_type: u8, data: &[u8]) -> Result<(), ConfigError> {
    let len = u8::try_from(data.len() + 1).map_err(|_| ConfigError::PayloadTooLong)?;
    out.push(len).map_err(|_| ConfigError::PayloadTooLong)?;
    out.push(ad_type).map_err(|_| ConfigError::PayloadTooLong)?;
    out.extend_from_slice(data)
        .map_err(|()| ConfigError::PayloadTooLong)
}

// ═══════════════════════════════════════════════════════════════
//  Manager
// ═══════════════════════════════════════════════════════════════

/// Advertising phase requested from the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertisingMode {
    Fast,
    Slow,
}

/// Edge surfaced to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvTransition {
    EnteredAdvertising,
    WentIdle,
}

pub struct AdvertisingManager {
    config: AdvertisingConfig,
    payload: AdvPayload,
    /// Mode last commanded; `None` when no start is outstanding.
    mode: Option<AdvertisingMode>,
    /// The controller has reported entering `mode`.
    confirmed: bool,
}

impl AdvertisingManager {
    /// Validate and freeze `config`.
    pub fn new(config: AdvertisingConfig) -> Result<Self, ConfigError> {
        let payload = build_adv_payload(&config)?;
        if config.slow.is_some() && config.is_continuous() {
            return Err(ConfigError::Contradictory(
                "slow mode configured but fast mode never times out",
            ));
        }
        Ok(Self {
            config,
            payload,
            mode: None,
            confirmed: false,
        })
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn is_advertising(&self) -> bool {
        self.mode.is_some()
    }

    pub fn mode(&self) -> Option<AdvertisingMode> {
        self.mode
    }

    /// Issue one fast-mode start.
    pub fn start(
        &mut self,
        session: SessionState,
        link: &mut impl LinkController,
    ) -> Result<(), SessionError> {
        if self.mode.is_some()
            || matches!(session, SessionState::Connected | SessionState::Disconnecting)
        {
            warn!("Advertising: start refused ({:?}, mode {:?})", session, self.mode);
            return Err(SessionError::ControllerBusy);
        }
        link.start_advertising(&self.config, AdvertisingMode::Fast)
            .inspect_err(|e| warn!("Advertising: controller rejected start ({})", e))?;
        self.command(AdvertisingMode::Fast);
        info!(
            "Advertising: fast mode (interval {}, timeout {}s)",
            self.config.fast_interval, self.config.fast_timeout_secs
        );
        Ok(())
    }

    /// Stop advertising.  No-op when idle.
    pub fn stop(&mut self, link: &mut impl LinkController) -> Result<(), SessionError> {
        if self.mode.is_none() {
            return Ok(());
        }
        link.stop_advertising()?;
        self.mode = None;
        self.confirmed = false;
        info!("Advertising: stopped");
        Ok(())
    }

    /// The controller has stopped advertising on its own (e.g. on connect).
    pub fn mark_halted(&mut self) {
        self.confirmed = false;
        if self.mode.take().is_some() {
            debug!("Advertising: halted by controller");
        }
    }

    /// Fold a controller transition into an Advertising↔Idle edge.
    pub fn on_advertising_event(
        &mut self,
        event: AdvertisingEvent,
        link: &mut impl LinkController,
    ) -> Option<AdvTransition> {
        match event {
            AdvertisingEvent::FastModeEntered => self.entered(AdvertisingMode::Fast),
            AdvertisingEvent::SlowModeEntered => self.entered(AdvertisingMode::Slow),
            AdvertisingEvent::TimedOut => self.timed_out(link),
        }
    }

    /// Confirms a start this manager issued.  Edges for a mode that is no
    /// longer commanded (queued behind a stop or a mode switch) are stale.
    fn entered(&mut self, mode: AdvertisingMode) -> Option<AdvTransition> {
        if self.mode != Some(mode) {
            debug!("Advertising: stale {:?} entry ignored (mode {:?})", mode, self.mode);
            return None;
        }
        if self.confirmed {
            return None;
        }
        self.confirmed = true;
        Some(AdvTransition::EnteredAdvertising)
    }

    fn command(&mut self, mode: AdvertisingMode) {
        self.mode = Some(mode);
        self.confirmed = false;
    }

    fn timed_out(&mut self, link: &mut impl LinkController) -> Option<AdvTransition> {
        match (self.mode, self.config.slow) {
            (None, _) => {
                debug!("Advertising: timeout while idle ignored");
                None
            }
            (Some(AdvertisingMode::Fast), _) if self.config.is_continuous() => {
                warn!("Advertising: spurious timeout in continuous mode ignored");
                None
            }
            (Some(AdvertisingMode::Slow), Some(slow)) if slow.timeout_secs == 0 => {
                warn!("Advertising: spurious timeout in continuous slow mode ignored");
                None
            }
            (Some(AdvertisingMode::Fast), Some(slow)) => {
                match link.start_advertising(&self.config, AdvertisingMode::Slow) {
                    Ok(()) => {
                        self.command(AdvertisingMode::Slow);
                        info!("Advertising: slow mode (interval {})", slow.interval);
                        None
                    }
                    Err(e) => {
                        warn!("Advertising: slow mode start rejected ({})", e);
                        self.mode = None;
                        self.confirmed = false;
                        Some(AdvTransition::WentIdle)
                    }
                }
            }
            (Some(_), _) => {
                self.mode = None;
                self.confirmed = false;
                info!("Advertising: timed out");
                Some(AdvTransition::WentIdle)
            }
        }
    }
}
