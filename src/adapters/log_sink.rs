//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing every session event to the `log`
//! facade (ESP-IDF logger on target, whatever the host installs otherwise).
//! Lines are tagged so they can be grepped out of a serial capture.

use log::{error, info, warn};

use crate::app::events::SessionEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`SessionEvent`] to the console.
#[derive(Debug, Default)]
pub struct LogEventSink {
    emitted: u32,
}

impl LogEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events written since construction.
    pub fn emitted(&self) -> u32 {
        self.emitted
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &SessionEvent) {
        self.emitted = self.emitted.wrapping_add(1);
        match event {
            SessionEvent::Started { address } => {
                info!("START | address={} ({:?})", address, address.kind());
            }
            SessionEvent::StateChanged { from, to } => {
                info!("STATE | {:?} -> {:?}", from, to);
            }
            SessionEvent::Connected(handle) => {
                info!("CONN  | up {}", handle);
            }
            SessionEvent::Disconnected { handle, reason } => {
                info!("CONN  | down {} reason=0x{:02x}", handle, reason);
            }
            SessionEvent::NegotiationSettled { handle, outcome } => {
                info!("CONN  | {} negotiation {:?}", handle, outcome);
            }
            SessionEvent::AddressRotated(address) => {
                info!("ADDR  | rotated to {}", address);
            }
            SessionEvent::AddressRotationFailed(e) => {
                warn!("ADDR  | rotation rejected: {}", e);
            }
            SessionEvent::PhyUpdateFailed(e) => {
                warn!("PHY   | update rejected: {}", e);
            }
            SessionEvent::AdvertisingFailed(e) => {
                warn!("ADV   | restart failed: {}", e);
            }
            SessionEvent::InvariantViolation(v) => {
                error!("FAULT | {}", v);
            }
        }
    }
}
