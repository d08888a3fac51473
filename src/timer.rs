//! Tick-driven software timer service.
//!
//! Implements [`TimerPort`] for the session with a fixed set of slots
//! advanced by the main loop.  Expired tokens are returned to the caller,
//! which feeds them back into the session; the service itself knows nothing
//! about what a token means.
//!
//! ```text
//!  main loop ──advance(dt)──▶ TickTimerService ──Fired tokens──▶ Session::on_timer
//!                                   ▲
//!  Session ──schedule/cancel────────┘
//! ```
//!
//! Slots are reused.  Every [`TimerId`] carries the slot's generation, so
//! cancelling an id whose timer already expired cannot hit the slot's next
//! occupant.

use embassy_time::Duration;
use log::{debug, warn};

use crate::app::ports::{TimerId, TimerPort, TimerToken};
use crate::error::TimerError;

/// Maximum number of concurrent timers (stack-allocated).
const MAX_TIMERS: usize = 4;

/// Maximum expiries reported by one [`TickTimerService::advance`].
pub const MAX_FIRED_PER_ADVANCE: usize = 8;

/// Tokens expired during one advance, in slot order.
pub type Fired = heapless::Vec<TimerToken, MAX_FIRED_PER_ADVANCE>;

/// Internal bookkeeping for a live timer.
#[derive(Debug, Clone, Copy)]
struct TimerEntry {
    token: TimerToken,
    remaining_ms: u64,
    /// `Some` for repeating timers.
    period_ms: Option<u64>,
    generation: u16,
}

/// The timer engine.
///
/// Advance it in steps no longer than the shortest period in use; within a
/// single step expiries are reported per slot, not in global time order.
pub struct TickTimerService {
    slots: [Option<TimerEntry>; MAX_TIMERS],
    generations: [u16; MAX_TIMERS],
}

impl Default for TickTimerService {
    fn default() -> Self {
        Self::new()
    }
}

impl TickTimerService {
    pub fn new() -> Self {
        Self {
            slots: [None; MAX_TIMERS],
            generations: [0; MAX_TIMERS],
        }
    }

    /// Move time forward by `elapsed` and collect every expiry.
    pub fn advance(&mut self, elapsed: Duration) -> Fired {
        let mut fired = Fired::new();
        let elapsed_ms = elapsed.as_millis();

        for slot in &mut self.slots {
            let Some(entry) = slot else { continue };
            let mut budget = elapsed_ms;

            loop {
                if entry.remaining_ms > budget {
                    entry.remaining_ms -= budget;
                    break;
                }
                budget -= entry.remaining_ms;
                if fired.push(entry.token).is_err() {
                    warn!(
                        "Timers: expiry of {:?} dropped (advance step too long)",
                        entry.token.kind
                    );
                }
                let period_ms = entry.period_ms;
                match period_ms {
                    Some(period) => entry.remaining_ms = period,
                    None => {
                        *slot = None;
                        break;
                    }
                }
            }
        }
        fired
    }

    /// Number of scheduled timers.
    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    fn insert(
        &mut self,
        delay: Duration,
        period: Option<Duration>,
        token: TimerToken,
    ) -> Result<TimerId, TimerError> {
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(TimerError::NoFreeSlot)?;

        self.generations[index] = self.generations[index].wrapping_add(1);
        let generation = self.generations[index];
        // A zero period would expire forever within one advance.
        let period_ms = period.map(|p| p.as_millis().max(1));
        self.slots[index] = Some(TimerEntry {
            token,
            remaining_ms: period_ms.unwrap_or_else(|| delay.as_millis()),
            period_ms,
            generation,
        });
        debug!("Timers: {:?} scheduled in slot {}", token.kind, index);

        Ok(TimerId {
            slot: index as u8,
            generation,
        })
    }
}

impl TimerPort for TickTimerService {
    fn schedule_once(&mut self, delay: Duration, token: TimerToken) -> Result<TimerId, TimerError> {
        self.insert(delay, None, token)
    }

    fn schedule_repeating(
        &mut self,
        period: Duration,
        token: TimerToken,
    ) -> Result<TimerId, TimerError> {
        self.insert(period, Some(period), token)
    }

    fn cancel(&mut self, id: TimerId) {
        let index = usize::from(id.slot);
        if let Some(slot) = self.slots.get_mut(index) {
            if slot.is_some_and(|e| e.generation == id.generation) {
                *slot = None;
                debug!("Timers: slot {} cancelled", index);
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
