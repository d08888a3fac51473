//! Event mailbox between callback context and the session.
//!
//! Controller callbacks and timer expiries may fire on another task (the
//! Bluedroid callback task, an ISR).  They only post into the mailbox; the
//! main loop drains it and feeds each entry to
//! [`Session::dispatch`](crate::session::Session::dispatch), so every state
//! change runs on one serialized context.
//!
//! ```text
//! ┌──────────────────┐     ┌───────────────┐     ┌──────────────┐
//! │ GAP callback     │────▶│               │     │              │
//! │ Timer expiry     │────▶│  EventMailbox │────▶│  Main loop   │
//! │ Host simulation  │────▶│  (bounded)    │     │  (consumer)  │
//! └──────────────────┘     └───────────────┘     └──────────────┘
//! ```

use core::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};

use crate::app::events::LinkEvent;
use crate::app::ports::TimerToken;

/// Maximum number of pending entries.
pub const MAILBOX_DEPTH: usize = 16;

/// One unit of work for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Incoming {
    Link(LinkEvent),
    Timer(TimerToken),
}

/// Bounded multi-producer, single-consumer mailbox.
///
/// `const`-constructible so it can live in a `static` reachable from C
/// callbacks.
pub struct EventMailbox {
    channel: Channel<CriticalSectionRawMutex, Incoming, MAILBOX_DEPTH>,
    dropped: AtomicU32,
}

impl Default for EventMailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl EventMailbox {
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
            dropped: AtomicU32::new(0),
        }
    }

    /// Post from any context.  Returns `false` if the mailbox was full and
    /// the entry was dropped.
    pub fn post(&self, incoming: Incoming) -> bool {
        match self.channel.try_send(incoming) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn post_link(&self, event: LinkEvent) -> bool {
        self.post(Incoming::Link(event))
    }

    /// Next pending entry, if any.
    pub fn take(&self) -> Option<Incoming> {
        self.channel.try_receive().ok()
    }

    /// Hand every pending entry to `handler`, in FIFO order.
    pub fn drain(&self, mut handler: impl FnMut(Incoming)) -> usize {
        let mut count = 0;
        while let Some(incoming) = self.take() {
            handler(incoming);
            count += 1;
        }
        count
    }

    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }

    /// Entries lost to a full mailbox since boot.
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}
