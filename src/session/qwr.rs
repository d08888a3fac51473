//! Queued-write guard.
//!
//! The attribute layer is outside this crate, but one piece of it is tied to
//! the link lifecycle: a prepared (queued) write sequence belongs to exactly
//! one connection and only one may be in flight.  The session binds the
//! guard on connect and releases it on disconnect, which discards whatever
//! was queued.

use core::fmt;

use log::debug;

use super::connection::ConnectionHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuedWriteError {
    /// No link is bound.
    NotConnected,
    /// The request names a link that is not the bound one.
    StaleHandle,
    /// A sequence for another attribute is already queued.
    Busy { attribute: u16 },
    /// Execute or cancel without a queued sequence.
    NothingQueued,
}

impl fmt::Display for QueuedWriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "no connection bound"),
            Self::StaleHandle => write!(f, "stale connection handle"),
            Self::Busy { attribute } => {
                write!(f, "queued write in flight on attribute 0x{attribute:04x}")
            }
            Self::NothingQueued => write!(f, "nothing queued"),
        }
    }
}

pub struct QueuedWriteGuard {
    handle: ConnectionHandle,
    in_flight: Option<u16>,
}

impl Default for QueuedWriteGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl QueuedWriteGuard {
    pub fn new() -> Self {
        Self {
            handle: ConnectionHandle::INVALID,
            in_flight: None,
        }
    }

    pub fn bound_handle(&self) -> ConnectionHandle {
        self.handle
    }

    /// Attribute with a queued sequence, if any.
    pub fn in_flight(&self) -> Option<u16> {
        self.in_flight
    }

    pub(crate) fn bind(&mut self, handle: ConnectionHandle) {
        self.handle = handle;
        self.in_flight = None;
    }

    pub(crate) fn release(&mut self) {
        if let Some(attribute) = self.in_flight.take() {
            debug!("QueuedWrite: dropped sequence on 0x{:04x}", attribute);
        }
        self.handle = ConnectionHandle::INVALID;
    }

    /// Queue a prepared write for `attribute`.  Further prepares on the same
    /// attribute extend the sequence.
    pub fn prepare(
        &mut self,
        handle: ConnectionHandle,
        attribute: u16,
    ) -> Result<(), QueuedWriteError> {
        self.check(handle)?;
        match self.in_flight {
            Some(owner) if owner != attribute => Err(QueuedWriteError::Busy { attribute: owner }),
            _ => {
                self.in_flight = Some(attribute);
                Ok(())
            }
        }
    }

    /// Commit the queued sequence; returns its attribute.
    pub fn execute(&mut self, handle: ConnectionHandle) -> Result<u16, QueuedWriteError> {
        self.check(handle)?;
        self.in_flight.take().ok_or(QueuedWriteError::NothingQueued)
    }

    pub fn cancel(&mut self, handle: ConnectionHandle) -> Result<(), QueuedWriteError> {
        self.check(handle)?;
        self.in_flight
            .take()
            .map(|_| ())
            .ok_or(QueuedWriteError::NothingQueued)
    }

    fn check(&self, handle: ConnectionHandle) -> Result<(), QueuedWriteError> {
        if !self.handle.is_valid() {
            return Err(QueuedWriteError::NotConnected);
        }
        if handle != self.handle {
            return Err(QueuedWriteError::StaleHandle);
        }
        Ok(())
    }
}
