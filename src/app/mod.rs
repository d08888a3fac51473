//! Hexagonal boundary of the session core.
//!
//! - [`ports`]: traits the outside world implements (link controller,
//!   timer service, event sink).
//! - [`events`]: the typed event vocabulary crossing that boundary.

pub mod events;
pub mod ports;
