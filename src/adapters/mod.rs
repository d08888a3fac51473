//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter     | Implements       | Connects to                     |
//! |-------------|------------------|---------------------------------|
//! | `ble`       | LinkController   | Bluedroid GAP/GATTS, or sim     |
//! | `log_sink`  | EventSink        | Serial log output               |
//! | `entropy`   | RngCore          | Hardware RNG, or seeded PRNG    |
//! | `time`      | (clock)          | ESP32 system timer              |
//! | `device_id` | (identity)       | eFuse factory MAC               |
//!
//! The timer port is implemented in-crate by
//! [`TickTimerService`](crate::timer::TickTimerService).

pub mod ble;
pub mod device_id;
pub mod entropy;
pub mod log_sink;
pub mod time;
