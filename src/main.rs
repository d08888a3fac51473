//! Peripheral session firmware, main entry point.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  BleLinkAdapter     LogEventSink    EntropySource  MonoClock   │
//! │  (LinkController)   (EventSink)     (RngCore)      (elapsed)   │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │              Session (pure logic)                      │    │
//! │  │  Advertising · Connection supervision · Address        │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  TickTimerService · EventMailbox (callback → main loop)        │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use anyhow::{Context, Result};
use log::info;

use periph_session::adapters::ble::{BleLinkAdapter, LINK_EVENTS};
use periph_session::adapters::device_id;
use periph_session::adapters::entropy::EntropySource;
use periph_session::adapters::log_sink::LogEventSink;
use periph_session::adapters::time::MonotonicClock;
use periph_session::config::SessionConfig;
use periph_session::session::Session;
use periph_session::timer::TickTimerService;

/// Main loop period.
const LOOP_INTERVAL_MS: u64 = 50;

const HEARTBEAT_SECS: u64 = 60;

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("periph-session v{}", env!("CARGO_PKG_VERSION"));

    // ── 2. Identity and configuration ─────────────────────────
    let mac = device_id::read_mac();
    let mut config = SessionConfig::default();
    config.advertising.device_name = device_id::device_name(&mac);
    info!("Device name: {}", config.advertising.device_name);

    // ── 3. Adapters ───────────────────────────────────────────
    let mut ble = BleLinkAdapter::new(&LINK_EVENTS);
    ble.init(config.advertising.device_name.as_str())
        .map_err(anyhow::Error::msg)
        .context("BLE init failed")?;

    let mut session = Session::new(
        ble,
        TickTimerService::new(),
        LogEventSink::new(),
        EntropySource::new(),
    );

    // ── 4. Session startup ────────────────────────────────────
    session
        .initialize_with(config)
        .map_err(anyhow::Error::msg)
        .context("session configuration rejected")?;
    session
        .begin_session()
        .map_err(anyhow::Error::msg)
        .context("session start failed")?;

    info!("Session running. Entering event loop.");

    // ── 5. Event loop ─────────────────────────────────────────
    let mut clock = MonotonicClock::new();
    let mut last_heartbeat = 0;
    loop {
        std::thread::sleep(std::time::Duration::from_millis(LOOP_INTERVAL_MS));

        session.link_mut().poll();
        session.run_once(&LINK_EVENTS, clock.elapsed());

        let uptime = clock.uptime_secs();
        if uptime >= last_heartbeat + HEARTBEAT_SECS {
            last_heartbeat = uptime;
            info!(
                "Heartbeat: up {}s, {:?}, mailbox drops {}",
                uptime,
                session.current_state(),
                LINK_EVENTS.dropped()
            );
        }
    }
}
