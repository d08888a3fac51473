//! Fuzz target: `SessionConfig::from_postcard`
//!
//! Arbitrary flash contents must either be rejected or decode into a
//! configuration whose advertising payload fits the 31-byte limit.
//!
//! cargo fuzz run fuzz_config_blob

#![no_main]

use libfuzzer_sys::fuzz_target;
use periph_session::config::SessionConfig;
use periph_session::session::advertising::{MAX_ADV_PAYLOAD, build_adv_payload};

fuzz_target!(|data: &[u8]| {
    if let Ok(config) = SessionConfig::from_postcard(data) {
        let payload = build_adv_payload(&config.advertising).expect("validated config must encode");
        assert!(payload.len() <= MAX_ADV_PAYLOAD);
    }
});
