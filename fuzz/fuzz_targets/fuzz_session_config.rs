#![no_main]
//! Fuzz target for session-config parsing
//!
//! Feeds random bytes as JSON to the session deserializer to find panics
//! or unexpected behavior; loading must always degrade to defaults.

use libfuzzer_sys::fuzz_target;

use terminal::SessionConfig;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(doc) = serde_json::from_str::<serde_json::Value>(s) {
            // Must never panic, whatever the document shape is.
            let config = SessionConfig::from_json(&doc);
            let _ = config.to_json();
        }
    }
});
