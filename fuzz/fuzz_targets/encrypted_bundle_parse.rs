#![no_main]

use keyward_core::crypto::EncryptedBundle;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Envelope JSON from disk or the wire: structural checks must never panic.
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(envelope) = EncryptedBundle::from_json(s) {
        // Whatever validated re-serializes and validates again.
        if let Ok(json) = envelope.to_json() {
            assert!(EncryptedBundle::from_json(&json).is_ok());
        }
    }
});
