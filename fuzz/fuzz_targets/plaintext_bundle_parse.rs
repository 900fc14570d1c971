#![no_main]

use keyward_core::bundle;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Decrypted payloads go through the same parser; it must reject, not panic.
    if let Ok(mut parsed) = bundle::deserialize(data) {
        let _ = bundle::serialize(&parsed);
        parsed.purge();
    }
});
