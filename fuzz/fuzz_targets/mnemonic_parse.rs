#![no_main]

use keyward_core::seed::{parse_mnemonic, MasterSeed};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Arbitrary text must parse to Ok or Err, never panic.
    if let Ok(s) = std::str::from_utf8(data) {
        if parse_mnemonic(s).is_ok() {
            // Anything that parses also expands to a seed.
            let _ = MasterSeed::from_phrase(s, "");
        }
    }
});
