//! Passphrases and strength warnings
//!
//! A [`Passphrase`] holds the user's secret in a [`SecretBytes`] buffer so it
//! never lives in an ordinary `String` past construction.
//!
//! Strength estimation is a **warning system**, not a gate. A short or weak
//! passphrase is logged and accepted.
//!
//! | Level     | Bits   |
//! |-----------|--------|
//! | Dangerous | < 28   |
//! | Weak      | 28–35  |
//! | Fair      | 36–59  |
//! | Strong    | ≥ 60   |

use std::fmt;

use zeroize::{Zeroize, Zeroizing};

use crate::memory::SecretBytes;

/// Shorter passphrases get a warning
pub const MIN_RECOMMENDED_LENGTH: usize = 12;

/// Minimum recommended estimate, in bits
pub const MIN_RECOMMENDED_ENTROPY: f64 = 60.0;

/// Words that make a passphrase easy to guess for a wallet
const COMMON_WORDS: &[&str] = &[
    "password",
    "123456",
    "qwerty",
    "letmein",
    "iloveyou",
    "admin",
    "welcome",
    "wallet",
    "crypto",
    "bitcoin",
    "ethereum",
    "stellar",
    "ripple",
    "xrp",
    "metal",
    "keyward",
    "mnemonic",
    "seed",
    "moon",
];

/// The user's encryption passphrase.
pub struct Passphrase(SecretBytes);

impl Passphrase {
    /// Take ownership of `text`; the source `String` is zeroized.
    pub fn new(mut text: String) -> Self {
        let secret = SecretBytes::from_slice(text.as_bytes());
        text.zeroize();
        Self(secret)
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(SecretBytes::from_slice(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Estimate strength. Non-UTF-8 input is scored as raw bytes.
    pub fn strength(&self) -> StrengthReport {
        match std::str::from_utf8(self.as_bytes()) {
            Ok(text) => estimate_strength(text),
            Err(_) => estimate_raw(self.as_bytes()),
        }
    }
}

impl From<&str> for Passphrase {
    fn from(text: &str) -> Self {
        Self::from_bytes(text.as_bytes())
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passphrase([REDACTED])")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Strength {
    Dangerous,
    Weak,
    Fair,
    Strong,
}

impl Strength {
    fn from_bits(bits: f64) -> Self {
        if bits < 28.0 {
            Strength::Dangerous
        } else if bits < 36.0 {
            Strength::Weak
        } else if bits < MIN_RECOMMENDED_ENTROPY {
            Strength::Fair
        } else {
            Strength::Strong
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Strength::Dangerous => "dangerous, trivially brute-forced",
            Strength::Weak => "weak, vulnerable to a targeted attack",
            Strength::Fair => "fair, not recommended for key bundles",
            Strength::Strong => "strong",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StrengthReport {
    pub entropy_bits: f64,
    pub strength: Strength,
    /// Human-readable problems; never contains passphrase text
    pub warnings: Vec<String>,
}

impl StrengthReport {
    pub fn is_recommended(&self) -> bool {
        self.strength == Strength::Strong
    }
}

/// Estimate passphrase entropy from character classes, with penalties for
/// common words, repetition and runs.
pub fn estimate_strength(text: &str) -> StrengthReport {
    let mut warnings = Vec::new();
    let chars: Zeroizing<Vec<char>> = Zeroizing::new(text.chars().collect());

    if chars.is_empty() {
        return StrengthReport {
            entropy_bits: 0.0,
            strength: Strength::Dangerous,
            warnings: vec!["passphrase is empty".to_string()],
        };
    }

    let lower = Zeroizing::new(text.to_lowercase());
    if COMMON_WORDS.iter().any(|w| lower.contains(w)) {
        warnings.push("contains a common or wallet-related word".to_string());
    }

    let mut classes = [false; 5];
    for c in chars.iter() {
        let class = if c.is_ascii_lowercase() {
            0
        } else if c.is_ascii_uppercase() {
            1
        } else if c.is_ascii_digit() {
            2
        } else if c.is_ascii_punctuation() || *c == ' ' {
            3
        } else {
            4
        };
        classes[class] = true;
    }
    let charset: f64 = [26.0, 26.0, 10.0, 33.0, 100.0]
        .iter()
        .zip(classes.iter())
        .filter(|(_, present)| **present)
        .map(|(size, _)| size)
        .sum();

    let len = chars.len() as f64;
    let mut bits = len * charset.max(1.0).log2();

    let mut sorted = Zeroizing::new(chars.to_vec());
    sorted.sort_unstable();
    sorted.dedup();
    let unique_ratio = sorted.len() as f64 / len;
    if unique_ratio < 0.5 {
        bits -= (1.0 - unique_ratio) * bits * 0.3;
        warnings.push("too many repeated characters".to_string());
    }

    let runs = count_runs(&chars);
    if runs > 2 {
        bits -= runs as f64 * 2.0;
        warnings.push("contains sequential runs".to_string());
    }

    let words = text.split_whitespace().count();
    if words >= 4 {
        bits += (words as f64 - 3.0) * 3.0;
    }

    if chars.len() < MIN_RECOMMENDED_LENGTH {
        warnings.push(format!(
            "shorter than {} characters",
            MIN_RECOMMENDED_LENGTH
        ));
    }

    let bits = bits.max(0.0);
    StrengthReport {
        entropy_bits: bits,
        strength: Strength::from_bits(bits),
        warnings,
    }
}

fn estimate_raw(bytes: &[u8]) -> StrengthReport {
    let bits = bytes.len() as f64 * 8.0;
    let mut warnings = Vec::new();
    if bytes.len() < MIN_RECOMMENDED_LENGTH {
        warnings.push(format!(
            "shorter than {} characters",
            MIN_RECOMMENDED_LENGTH
        ));
    }
    StrengthReport {
        entropy_bits: bits,
        strength: Strength::from_bits(bits),
        warnings,
    }
}

/// Ascending or descending runs of three code points (`abc`, `321`).
fn count_runs(chars: &[char]) -> usize {
    chars
        .windows(3)
        .filter(|w| {
            let (a, b, c) = (w[0] as i64, w[1] as i64, w[2] as i64);
            (b - a == 1 && c - b == 1) || (a - b == 1 && b - c == 1)
        })
        .count()
}
