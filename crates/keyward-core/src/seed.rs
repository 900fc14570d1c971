//! BIP-39 master seed
//!
//! 128 bits of OS entropy encoded as 12 English words, plus the 64-byte seed
//! expansion (PBKDF2-HMAC-SHA512, 2048 rounds) the deriver walks from.

use bip39::{Language, Mnemonic};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroize;

use crate::memory::SecretBytes;

/// Entropy size for a 12-word mnemonic
pub const ENTROPY_LEN: usize = 16;

/// Words in a generated mnemonic
pub const WORD_COUNT: usize = 12;

/// BIP-39 seed length
pub const SEED_LEN: usize = 64;

#[derive(Error, Debug)]
pub enum SeedError {
    #[error("Secure random source unavailable")]
    EntropySourceUnavailable,
    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),
}

/// A mnemonic phrase together with its seed expansion.
///
/// Both halves live in [`SecretBytes`] and are wiped on drop.
#[derive(Debug)]
pub struct MasterSeed {
    phrase: SecretBytes,
    seed: SecretBytes,
}

impl MasterSeed {
    /// Restore from a written-down phrase.
    ///
    /// `extension` is the optional BIP-39 passphrase ("25th word"); pass `""` for none.
    pub fn from_phrase(words: &str, extension: &str) -> Result<Self, SeedError> {
        let mnemonic = parse_mnemonic(words)?;
        Ok(Self::from_mnemonic(&mnemonic, extension))
    }

    fn from_mnemonic(mnemonic: &Mnemonic, extension: &str) -> Self {
        let mut seed = mnemonic.to_seed(extension);
        let master = Self {
            phrase: phrase_bytes(mnemonic),
            seed: SecretBytes::from_slice(&seed),
        };
        seed.zeroize();
        master
    }

    /// The space-separated mnemonic words.
    pub fn phrase(&self) -> &str {
        self.phrase.as_str()
    }

    /// The 64-byte seed expansion.
    pub fn seed_bytes(&self) -> &[u8] {
        self.seed.as_slice()
    }

    pub fn word_count(&self) -> usize {
        self.phrase().split(' ').count()
    }

    pub(crate) fn phrase_secret(&self) -> &SecretBytes {
        &self.phrase
    }
}

/// Generate a fresh 12-word master seed.
///
/// # Errors
/// `EntropySourceUnavailable` if the OS RNG cannot be read.
pub fn generate(extension: &str) -> Result<MasterSeed, SeedError> {
    let mut entropy = [0u8; ENTROPY_LEN];
    OsRng
        .try_fill_bytes(&mut entropy)
        .map_err(|_| SeedError::EntropySourceUnavailable)?;

    let mnemonic = Mnemonic::from_entropy_in(Language::English, &entropy)
        .map_err(|e| SeedError::InvalidMnemonic(e.to_string()));
    entropy.zeroize();

    let master = MasterSeed::from_mnemonic(&mnemonic?, extension);
    log::debug!("generated {}-word master seed", master.word_count());
    Ok(master)
}

/// Parse a mnemonic from words
pub fn parse_mnemonic(words: &str) -> Result<Mnemonic, SeedError> {
    Mnemonic::parse_in(Language::English, words)
        .map_err(|e| SeedError::InvalidMnemonic(e.to_string()))
}

/// Build the phrase directly in a fixed-size secret buffer, without an
/// intermediate `String`.
fn phrase_bytes(mnemonic: &Mnemonic) -> SecretBytes {
    let len = mnemonic.words().map(str::len).sum::<usize>() + mnemonic.word_count() - 1;
    let mut phrase = SecretBytes::zeroed(len);
    let buf = phrase.as_mut_slice();

    let mut pos = 0;
    for (i, word) in mnemonic.words().enumerate() {
        if i > 0 {
            buf[pos] = b' ';
            pos += 1;
        }
        buf[pos..pos + word.len()].copy_from_slice(word.as_bytes());
        pos += word.len();
    }
    phrase
}
