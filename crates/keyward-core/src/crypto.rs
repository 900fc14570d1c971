//! Envelope encryption for key bundles
//!
//! Passphrase-based encryption using PBKDF2-HMAC-SHA256 + AES-256-GCM.
//!
//! # Security Notes
//!
//! - Every encryption draws a fresh 32-byte salt and 16-byte IV from the OS CSPRNG
//! - The iteration count is stored in the envelope and enforced against a floor
//! - Every authentication failure is the same `DecryptionFailed`, whatever the cause
//! - Passphrase, key-encryption key and plaintext are never logged

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Key, Nonce, Tag};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::Hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::bundle::{self, PlaintextBundle};
use crate::passphrase::Passphrase;

/// AES-256-GCM with a 128-bit IV
type BundleCipher = AesGcm<Aes256, U16>;

/// Envelope format version
pub const ENVELOPE_VERSION: &str = "1.0";

pub const KDF_ALGORITHM: &str = "PBKDF2-SHA256";
pub const CIPHER_ALGORITHM: &str = "AES-256-GCM";

/// Lowest accepted PBKDF2 iteration count, and the default.
pub const MIN_ITERATIONS: u32 = 100_000;
/// Stored counts above this are refused before any key stretching runs
pub const MAX_ITERATIONS: u32 = 10_000_000;

pub const SALT_LEN: usize = 32;
pub const IV_LEN: usize = 16;
pub const TAG_LEN: usize = 16;
pub const KEY_LEN: usize = 32;
const KEY_BITS: u32 = (KEY_LEN * 8) as u32;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Decryption failed: invalid passphrase or corrupted key bundle")]
    DecryptionFailed,
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),
    #[error("Iteration count {found} is below the minimum of {minimum}")]
    IterationsBelowMinimum { found: u32, minimum: u32 },
    #[error("Iteration count {found} is above the maximum of {maximum}")]
    IterationsAboveMaximum { found: u32, maximum: u32 },
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),
    #[error("Secure random source unavailable")]
    EntropySourceUnavailable,
}

/// Key-stretching parameters for new envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    iterations: u32,
}

impl KdfParams {
    /// # Errors
    /// `IterationsBelowMinimum` below [`MIN_ITERATIONS`], `IterationsAboveMaximum`
    /// above [`MAX_ITERATIONS`].
    pub fn new(iterations: u32) -> Result<Self, CryptoError> {
        check_iterations(iterations)?;
        Ok(Self { iterations })
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: MIN_ITERATIONS,
        }
    }
}

/// Public description of how the envelope key was derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DerivationMetadata {
    pub algorithm: String,
    pub iterations: u32,
    pub key_size: u32,
    pub encryption: String,
}

/// Encrypted key bundle, safe to store or transmit.
///
/// Wire layout:
/// ```json
/// {
///   "version": "1.0",
///   "encrypted_data": "<base64>",
///   "salt": "<hex, 32 bytes>",
///   "iv": "<hex, 16 bytes>",
///   "auth_tag": "<hex, 16 bytes>" | null,
///   "derivation_metadata": {
///     "algorithm": "PBKDF2-SHA256",
///     "iterations": 100000,
///     "key_size": 256,
///     "encryption": "AES-256-GCM"
///   }
/// }
/// ```
///
/// A `null` tag means the last 16 bytes of `encrypted_data` are the tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EncryptedBundle {
    pub version: String,
    pub encrypted_data: String,
    pub salt: String,
    pub iv: String,
    pub auth_tag: Option<String>,
    pub derivation_metadata: DerivationMetadata,
}

/// Decoded binary fields of a structurally valid envelope
struct ParsedEnvelope {
    salt: [u8; SALT_LEN],
    iv: [u8; IV_LEN],
    ciphertext: Vec<u8>,
    tag: [u8; TAG_LEN],
    iterations: u32,
}

impl EncryptedBundle {
    pub fn iterations(&self) -> u32 {
        self.derivation_metadata.iterations
    }

    pub fn to_json(&self) -> Result<String, CryptoError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| CryptoError::MalformedEnvelope(e.to_string()))
    }

    /// Parse and structurally validate an envelope.
    pub fn from_json(json: &str) -> Result<Self, CryptoError> {
        let envelope: Self = serde_json::from_str(json)
            .map_err(|e| CryptoError::MalformedEnvelope(e.to_string()))?;
        envelope.validate()?;
        Ok(envelope)
    }

    /// Check everything that can be checked without the passphrase.
    pub fn validate(&self) -> Result<(), CryptoError> {
        self.parse().map(|_| ())
    }

    fn parse(&self) -> Result<ParsedEnvelope, CryptoError> {
        let meta = &self.derivation_metadata;
        if self.version != ENVELOPE_VERSION {
            return Err(malformed(format!("unknown version '{}'", self.version)));
        }
        if meta.algorithm != KDF_ALGORITHM {
            return Err(malformed(format!("unsupported KDF '{}'", meta.algorithm)));
        }
        if meta.encryption != CIPHER_ALGORITHM {
            return Err(malformed(format!("unsupported cipher '{}'", meta.encryption)));
        }
        if meta.key_size != KEY_BITS {
            return Err(malformed(format!("unsupported key size {}", meta.key_size)));
        }
        check_iterations(meta.iterations)?;

        let salt = decode_hex_array::<SALT_LEN>("salt", &self.salt)?;
        let iv = decode_hex_array::<IV_LEN>("iv", &self.iv)?;
        let mut ciphertext = STANDARD
            .decode(&self.encrypted_data)
            .map_err(|_| malformed("encrypted_data is not valid base64".to_string()))?;

        let tag = match &self.auth_tag {
            Some(tag) => decode_hex_array::<TAG_LEN>("auth_tag", tag)?,
            None => {
                // Combined layout: ciphertext || tag
                let split = ciphertext.len().checked_sub(TAG_LEN).ok_or_else(|| {
                    malformed("encrypted_data too short to carry a tag".to_string())
                })?;
                let mut tag = [0u8; TAG_LEN];
                tag.copy_from_slice(&ciphertext[split..]);
                ciphertext.truncate(split);
                tag
            }
        };

        Ok(ParsedEnvelope {
            salt,
            iv,
            ciphertext,
            tag,
            iterations: meta.iterations,
        })
    }
}

/// 256-bit key derived from a passphrase and one envelope's salt.
///
/// Zeroized on drop. Never cached; derive it, use it, let it go.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct KeyEncryptionKey([u8; KEY_LEN]);

impl std::fmt::Debug for KeyEncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyEncryptionKey([REDACTED])")
    }
}

fn malformed(reason: String) -> CryptoError {
    CryptoError::MalformedEnvelope(reason)
}

fn check_iterations(iterations: u32) -> Result<(), CryptoError> {
    if iterations < MIN_ITERATIONS {
        return Err(CryptoError::IterationsBelowMinimum {
            found: iterations,
            minimum: MIN_ITERATIONS,
        });
    }
    if iterations > MAX_ITERATIONS {
        return Err(CryptoError::IterationsAboveMaximum {
            found: iterations,
            maximum: MAX_ITERATIONS,
        });
    }
    Ok(())
}

fn decode_hex_array<const N: usize>(field: &str, value: &str) -> Result<[u8; N], CryptoError> {
    let mut out = [0u8; N];
    hex::decode_to_slice(value, &mut out)
        .map_err(|_| malformed(format!("{} must be {} bytes of hex", field, N)))?;
    Ok(out)
}

/// PBKDF2-HMAC-SHA256 stretch of the passphrase
fn derive_kek(
    passphrase: &[u8],
    salt: &[u8; SALT_LEN],
    iterations: u32,
) -> Result<KeyEncryptionKey, CryptoError> {
    check_iterations(iterations)?;

    let mut kek = KeyEncryptionKey([0u8; KEY_LEN]);
    pbkdf2::pbkdf2::<Hmac<Sha256>>(passphrase, salt, iterations, &mut kek.0)
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;

    log::debug!("derived key-encryption key ({} iterations)", iterations);
    Ok(kek)
}

fn cipher(kek: &KeyEncryptionKey) -> BundleCipher {
    BundleCipher::new(Key::<BundleCipher>::from_slice(&kek.0))
}

/// Derive the key-encryption key for `envelope` once, for use with
/// [`decrypt_with_key`] inside a single scope.
pub fn derive_key_encryption_key(
    passphrase: &Passphrase,
    envelope: &EncryptedBundle,
) -> Result<KeyEncryptionKey, CryptoError> {
    let parsed = envelope.parse()?;
    derive_kek(passphrase.as_bytes(), &parsed.salt, parsed.iterations)
}

/// Encrypt arbitrary bytes under a passphrase.
///
/// Each call generates a new random salt and IV.
pub fn encrypt(
    plaintext: &[u8],
    passphrase: &Passphrase,
    params: &KdfParams,
) -> Result<EncryptedBundle, CryptoError> {
    let mut salt = [0u8; SALT_LEN];
    let mut iv = [0u8; IV_LEN];
    OsRng
        .try_fill_bytes(&mut salt)
        .and_then(|_| OsRng.try_fill_bytes(&mut iv))
        .map_err(|_| CryptoError::EntropySourceUnavailable)?;

    seal_with(plaintext, passphrase, params.iterations, &salt, &iv)
}

fn seal_with(
    plaintext: &[u8],
    passphrase: &Passphrase,
    iterations: u32,
    salt: &[u8; SALT_LEN],
    iv: &[u8; IV_LEN],
) -> Result<EncryptedBundle, CryptoError> {
    let kek = derive_kek(passphrase.as_bytes(), salt, iterations)?;

    let mut buffer = Zeroizing::new(plaintext.to_vec());
    let tag = cipher(&kek)
        .encrypt_in_place_detached(Nonce::<U16>::from_slice(iv), b"", buffer.as_mut_slice())
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    log::debug!("sealed {} byte payload", plaintext.len());

    Ok(EncryptedBundle {
        version: ENVELOPE_VERSION.to_string(),
        encrypted_data: STANDARD.encode(buffer.as_slice()),
        salt: hex::encode(salt),
        iv: hex::encode(iv),
        auth_tag: Some(hex::encode(tag)),
        derivation_metadata: DerivationMetadata {
            algorithm: KDF_ALGORITHM.to_string(),
            iterations,
            key_size: KEY_BITS,
            encryption: CIPHER_ALGORITHM.to_string(),
        },
    })
}

/// Decrypt an envelope with a passphrase.
///
/// The stored iteration count is used, not the current default.
///
/// # Errors
/// `MalformedEnvelope` / `IterationsBelowMinimum` for structural problems,
/// `DecryptionFailed` for everything the passphrase could influence.
pub fn decrypt(
    envelope: &EncryptedBundle,
    passphrase: &Passphrase,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let parsed = envelope.parse()?;
    let kek = derive_kek(passphrase.as_bytes(), &parsed.salt, parsed.iterations)?;
    open(parsed, &kek)
}

/// Decrypt with a key previously derived by [`derive_key_encryption_key`].
pub fn decrypt_with_key(
    envelope: &EncryptedBundle,
    kek: &KeyEncryptionKey,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    open(envelope.parse()?, kek)
}

fn open(parsed: ParsedEnvelope, kek: &KeyEncryptionKey) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let mut buffer = Zeroizing::new(parsed.ciphertext);
    cipher(kek)
        .decrypt_in_place_detached(
            Nonce::<U16>::from_slice(&parsed.iv),
            b"",
            buffer.as_mut_slice(),
            Tag::<U16>::from_slice(&parsed.tag),
        )
        .map_err(|_| CryptoError::DecryptionFailed)?;
    Ok(buffer)
}

/// Serialize and encrypt a bundle.
pub fn encrypt_bundle(
    plaintext: &PlaintextBundle,
    passphrase: &Passphrase,
    params: &KdfParams,
) -> Result<EncryptedBundle, CryptoError> {
    let bytes = bundle::serialize(plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
    let envelope = encrypt(&bytes, passphrase, params)?;
    log::info!(
        "encrypted key bundle ({} chains, {} iterations)",
        plaintext.len(),
        params.iterations
    );
    Ok(envelope)
}

/// Decrypt and parse a bundle.
///
/// A payload that authenticates but does not parse is reported as
/// `DecryptionFailed`, like any other failure past the structural checks.
pub fn decrypt_bundle(
    envelope: &EncryptedBundle,
    passphrase: &Passphrase,
) -> Result<PlaintextBundle, CryptoError> {
    let bytes = decrypt(envelope, passphrase)?;
    bundle::deserialize(&bytes).map_err(|_| CryptoError::DecryptionFailed)
}

pub fn decrypt_bundle_with_key(
    envelope: &EncryptedBundle,
    kek: &KeyEncryptionKey,
) -> Result<PlaintextBundle, CryptoError> {
    let bytes = decrypt_with_key(envelope, kek)?;
    bundle::deserialize(&bytes).map_err(|_| CryptoError::DecryptionFailed)
}
