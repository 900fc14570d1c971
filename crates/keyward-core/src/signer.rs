//! Signing primitives
//!
//! Signers receive a [`SigningMaterial`] that borrows the raw key from a bundle
//! inside the exposure window, so a signer can never keep key material after
//! the window closes. No transaction encoding happens here.

use ed25519_dalek::{Signer as _, SigningKey};
use secp256k1::{Message, Secp256k1, SecretKey};
use thiserror::Error;

use crate::bundle::PlaintextBundle;
use crate::chains::{ChainId, Curve};
use crate::memory::SecretBytes;

/// Digest length accepted by [`Secp256k1DigestSigner`]
pub const DIGEST_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum SignerError {
    #[error("Signer for {expected} cannot sign with a {found} key")]
    ChainMismatch { expected: ChainId, found: ChainId },
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    #[error("No key for chain {0} in bundle")]
    MissingKey(ChainId),
    #[error("Signing failed: {0}")]
    Signing(String),
}

/// Borrowed private key for one chain.
pub struct SigningMaterial<'a> {
    chain: ChainId,
    private_key: &'a SecretBytes,
}

impl<'a> SigningMaterial<'a> {
    pub fn from_bundle(bundle: &'a PlaintextBundle, chain: ChainId) -> Result<Self, SignerError> {
        let record = bundle.record(chain).ok_or(SignerError::MissingKey(chain))?;
        Ok(Self {
            chain,
            private_key: record.private_key(),
        })
    }

    pub fn chain(&self) -> ChainId {
        self.chain
    }

    fn key_array(&self) -> Result<[u8; 32], SignerError> {
        self.private_key
            .as_slice()
            .try_into()
            .map_err(|_| SignerError::Signing("private key must be 32 bytes".to_string()))
    }
}

impl std::fmt::Debug for SigningMaterial<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningMaterial")
            .field("chain", &self.chain)
            .finish_non_exhaustive()
    }
}

/// Signs payloads with one chain's key.
pub trait ChainSigner: Send + Sync {
    fn chain(&self) -> ChainId;

    fn sign(&self, material: &SigningMaterial<'_>, payload: &[u8]) -> Result<Vec<u8>, SignerError>;
}

fn check_chain(signer: ChainId, material: &SigningMaterial<'_>) -> Result<(), SignerError> {
    if signer != material.chain {
        return Err(SignerError::ChainMismatch {
            expected: signer,
            found: material.chain,
        });
    }
    Ok(())
}

/// ECDSA over a precomputed 32-byte digest.
///
/// Output is the 65-byte compact recoverable form `r || s || v`, `v` in `0..=3`.
#[derive(Debug, Clone, Copy)]
pub struct Secp256k1DigestSigner {
    chain: ChainId,
}

impl Secp256k1DigestSigner {
    pub fn new(chain: ChainId) -> Result<Self, SignerError> {
        if chain.curve() != Curve::Secp256k1 {
            return Err(SignerError::Signing(format!(
                "{} keys are not secp256k1",
                chain
            )));
        }
        Ok(Self { chain })
    }
}

impl ChainSigner for Secp256k1DigestSigner {
    fn chain(&self) -> ChainId {
        self.chain
    }

    fn sign(&self, material: &SigningMaterial<'_>, payload: &[u8]) -> Result<Vec<u8>, SignerError> {
        check_chain(self.chain, material)?;
        if payload.len() != DIGEST_LEN {
            return Err(SignerError::InvalidPayload(format!(
                "expected a {}-byte digest, got {} bytes",
                DIGEST_LEN,
                payload.len()
            )));
        }

        let message = Message::from_digest_slice(payload)
            .map_err(|e| SignerError::InvalidPayload(e.to_string()))?;
        let mut secret = SecretKey::from_slice(material.private_key.as_slice())
            .map_err(|e| SignerError::Signing(e.to_string()))?;

        let signature = Secp256k1::signing_only().sign_ecdsa_recoverable(&message, &secret);
        secret.non_secure_erase();

        let (recovery_id, compact) = signature.serialize_compact();
        let mut out = Vec::with_capacity(65);
        out.extend_from_slice(&compact);
        out.push(recovery_id.to_i32() as u8);

        log::debug!("signed digest for {}", self.chain);
        Ok(out)
    }
}

/// Ed25519 over arbitrary bytes; 64-byte signature.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Signer;

impl ChainSigner for Ed25519Signer {
    fn chain(&self) -> ChainId {
        ChainId::Stellar
    }

    fn sign(&self, material: &SigningMaterial<'_>, payload: &[u8]) -> Result<Vec<u8>, SignerError> {
        check_chain(ChainId::Stellar, material)?;
        let mut seed = material.key_array()?;
        // SigningKey zeroizes itself on drop
        let key = SigningKey::from_bytes(&seed);
        zeroize::Zeroize::zeroize(&mut seed);

        let signature = key.sign(payload);
        log::debug!("signed {} byte payload for stellar", payload.len());
        Ok(signature.to_bytes().to_vec())
    }
}

/// The stock signer for a chain.
pub fn signer_for(chain: ChainId) -> Box<dyn ChainSigner> {
    match chain.curve() {
        Curve::Ed25519 => Box::new(Ed25519Signer),
        Curve::Secp256k1 => Box::new(Secp256k1DigestSigner { chain }),
    }
}
