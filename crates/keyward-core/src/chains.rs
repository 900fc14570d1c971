//! Chain registry
//!
//! The supported chains are a closed, audited set. Each [`ChainId`] maps to one
//! canonical derivation path, a curve, and the chain's own rule for turning a
//! private key into a public identifier.
//!
//! | Chain      | Curve     | Path                | Address                         |
//! |------------|-----------|---------------------|---------------------------------|
//! | `xrpl`     | secp256k1 | `m/44'/144'/0'/0/0` | base58 (Ripple alphabet) `r…`   |
//! | `metal_l2` | secp256k1 | `m/44'/60'/0'/0/0`  | EIP-55 Keccak-256 `0x…`         |
//! | `stellar`  | Ed25519   | `m/44'/148'/0'`     | strkey `G…` (SEP-0005)          |
//! | `xpr`      | secp256k1 | `m/44'/570'/0'/0/0` | EOSIO K1 `PUB_K1_…`             |
//!
//! Adding a chain means adding a variant here, its path, and its encoder.

use std::fmt;
use std::str::FromStr;

use bitcoin::hashes::{hash160, ripemd160, sha256d, Hash, HashEngine};
use crc::{Crc, CRC_16_XMODEM};
use data_encoding::BASE32_NOPAD;
use ed25519_dalek::SigningKey;
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use zeroize::Zeroize;

use crate::keys::KeyError;
use crate::memory::SecretBytes;

/// XRPL classic address type prefix
const XRPL_ACCOUNT_PREFIX: u8 = 0x00;

/// Stellar strkey version bytes
const STELLAR_ACCOUNT_ID: u8 = 6 << 3;
const STELLAR_SEED: u8 = 18 << 3;

const STELLAR_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// EOSIO K1 key-type suffix mixed into the checksum
const EOSIO_K1_SUFFIX: &[u8] = b"K1";

/// Signature scheme a chain's keys live on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Curve {
    /// BIP-32 derivation, ECDSA keys
    Secp256k1,
    /// SLIP-0010 derivation, hardened only
    Ed25519,
}

/// Supported chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainId {
    Xrpl,
    /// EVM-compatible L2
    MetalL2,
    Stellar,
    /// XPR Network (EOSIO-family)
    Xpr,
}

impl ChainId {
    /// Every registered chain, in registry order.
    pub const ALL: [ChainId; 4] = [
        ChainId::Xrpl,
        ChainId::MetalL2,
        ChainId::Stellar,
        ChainId::Xpr,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ChainId::Xrpl => "xrpl",
            ChainId::MetalL2 => "metal_l2",
            ChainId::Stellar => "stellar",
            ChainId::Xpr => "xpr",
        }
    }

    /// Canonical derivation path
    pub fn derivation_path(self) -> &'static str {
        match self {
            ChainId::Xrpl => "m/44'/144'/0'/0/0",
            ChainId::MetalL2 => "m/44'/60'/0'/0/0",
            ChainId::Stellar => "m/44'/148'/0'",
            ChainId::Xpr => "m/44'/570'/0'/0/0",
        }
    }

    pub fn curve(self) -> Curve {
        match self {
            ChainId::Stellar => Curve::Ed25519,
            ChainId::Xrpl | ChainId::MetalL2 | ChainId::Xpr => Curve::Secp256k1,
        }
    }

    /// Turn a raw 32-byte private key into this chain's public material.
    pub fn encode(self, private_key: &[u8]) -> Result<ChainEncoding, KeyError> {
        match self {
            ChainId::Xrpl => {
                let public = secp256k1_public(private_key)?;
                Ok(ChainEncoding {
                    public_key: public.serialize().to_vec(),
                    address: xrpl_address(&public),
                    secret: None,
                })
            }
            ChainId::MetalL2 => {
                let public = secp256k1_public(private_key)?;
                Ok(ChainEncoding {
                    public_key: public.serialize().to_vec(),
                    address: evm_address(&public),
                    secret: None,
                })
            }
            ChainId::Stellar => {
                let seed: &[u8; 32] = private_key.try_into().map_err(|_| {
                    KeyError::DerivationFailed("Ed25519 seed must be 32 bytes".to_string())
                })?;
                let public = SigningKey::from_bytes(seed).verifying_key().to_bytes();
                Ok(ChainEncoding {
                    public_key: public.to_vec(),
                    address: stellar_strkey(STELLAR_ACCOUNT_ID, &public),
                    secret: Some(SecretBytes::from_vec(
                        stellar_strkey(STELLAR_SEED, seed).into_bytes(),
                    )),
                })
            }
            ChainId::Xpr => {
                let public = secp256k1_public(private_key)?;
                Ok(ChainEncoding {
                    public_key: public.serialize().to_vec(),
                    address: eosio_k1("PUB_K1_", &public.serialize()),
                    secret: Some(SecretBytes::from_vec(
                        eosio_k1("PVT_K1_", private_key).into_bytes(),
                    )),
                })
            }
        }
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ChainId {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChainId::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| KeyError::UnsupportedChain(s.to_string()))
    }
}

/// Public material derived from one chain key.
pub struct ChainEncoding {
    pub public_key: Vec<u8>,
    /// Chain-native public identifier
    pub address: String,
    /// Chain-native secret encoding, where the chain has one distinct from raw hex
    pub secret: Option<SecretBytes>,
}

fn secp256k1_public(private_key: &[u8]) -> Result<PublicKey, KeyError> {
    let secret = SecretKey::from_slice(private_key)
        .map_err(|e| KeyError::DerivationFailed(e.to_string()))?;
    Ok(PublicKey::from_secret_key(&Secp256k1::signing_only(), &secret))
}

/// `r…` classic address: base58check(0x00 || HASH160(pubkey)) in the Ripple alphabet.
fn xrpl_address(public: &PublicKey) -> String {
    let mut payload = Vec::with_capacity(25);
    payload.push(XRPL_ACCOUNT_PREFIX);
    payload.extend_from_slice(&hash160::Hash::hash(&public.serialize()).to_byte_array());
    let checksum = sha256d::Hash::hash(&payload).to_byte_array();
    payload.extend_from_slice(&checksum[..4]);

    bs58::encode(payload)
        .with_alphabet(bs58::Alphabet::RIPPLE)
        .into_string()
}

/// EIP-55 mixed-case address from the Keccak-256 of the uncompressed key.
fn evm_address(public: &PublicKey) -> String {
    let uncompressed = public.serialize_uncompressed();
    let digest = Keccak256::digest(&uncompressed[1..]);
    let lower = hex::encode(&digest[12..]);

    let checksum = Keccak256::digest(lower.as_bytes());
    let mixed: String = lower
        .char_indices()
        .map(|(i, c)| {
            let shift = if i % 2 == 0 { 4 } else { 0 };
            let nibble = (checksum[i / 2] >> shift) & 0x0f;
            if c.is_ascii_alphabetic() && nibble >= 8 {
                c.to_ascii_uppercase()
            } else {
                c
            }
        })
        .collect();

    format!("0x{}", mixed)
}

/// strkey: base32(version || payload || crc16-xmodem little-endian), unpadded.
fn stellar_strkey(version: u8, payload: &[u8]) -> String {
    let mut raw = Vec::with_capacity(payload.len() + 3);
    raw.push(version);
    raw.extend_from_slice(payload);
    let crc = STELLAR_CRC.checksum(&raw);
    raw.extend_from_slice(&crc.to_le_bytes());

    let encoded = BASE32_NOPAD.encode(&raw);
    raw.zeroize();
    encoded
}

/// EOSIO K1 key string: prefix + base58(key || ripemd160(key || "K1")[..4]).
fn eosio_k1(prefix: &str, key: &[u8]) -> String {
    let mut engine = ripemd160::Hash::engine();
    engine.input(key);
    engine.input(EOSIO_K1_SUFFIX);
    let checksum = ripemd160::Hash::from_engine(engine).to_byte_array();

    let mut raw = Vec::with_capacity(key.len() + 4);
    raw.extend_from_slice(key);
    raw.extend_from_slice(&checksum[..4]);

    let encoded = format!("{}{}", prefix, bs58::encode(&raw).into_string());
    raw.zeroize();
    encoded
}
