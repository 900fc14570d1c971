//! Keyward Core
//!
//! Client-side key bundles for several chains, all derived from one mnemonic.
//!
//! # Key Derivation
//!
//! From a single BIP-39 seed:
//! - XRPL via BIP-32: m/44'/144'/0'/0/0
//! - Metal L2 (EVM) via BIP-32: m/44'/60'/0'/0/0
//! - Stellar via SLIP-0010: m/44'/148'/0'
//! - XPR Network via BIP-32: m/44'/570'/0'/0/0
//!
//! # Encrypted Storage
//!
//! Bundles are encrypted at rest using PBKDF2-HMAC-SHA256 + AES-256-GCM and only
//! decrypted inside [`lifecycle::with_plaintext`], which purges them on exit.

pub mod bundle;
pub mod chains;
pub mod crypto;
pub mod keys;
pub mod lifecycle;
pub mod memory;
pub mod passphrase;
pub mod seed;
pub mod signer;
pub mod store;
pub mod vault;

pub use bundle::{BundleError, ChainKeyRecord, PlaintextBundle};
pub use chains::ChainId;
pub use crypto::{
    decrypt, decrypt_bundle, encrypt, encrypt_bundle, CryptoError, EncryptedBundle, KdfParams,
    KeyEncryptionKey,
};
pub use keys::{derive_bundle, derive_chain, derive_chains, DerivationPath, KeyError};
pub use lifecycle::{with_bundle, with_plaintext, Credential};
pub use passphrase::Passphrase;
pub use seed::{generate, MasterSeed, SeedError};
pub use store::{BundleStore, FileStore, IdentityId, MemoryStore, SessionToken, StoreError};
pub use vault::{IdentityReceipt, KeyVault, VaultError};
