//! Identity orchestration
//!
//! Ties the pieces together: generate or restore a seed, derive every chain,
//! encrypt, hand the envelope to a [`BundleStore`]. Every operation that needs
//! plaintext goes through [`lifecycle::with_plaintext`].

use std::collections::BTreeMap;

use thiserror::Error;

use crate::bundle::{BundleError, PlaintextBundle};
use crate::chains::ChainId;
use crate::crypto::{self, CryptoError, KdfParams};
use crate::keys::{self, KeyError};
use crate::lifecycle::{self, Credential};
use crate::passphrase::{Passphrase, StrengthReport, MIN_RECOMMENDED_LENGTH};
use crate::seed::{self, MasterSeed, SeedError};
use crate::signer::{ChainSigner, SignerError, SigningMaterial};
use crate::store::{BundleStore, IdentityId, SessionToken, StoreError};

#[derive(Error, Debug)]
pub enum VaultError {
    #[error(transparent)]
    Seed(#[from] SeedError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Bundle(#[from] BundleError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Signer(#[from] SignerError),
}

/// Public result of creating or restoring an identity.
#[derive(Debug, Clone)]
pub struct IdentityReceipt {
    pub identity: IdentityId,
    pub addresses: BTreeMap<ChainId, String>,
    /// Strength problems with the chosen passphrase; empty when it looked fine
    pub passphrase_warnings: Vec<String>,
}

/// Key bundles for many identities, persisted through `S`.
pub struct KeyVault<S: BundleStore> {
    store: S,
    kdf: KdfParams,
}

impl<S: BundleStore> KeyVault<S> {
    pub fn new(store: S) -> Self {
        Self::with_kdf(store, KdfParams::default())
    }

    pub fn with_kdf(store: S, kdf: KdfParams) -> Self {
        Self { store, kdf }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn kdf(&self) -> KdfParams {
        self.kdf
    }

    /// Generate a fresh identity.
    ///
    /// `backup` receives the mnemonic exactly once, after the envelope is
    /// stored, so the user can write it down. It is never returned.
    ///
    /// # Errors
    /// `StoreError::AlreadyExists` if `identity` is taken; the stored bundle is
    /// kept and `backup` is not called.
    pub fn create_identity<F>(
        &self,
        session: &SessionToken,
        identity: &str,
        passphrase: &Passphrase,
        backup: F,
    ) -> Result<IdentityReceipt, VaultError>
    where
        F: FnOnce(&str),
    {
        IdentityId::parse(identity)?;
        let master = seed::generate("")?;
        let receipt = self.seal_and_store(session, identity, &master, passphrase)?;
        backup(master.phrase());
        Ok(receipt)
    }

    /// Rebuild an identity from a written-down mnemonic.
    ///
    /// Like [`create_identity`](Self::create_identity), never replaces an
    /// existing identity.
    pub fn restore_identity(
        &self,
        session: &SessionToken,
        identity: &str,
        phrase: &str,
        passphrase: &Passphrase,
    ) -> Result<IdentityReceipt, VaultError> {
        IdentityId::parse(identity)?;
        let master = MasterSeed::from_phrase(phrase, "")?;
        self.seal_and_store(session, identity, &master, passphrase)
    }

    fn seal_and_store(
        &self,
        session: &SessionToken,
        identity: &str,
        master: &MasterSeed,
        passphrase: &Passphrase,
    ) -> Result<IdentityReceipt, VaultError> {
        let report = check_passphrase(passphrase);

        let mut bundle = keys::derive_bundle(master)?;
        let (envelope, addresses) = lifecycle::with_bundle(&mut bundle, |b| {
            crypto::encrypt_bundle(b, passphrase, &self.kdf).map(|e| (e, b.addresses()))
        })?;

        let id = self.store.insert(session, identity, &envelope)?;
        log::info!("sealed identity '{}' ({} chains)", id, addresses.len());

        Ok(IdentityReceipt {
            identity: id,
            addresses,
            passphrase_warnings: report.warnings,
        })
    }

    /// Run `op` against the identity's decrypted bundle.
    pub fn unlock<T, F>(
        &self,
        session: &SessionToken,
        identity: &str,
        passphrase: &Passphrase,
        op: F,
    ) -> Result<T, VaultError>
    where
        F: FnOnce(&PlaintextBundle) -> Result<T, VaultError>,
    {
        let envelope = self.store.fetch(session, identity)?;
        lifecycle::with_plaintext(&envelope, Credential::Passphrase(passphrase), op)
    }

    /// Sign `payload` with the identity's key for `signer.chain()`.
    pub fn sign(
        &self,
        session: &SessionToken,
        identity: &str,
        passphrase: &Passphrase,
        signer: &dyn ChainSigner,
        payload: &[u8],
    ) -> Result<Vec<u8>, VaultError> {
        self.unlock(session, identity, passphrase, |bundle| {
            let material = SigningMaterial::from_bundle(bundle, signer.chain())?;
            Ok(signer.sign(&material, payload)?)
        })
    }

    pub fn addresses(
        &self,
        session: &SessionToken,
        identity: &str,
        passphrase: &Passphrase,
    ) -> Result<BTreeMap<ChainId, String>, VaultError> {
        self.unlock(session, identity, passphrase, |bundle| Ok(bundle.addresses()))
    }

    /// Re-encrypt under `new` with a fresh salt and IV.
    ///
    /// The iteration count never goes down: it becomes the larger of the stored
    /// count and this vault's setting.
    pub fn rotate_passphrase(
        &self,
        session: &SessionToken,
        identity: &str,
        old: &Passphrase,
        new: &Passphrase,
    ) -> Result<Vec<String>, VaultError> {
        let report = check_passphrase(new);
        let envelope = self.store.fetch(session, identity)?;
        let params = KdfParams::new(envelope.iterations().max(self.kdf.iterations()))?;

        let rotated = lifecycle::with_plaintext(&envelope, Credential::Passphrase(old), |b| {
            crypto::encrypt_bundle(b, new, &params)
        })?;
        self.store.store(session, identity, &rotated)?;

        log::info!(
            "rotated passphrase for '{}' ({} -> {} iterations)",
            identity,
            envelope.iterations(),
            rotated.iterations()
        );
        Ok(report.warnings)
    }
}

/// Warn about weak passphrases; never refuse one.
fn check_passphrase(passphrase: &Passphrase) -> StrengthReport {
    let report = passphrase.strength();
    if passphrase.len() < MIN_RECOMMENDED_LENGTH || !report.is_recommended() {
        log::warn!(
            "weak passphrase ({}): {}",
            report.strength.description(),
            report.warnings.join("; ")
        );
    }
    report
}
