//! End-to-end lifecycle through the public API.
//!
//! 1. Derive a bundle and seal it under a passphrase
//! 2. Open it inside the exposure window; purge holds on every exit path
//! 3. Independent identities derive and seal concurrently without interference

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use keyward_core::signer::{signer_for, SigningMaterial};
use keyward_core::{
    derive_bundle, encrypt_bundle, with_bundle, with_plaintext, BundleStore, ChainId, Credential,
    CryptoError, KdfParams, KeyVault, MasterSeed, MemoryStore, Passphrase, PlaintextBundle, SessionToken,
};

const ABANDON: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
const PASS: &str = "granite-orchard-lantern-41";

fn abandon() -> MasterSeed {
    MasterSeed::from_phrase(ABANDON, "").unwrap()
}

/// Every sensitive leaf, copied out so it can be compared after a purge.
fn snapshot(bundle: &PlaintextBundle) -> Vec<Vec<u8>> {
    let mut leaves = vec![bundle.master_seed().as_slice().to_vec()];
    for (_, record) in bundle.records() {
        leaves.push(record.private_key().as_slice().to_vec());
        if let Some(secret) = record.secret() {
            leaves.push(secret.as_slice().to_vec());
        }
    }
    leaves
}

fn assert_fully_purged(before: &[Vec<u8>], bundle: &PlaintextBundle) {
    let after = snapshot(bundle);
    assert_eq!(before.len(), after.len());
    for (old, new) in before.iter().zip(&after) {
        assert_eq!(old.len(), new.len());
        assert_ne!(old, new);
    }
}

#[test]
fn seal_then_open_in_window() {
    let mut bundle = derive_bundle(&abandon()).unwrap();
    let expected = bundle.addresses();
    let envelope = with_bundle(&mut bundle, |b| {
        encrypt_bundle(b, &Passphrase::from(PASS), &KdfParams::default())
    })
    .unwrap();

    let passphrase = Passphrase::from(PASS);
    let signature = with_plaintext(&envelope, Credential::from(&passphrase), |b| {
        assert_eq!(b.addresses(), expected);
        let material = SigningMaterial::from_bundle(b, ChainId::Stellar)?;
        Ok::<_, Box<dyn std::error::Error>>(signer_for(ChainId::Stellar).sign(&material, b"ping")?)
    })
    .unwrap();
    assert_eq!(signature.len(), 64);
}

#[test]
fn purge_holds_on_every_exit_path() {
    // success
    let mut bundle = derive_bundle(&abandon()).unwrap();
    let before = snapshot(&bundle);
    let count = with_bundle(&mut bundle, |b| b.len());
    assert_eq!(count, 4);
    assert_fully_purged(&before, &bundle);

    // error
    let mut bundle = derive_bundle(&abandon()).unwrap();
    let before = snapshot(&bundle);
    let result: Result<(), CryptoError> =
        with_bundle(&mut bundle, |_| Err(CryptoError::DecryptionFailed));
    assert!(result.is_err());
    assert_fully_purged(&before, &bundle);

    // panic
    let mut bundle = derive_bundle(&abandon()).unwrap();
    let before = snapshot(&bundle);
    let unwound = panic::catch_unwind(AssertUnwindSafe(|| {
        with_bundle(&mut bundle, |_| panic!("signer exploded"));
    }));
    assert!(unwound.is_err());
    assert_fully_purged(&before, &bundle);
}

#[test]
fn purged_phrase_stays_printable() {
    let mut bundle = derive_bundle(&abandon()).unwrap();
    with_bundle(&mut bundle, |_| ());
    let phrase = bundle.master_seed().as_str();
    assert_eq!(phrase.len(), ABANDON.len());
    assert!(phrase.bytes().all(|b| b.is_ascii_hexdigit()));
}

#[test]
fn wrong_passphrase_never_runs_op() {
    let mut bundle = derive_bundle(&abandon()).unwrap();
    let envelope = with_bundle(&mut bundle, |b| {
        encrypt_bundle(b, &Passphrase::from(PASS), &KdfParams::default())
    })
    .unwrap();

    let mut ran = false;
    let wrong = Passphrase::from("granite-orchard-lantern-42");
    let result: Result<(), CryptoError> = with_plaintext(&envelope, (&wrong).into(), |_| {
        ran = true;
        Ok(())
    });
    assert!(matches!(result, Err(CryptoError::DecryptionFailed)));
    assert!(!ran);
}

#[test]
fn parallel_derivation_is_deterministic() {
    let reference = derive_bundle(&abandon()).unwrap().addresses();

    let handles: Vec<_> = (0..4)
        .map(|_| thread::spawn(|| derive_bundle(&abandon()).unwrap().addresses()))
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), reference);
    }
}

#[test]
fn independent_identities_in_parallel() {
    let vault = Arc::new(KeyVault::new(MemoryStore::new()));
    let session = SessionToken::new("parallel-test");

    let handles: Vec<_> = ["alpha", "beta", "gamma"]
        .into_iter()
        .map(|name| {
            let vault = Arc::clone(&vault);
            let session = session.clone();
            thread::spawn(move || {
                let passphrase = Passphrase::from(format!("{}-passphrase-2026", name).as_str());
                let receipt = vault
                    .create_identity(&session, name, &passphrase, |_| {})
                    .unwrap();
                let reopened = vault.addresses(&session, name, &passphrase).unwrap();
                assert_eq!(reopened, receipt.addresses);
                receipt.addresses
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_ne!(results[0], results[1]);
    assert_ne!(results[1], results[2]);
    assert_eq!(vault.store().identities(&session).unwrap().len(), 3);
}
