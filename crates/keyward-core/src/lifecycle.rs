//! Scoped exposure of plaintext key material
//!
//! Decrypted bundles are only ever handed out by reference inside a closure.
//! When the closure returns, errors, or unwinds, a guard purges every secret
//! leaf before the borrow ends.

use crate::bundle::PlaintextBundle;
use crate::crypto::{self, CryptoError, EncryptedBundle, KeyEncryptionKey};
use crate::passphrase::Passphrase;

/// What unlocks an envelope.
#[derive(Debug, Clone, Copy)]
pub enum Credential<'a> {
    Passphrase(&'a Passphrase),
    /// A key already derived for this envelope in the current scope
    Key(&'a KeyEncryptionKey),
}

impl<'a> From<&'a Passphrase> for Credential<'a> {
    fn from(passphrase: &'a Passphrase) -> Self {
        Credential::Passphrase(passphrase)
    }
}

impl<'a> From<&'a KeyEncryptionKey> for Credential<'a> {
    fn from(key: &'a KeyEncryptionKey) -> Self {
        Credential::Key(key)
    }
}

struct PurgeGuard<'a>(&'a mut PlaintextBundle);

impl Drop for PurgeGuard<'_> {
    fn drop(&mut self) {
        self.0.purge();
        log::trace!("purged plaintext bundle ({} chains)", self.0.len());
    }
}

/// Run `op` against `bundle`, then purge it on every exit path.
pub fn with_bundle<R>(bundle: &mut PlaintextBundle, op: impl FnOnce(&PlaintextBundle) -> R) -> R {
    let guard = PurgeGuard(bundle);
    let result = op(&*guard.0);
    drop(guard);
    result
}

/// Decrypt `envelope`, run `op` on the plaintext, purge, return `op`'s result.
///
/// Decryption errors are converted into the caller's error type; the bundle
/// never exists outside this call.
pub fn with_plaintext<T, E, F>(
    envelope: &EncryptedBundle,
    credential: Credential<'_>,
    op: F,
) -> Result<T, E>
where
    F: FnOnce(&PlaintextBundle) -> Result<T, E>,
    E: From<CryptoError>,
{
    let mut bundle = match credential {
        Credential::Passphrase(passphrase) => crypto::decrypt_bundle(envelope, passphrase)?,
        Credential::Key(key) => crypto::decrypt_bundle_with_key(envelope, key)?,
    };
    with_bundle(&mut bundle, op)
}
