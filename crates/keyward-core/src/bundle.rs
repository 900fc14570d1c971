//! Plaintext key bundle and its canonical serialization
//!
//! The canonical form is compact JSON: struct fields in declaration order and
//! `derived_keys` as an ordered map, so the same bundle always serializes to the
//! same bytes. Those bytes are exactly what the envelope cipher encrypts.
//!
//! Every field of a [`PlaintextBundle`] is sensitive. Secret leaves live in
//! [`SecretBytes`] and are overwritten by [`PlaintextBundle::purge`].

use std::collections::BTreeMap;
use std::fmt;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::chains::{ChainEncoding, ChainId};
use crate::keys::DerivationPath;
use crate::memory::SecretBytes;

/// Current plaintext format version
pub const BUNDLE_VERSION: &str = "1.0";

/// Raw private key length for every registered chain
pub const PRIVATE_KEY_LEN: usize = 32;

/// Initial serializer buffer; large enough that a full bundle never reallocates.
const SERIALIZE_CAPACITY: usize = 4096;

#[derive(Error, Debug)]
pub enum BundleError {
    #[error("Malformed bundle: {0}")]
    MalformedBundle(String),
}

/// Key material for one chain.
#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChainKeyRecord {
    /// Raw 32-byte private key (secp256k1 scalar or Ed25519 seed)
    #[serde(with = "secret_hex")]
    private_key: SecretBytes,
    /// Public key bytes, hex
    public_key: String,
    /// Chain-native public identifier
    address: String,
    derivation_path: String,
    /// Chain-native secret encoding (Stellar `S…`, XPR `PVT_K1_…`)
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "secret_text_opt"
    )]
    secret: Option<SecretBytes>,
}

impl ChainKeyRecord {
    pub(crate) fn new(
        path: &DerivationPath,
        private_key: SecretBytes,
        encoding: ChainEncoding,
    ) -> Self {
        Self {
            private_key,
            public_key: hex::encode(&encoding.public_key),
            address: encoding.address,
            derivation_path: path.to_string(),
            secret: encoding.secret,
        }
    }

    pub fn private_key(&self) -> &SecretBytes {
        &self.private_key
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn derivation_path(&self) -> &str {
        &self.derivation_path
    }

    pub fn secret(&self) -> Option<&SecretBytes> {
        self.secret.as_ref()
    }

    fn purge(&mut self) {
        self.private_key.purge();
        if let Some(secret) = self.secret.as_mut() {
            secret.purge_text();
        }
    }
}

/// Versioned bundle of every derived key for one identity.
#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlaintextBundle {
    version: String,
    /// The mnemonic phrase
    #[serde(with = "secret_text")]
    master_seed: SecretBytes,
    /// RFC 3339, UTC, millisecond precision
    created_at: String,
    derived_keys: BTreeMap<ChainId, ChainKeyRecord>,
}

impl PlaintextBundle {
    pub(crate) fn new(master_seed: SecretBytes) -> Self {
        Self {
            version: BUNDLE_VERSION.to_string(),
            master_seed,
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            derived_keys: BTreeMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, chain: ChainId, record: ChainKeyRecord) {
        self.derived_keys.insert(chain, record);
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn created_at(&self) -> &str {
        &self.created_at
    }

    /// The mnemonic phrase this bundle was derived from.
    pub fn master_seed(&self) -> &SecretBytes {
        &self.master_seed
    }

    pub fn record(&self, chain: ChainId) -> Option<&ChainKeyRecord> {
        self.derived_keys.get(&chain)
    }

    pub fn records(&self) -> impl Iterator<Item = (ChainId, &ChainKeyRecord)> {
        self.derived_keys.iter().map(|(chain, record)| (*chain, record))
    }

    pub fn chains(&self) -> Vec<ChainId> {
        self.derived_keys.keys().copied().collect()
    }

    /// Public identifiers only; safe to display.
    pub fn addresses(&self) -> BTreeMap<ChainId, String> {
        self.records()
            .map(|(chain, record)| (chain, record.address.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.derived_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.derived_keys.is_empty()
    }

    /// Overwrite every sensitive leaf with fresh random bytes.
    ///
    /// Each leaf is overwritten in place; dropping the bundle alone is not
    /// relied on. Safe to call more than once.
    pub fn purge(&mut self) {
        self.master_seed.purge_text();
        for record in self.derived_keys.values_mut() {
            record.purge();
        }
    }

    fn validate(&self) -> Result<(), BundleError> {
        if self.version != BUNDLE_VERSION {
            return Err(BundleError::MalformedBundle(format!(
                "unknown version '{}'",
                self.version
            )));
        }
        if self.master_seed.is_empty() {
            return Err(BundleError::MalformedBundle(
                "empty master seed".to_string(),
            ));
        }
        for (chain, record) in self.records() {
            if record.private_key.len() != PRIVATE_KEY_LEN {
                return Err(BundleError::MalformedBundle(format!(
                    "{}: private key must be {} bytes",
                    chain, PRIVATE_KEY_LEN
                )));
            }
            if record.derivation_path != chain.derivation_path() {
                return Err(BundleError::MalformedBundle(format!(
                    "{}: derivation path {} does not match registry",
                    chain, record.derivation_path
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for PlaintextBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaintextBundle")
            .field("version", &self.version)
            .field("master_seed", &"[REDACTED]")
            .field("created_at", &self.created_at)
            .field("chains", &self.chains())
            .finish()
    }
}

/// Canonical byte form of a bundle.
pub fn serialize(bundle: &PlaintextBundle) -> Result<Zeroizing<Vec<u8>>, BundleError> {
    let mut out = Zeroizing::new(Vec::with_capacity(SERIALIZE_CAPACITY));
    serde_json::to_writer(&mut *out, bundle)
        .map_err(|e| BundleError::MalformedBundle(e.to_string()))?;
    Ok(out)
}

/// Parse canonical bytes back into a bundle.
///
/// # Errors
/// `MalformedBundle` on schema mismatch, unknown chain, or missing/unknown version.
pub fn deserialize(bytes: &[u8]) -> Result<PlaintextBundle, BundleError> {
    let bundle: PlaintextBundle = serde_json::from_slice(bytes)
        .map_err(|e| BundleError::MalformedBundle(e.to_string()))?;
    bundle.validate()?;
    Ok(bundle)
}

// ---- serde adapters for secret leaves ----

struct HexSecretVisitor;

impl<'de> serde::de::Visitor<'de> for HexSecretVisitor {
    type Value = SecretBytes;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a hex-encoded secret")
    }

    fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<SecretBytes, E> {
        hex::decode(v)
            .map(SecretBytes::from_vec)
            .map_err(|_| E::custom("invalid hex in secret field"))
    }

    fn visit_string<E: serde::de::Error>(self, v: String) -> Result<SecretBytes, E> {
        let v = Zeroizing::new(v);
        self.visit_str(&v)
    }
}

struct TextSecretVisitor;

impl<'de> serde::de::Visitor<'de> for TextSecretVisitor {
    type Value = SecretBytes;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a secret string")
    }

    fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<SecretBytes, E> {
        Ok(SecretBytes::from_slice(v.as_bytes()))
    }

    fn visit_string<E: serde::de::Error>(self, v: String) -> Result<SecretBytes, E> {
        Ok(SecretBytes::from_vec(v.into_bytes()))
    }
}

mod secret_hex {
    use serde::{Deserializer, Serializer};
    use zeroize::Zeroizing;

    use crate::memory::SecretBytes;

    pub fn serialize<S: Serializer>(secret: &SecretBytes, s: S) -> Result<S::Ok, S::Error> {
        let encoded = Zeroizing::new(hex::encode(secret.as_slice()));
        s.serialize_str(&encoded)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SecretBytes, D::Error> {
        d.deserialize_str(super::HexSecretVisitor)
    }
}

mod secret_text {
    use serde::{Deserializer, Serializer};

    use crate::memory::SecretBytes;

    pub fn serialize<S: Serializer>(secret: &SecretBytes, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(secret.as_str())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SecretBytes, D::Error> {
        d.deserialize_str(super::TextSecretVisitor)
    }
}

mod secret_text_opt {
    use std::fmt;

    use serde::de::Visitor;
    use serde::{Deserializer, Serializer};

    use crate::memory::SecretBytes;

    pub fn serialize<S: Serializer>(
        secret: &Option<SecretBytes>,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        match secret {
            Some(secret) => s.serialize_some(secret.as_str()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<SecretBytes>, D::Error> {
        d.deserialize_option(OptionVisitor)
    }

    struct OptionVisitor;

    impl<'de> Visitor<'de> for OptionVisitor {
        type Value = Option<SecretBytes>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an optional secret string")
        }

        fn visit_none<E: serde::de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
            d.deserialize_str(super::TextSecretVisitor).map(Some)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::derive_bundle;
    use crate::seed::MasterSeed;

    const ABANDON: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn sample() -> PlaintextBundle {
        derive_bundle(&MasterSeed::from_phrase(ABANDON, "").unwrap()).unwrap()
    }

    #[test]
    fn test_serialize_roundtrip_byte_identical() {
        let bundle = sample();
        let bytes = serialize(&bundle).unwrap();
        let restored = deserialize(&bytes).unwrap();
        let again = serialize(&restored).unwrap();
        assert_eq!(*bytes, *again);
    }

    #[test]
    fn test_canonical_field_order() {
        let bytes = serialize(&sample()).unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();

        let version = text.find("\"version\"").unwrap();
        let seed = text.find("\"master_seed\"").unwrap();
        let created = text.find("\"created_at\"").unwrap();
        let keys = text.find("\"derived_keys\"").unwrap();
        assert!(version < seed && seed < created && created < keys);

        // Registry order within the map
        let xrpl = text.find("\"xrpl\"").unwrap();
        let evm = text.find("\"metal_l2\"").unwrap();
        let stellar = text.find("\"stellar\"").unwrap();
        let xpr = text.find("\"xpr\"").unwrap();
        assert!(xrpl < evm && evm < stellar && stellar < xpr);
    }

    #[test]
    fn test_created_at_format() {
        let bundle = sample();
        let ts = bundle.created_at();
        assert!(ts.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());
    }

    #[test]
    fn test_missing_version_rejected() {
        let bytes = serialize(&sample()).unwrap();
        let mut value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        value.as_object_mut().unwrap().remove("version");
        let err = deserialize(value.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, BundleError::MalformedBundle(_)));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let bytes = serialize(&sample()).unwrap();
        let mut value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        value["version"] = serde_json::json!("9.9");
        let err = deserialize(value.to_string().as_bytes()).unwrap_err();
        assert!(err.to_string().contains("unknown version"));
    }

    #[test]
    fn test_unknown_chain_rejected() {
        let bytes = serialize(&sample()).unwrap();
        let mut value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let xrpl = value["derived_keys"]["xrpl"].clone();
        value["derived_keys"]["dogecoin"] = xrpl;
        assert!(deserialize(value.to_string().as_bytes()).is_err());
    }

    #[test]
    fn test_wrong_path_rejected() {
        let bytes = serialize(&sample()).unwrap();
        let mut value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        value["derived_keys"]["xrpl"]["derivation_path"] = serde_json::json!("m/44'/0'/0'/0/0");
        assert!(deserialize(value.to_string().as_bytes()).is_err());
    }

    #[test]
    fn test_short_private_key_rejected() {
        let bytes = serialize(&sample()).unwrap();
        let mut value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        value["derived_keys"]["metal_l2"]["private_key"] = serde_json::json!("abcd");
        assert!(deserialize(value.to_string().as_bytes()).is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(deserialize(b"").is_err());
        assert!(deserialize(b"not json").is_err());
        assert!(deserialize(b"{}").is_err());
        assert!(deserialize(b"[1,2,3]").is_err());
    }

    #[test]
    fn test_purge_overwrites_every_leaf() {
        let mut bundle = sample();
        let seed_before = bundle.master_seed().duplicate();
        let keys_before: Vec<_> = bundle
            .records()
            .map(|(_, r)| r.private_key().duplicate())
            .collect();

        bundle.purge();

        assert_ne!(*bundle.master_seed(), seed_before);
        assert_eq!(bundle.master_seed().len(), seed_before.len());
        for ((_, record), before) in bundle.records().zip(keys_before.iter()) {
            assert_ne!(record.private_key(), before);
        }
        for chain in [ChainId::Stellar, ChainId::Xpr] {
            let secret = bundle.record(chain).unwrap().secret().unwrap();
            assert!(secret.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn test_debug_redacts_everything_secret() {
        let bundle = sample();
        let shown = format!("{:?}", bundle);
        assert!(!shown.contains("abandon"));
        let key_hex = hex::encode(bundle.record(ChainId::MetalL2).unwrap().private_key().as_slice());
        assert!(!shown.contains(&key_hex));
    }

    #[test]
    fn test_addresses_are_public_only() {
        let addresses = sample().addresses();
        assert_eq!(addresses.len(), ChainId::ALL.len());
        assert_eq!(
            addresses[&ChainId::MetalL2],
            "0x9858EfFD232B4033E47d90003D41EC34EcaEda94"
        );
    }
}
