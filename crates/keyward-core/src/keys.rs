//! Hierarchical key derivation
//!
//! Expands a BIP-39 seed into one key per registered chain:
//! - secp256k1 chains walk a BIP-32 path from the `"Bitcoin seed"` root
//! - Ed25519 chains walk a SLIP-0010 path from the `"ed25519 seed"` root
//!   (hardened components only)
//!
//! Derivation is a pure function of seed and path.

use std::fmt;
use std::str::FromStr;

use bitcoin::bip32::{self, ChildNumber, Xpriv};
use bitcoin::Network;
use hmac::{Hmac, Mac};
use secp256k1::Secp256k1;
use sha2::Sha512;
use thiserror::Error;
use zeroize::Zeroize;

use crate::bundle::{ChainKeyRecord, PlaintextBundle};
use crate::chains::{ChainId, Curve};
use crate::memory::SecretBytes;
use crate::seed::MasterSeed;

type HmacSha512 = Hmac<Sha512>;

/// BIP-32 / SLIP-0010 hardened offset
pub const HARDENED_OFFSET: u32 = 0x8000_0000;

/// SLIP-0010 master HMAC key for Ed25519
const ED25519_SEED_KEY: &[u8] = b"ed25519 seed";

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Unsupported chain: {0}")]
    UnsupportedChain(String),
    #[error("Invalid derivation path: {0}")]
    DerivationPathInvalid(String),
    #[error("Derivation failed: {0}")]
    DerivationFailed(String),
}

/// One step in a derivation path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathComponent {
    /// Index without the hardened offset
    pub index: u32,
    pub hardened: bool,
}

/// Parsed `m/44'/60'/0'/0/0`-style path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivationPath(Vec<PathComponent>);

impl DerivationPath {
    pub fn components(&self) -> &[PathComponent] {
        &self.0
    }

    fn to_bip32(&self) -> Result<bip32::DerivationPath, KeyError> {
        self.0
            .iter()
            .map(|c| {
                let child = if c.hardened {
                    ChildNumber::from_hardened_idx(c.index)
                } else {
                    ChildNumber::from_normal_idx(c.index)
                };
                child.map_err(|e| KeyError::DerivationPathInvalid(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(bip32::DerivationPath::from)
    }
}

impl FromStr for DerivationPath {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        if parts.next() != Some("m") {
            return Err(KeyError::DerivationPathInvalid(format!(
                "{}: must start at the root 'm'",
                s
            )));
        }

        let components = parts
            .map(|part| {
                let (digits, hardened) = match part.strip_suffix(['\'', 'h', 'H']) {
                    Some(digits) => (digits, true),
                    None => (part, false),
                };
                let index = digits
                    .parse::<u32>()
                    .ok()
                    .filter(|i| *i < HARDENED_OFFSET && !digits.starts_with('+'))
                    .ok_or_else(|| {
                        KeyError::DerivationPathInvalid(format!("{}: bad component '{}'", s, part))
                    })?;
                Ok(PathComponent { index, hardened })
            })
            .collect::<Result<Vec<_>, KeyError>>()?;

        Ok(DerivationPath(components))
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("m")?;
        for c in &self.0 {
            write!(f, "/{}{}", c.index, if c.hardened { "'" } else { "" })?;
        }
        Ok(())
    }
}

/// Walk `path` from the seed's root node and return the raw 32-byte private key.
pub fn derive_private_key(
    seed: &[u8],
    curve: Curve,
    path: &DerivationPath,
) -> Result<SecretBytes, KeyError> {
    match curve {
        Curve::Secp256k1 => derive_secp256k1(seed, path),
        Curve::Ed25519 => derive_ed25519(seed, path),
    }
}

fn derive_secp256k1(seed: &[u8], path: &DerivationPath) -> Result<SecretBytes, KeyError> {
    let bip32_path = path.to_bip32()?;
    let mut master = Xpriv::new_master(Network::Bitcoin, seed)
        .map_err(|e| KeyError::DerivationFailed(e.to_string()))?;

    let derived = master.derive_priv(&Secp256k1::new(), &bip32_path);
    master.private_key.non_secure_erase();
    let mut derived = derived.map_err(|e| KeyError::DerivationFailed(e.to_string()))?;

    let key = SecretBytes::from_slice(&derived.private_key.secret_bytes());
    derived.private_key.non_secure_erase();
    Ok(key)
}

/// SLIP-0010 Ed25519: every component must be hardened.
fn derive_ed25519(seed: &[u8], path: &DerivationPath) -> Result<SecretBytes, KeyError> {
    if let Some(c) = path.components().iter().find(|c| !c.hardened) {
        return Err(KeyError::DerivationPathInvalid(format!(
            "{}: Ed25519 derivation requires hardened components, found {}",
            path, c.index
        )));
    }

    let mut node = hmac_sha512(ED25519_SEED_KEY, seed)?;

    for c in path.components() {
        // data = 0x00 || key || ser32(index | 0x80000000)
        let mut data = [0u8; 37];
        data[1..33].copy_from_slice(&node[..32]);
        data[33..].copy_from_slice(&(c.index | HARDENED_OFFSET).to_be_bytes());

        let child = hmac_sha512(&node[32..], &data);
        data.zeroize();
        node.zeroize();
        node = child?;
    }

    let key = SecretBytes::from_slice(&node[..32]);
    node.zeroize();
    Ok(key)
}

fn hmac_sha512(key: &[u8], data: &[u8]) -> Result<[u8; 64], KeyError> {
    let mut mac = HmacSha512::new_from_slice(key)
        .map_err(|e| KeyError::DerivationFailed(format!("HMAC-SHA512 init: {}", e)))?;
    mac.update(data);

    let mut out = [0u8; 64];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// Derive the key record for a single chain.
pub fn derive_chain(seed: &[u8], chain: ChainId) -> Result<ChainKeyRecord, KeyError> {
    let path: DerivationPath = chain.derivation_path().parse()?;
    let private_key = derive_private_key(seed, chain.curve(), &path)?;
    let encoding = chain.encode(private_key.as_slice())?;
    Ok(ChainKeyRecord::new(&path, private_key, encoding))
}

/// Derive every registered chain into a fresh plaintext bundle.
pub fn derive_bundle(master: &MasterSeed) -> Result<PlaintextBundle, KeyError> {
    derive_for(master, &ChainId::ALL)
}

/// Derive only the chains named in `ids`.
///
/// # Errors
/// `UnsupportedChain` if any id is not in the registry.
pub fn derive_chains(master: &MasterSeed, ids: &[&str]) -> Result<PlaintextBundle, KeyError> {
    let chains = ids
        .iter()
        .map(|id| id.parse::<ChainId>())
        .collect::<Result<Vec<_>, _>>()?;
    derive_for(master, &chains)
}

fn derive_for(master: &MasterSeed, chains: &[ChainId]) -> Result<PlaintextBundle, KeyError> {
    let mut bundle = PlaintextBundle::new(master.phrase_secret().duplicate());
    for &chain in chains {
        // records already derived are wiped on drop if a later chain fails
        bundle.insert(chain, derive_chain(master.seed_bytes(), chain)?);
    }
    log::debug!("derived {} chain key records", bundle.len());
    Ok(bundle)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ABANDON: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn abandon() -> MasterSeed {
        MasterSeed::from_phrase(ABANDON, "").unwrap()
    }

    #[test]
    fn test_path_parse_display() {
        let path: DerivationPath = "m/44'/60'/0'/0/0".parse().unwrap();
        assert_eq!(path.components().len(), 5);
        assert!(path.components()[0].hardened);
        assert!(!path.components()[4].hardened);
        assert_eq!(path.to_string(), "m/44'/60'/0'/0/0");

        let h: DerivationPath = "m/44h/148H/0'".parse().unwrap();
        assert_eq!(h.to_string(), "m/44'/148'/0'");

        let root: DerivationPath = "m".parse().unwrap();
        assert!(root.components().is_empty());
    }

    #[test]
    fn test_malformed_paths_rejected() {
        for bad in [
            "",
            "44'/0'",
            "n/0",
            "m/",
            "m//0",
            "m/abc",
            "m/-1",
            "m/+1",
            "m/2147483648",
            "m/0''",
        ] {
            assert!(
                matches!(
                    bad.parse::<DerivationPath>(),
                    Err(KeyError::DerivationPathInvalid(_))
                ),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_ed25519_rejects_normal_component() {
        let path: DerivationPath = "m/44'/148'/0'/0".parse().unwrap();
        let master = abandon();
        let result = derive_private_key(master.seed_bytes(), Curve::Ed25519, &path);
        assert!(matches!(result, Err(KeyError::DerivationPathInvalid(_))));
    }

    /// SLIP-0010 Ed25519 test vector 1, chain m/0'
    #[test]
    fn test_slip10_vector() {
        let seed = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let root: DerivationPath = "m".parse().unwrap();
        let key = derive_private_key(&seed, Curve::Ed25519, &root).unwrap();
        assert_eq!(
            hex::encode(key.as_slice()),
            "2b4be7f19ee27bbf30c667b642d5f4aa69fd169872f8fc3059c08ebae2eb19e7"
        );

        let child: DerivationPath = "m/0'".parse().unwrap();
        let key = derive_private_key(&seed, Curve::Ed25519, &child).unwrap();
        assert_eq!(
            hex::encode(key.as_slice()),
            "68e0fe46dfb67e368c75379acec591dad19df3cde26e63b93a8e704f1dade7a3"
        );
    }

    /// BIP-32 test vector 1, chain m/0'
    #[test]
    fn test_bip32_vector() {
        let seed = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let path: DerivationPath = "m/0'".parse().unwrap();
        let key = derive_private_key(&seed, Curve::Secp256k1, &path).unwrap();
        assert_eq!(
            hex::encode(key.as_slice()),
            "edb2e14f9ee77d26dd93b4ecede8d16ed408ce149b6cd80b0715a2d911a0afea"
        );
    }

    #[test]
    fn test_derivation_deterministic() {
        let master = abandon();
        let a = derive_bundle(&master).unwrap();
        let b = derive_bundle(&master).unwrap();

        for chain in ChainId::ALL {
            let ra = a.record(chain).unwrap();
            let rb = b.record(chain).unwrap();
            assert_eq!(ra.private_key(), rb.private_key());
            assert_eq!(ra.address(), rb.address());
            assert_eq!(ra.public_key(), rb.public_key());
        }
    }

    #[test]
    fn test_chains_get_distinct_keys() {
        let bundle = derive_bundle(&abandon()).unwrap();
        let xrpl = bundle.record(ChainId::Xrpl).unwrap();
        let evm = bundle.record(ChainId::MetalL2).unwrap();
        let xpr = bundle.record(ChainId::Xpr).unwrap();
        assert_ne!(xrpl.private_key(), evm.private_key());
        assert_ne!(evm.private_key(), xpr.private_key());
    }

    /// Addresses for the all-`abandon` mnemonic, cross-checked against
    /// independent implementations of each chain's encoder.
    #[test]
    fn test_abandon_addresses() {
        let bundle = derive_bundle(&abandon()).unwrap();
        let expect = [
            (ChainId::Xrpl, "rHsMGQEkVNJmpGWs8XUBoTBiAAbwxZN5v3"),
            (ChainId::MetalL2, "0x9858EfFD232B4033E47d90003D41EC34EcaEda94"),
            (ChainId::Stellar, "GB3JDWCQJCWMJ3IILWIGDTQJJC5567PGVEVXSCVPEQOTDN64VJBDQBYX"),
            (ChainId::Xpr, "PUB_K1_7hB1teRJRwcvY5X2y9HqxqpTQmiTk3EphVsr1jmJoSq28bZWFr"),
        ];
        for (chain, address) in expect {
            assert_eq!(bundle.record(chain).unwrap().address(), address, "{}", chain);
        }

        let evm = bundle.record(ChainId::MetalL2).unwrap();
        assert_eq!(
            hex::encode(evm.private_key().as_slice()),
            "1ab42cc412b618bdea3a599e3c9bae199ebf030895b039e9db1e30dafb12b727"
        );
        assert_eq!(
            evm.public_key(),
            "0237b0bb7a8288d38ed49a524b5dc98cff3eb5ca824c9f9dc0dfdb3d9cd600f299"
        );

        let stellar = bundle.record(ChainId::Stellar).unwrap();
        assert_eq!(
            stellar.secret().unwrap().as_str(),
            "SBUV3MRWKNS6AYKZ6E6MOUVF2OYMON3MIUASWL3JLY5E3ISDJFELYBRZ"
        );
        let xpr = bundle.record(ChainId::Xpr).unwrap();
        assert_eq!(
            xpr.secret().unwrap().as_str(),
            "PVT_K1_2pyqwu8uQjJVDH1EpY9DnVdNvcwkSgq96GwoE3wWEFLRxSdwwY"
        );
        assert!(bundle.record(ChainId::Xrpl).unwrap().secret().is_none());
    }

    #[test]
    fn test_derive_chains_subset() {
        let bundle = derive_chains(&abandon(), &["stellar", "xrpl"]).unwrap();
        assert_eq!(bundle.len(), 2);
        assert!(bundle.record(ChainId::MetalL2).is_none());
    }

    #[test]
    fn test_derive_chains_unknown() {
        let err = derive_chains(&abandon(), &["xrpl", "solana"]).unwrap_err();
        assert!(matches!(err, KeyError::UnsupportedChain(ref id) if id == "solana"));
    }

    #[test]
    fn test_different_seeds_different_keys() {
        let other = MasterSeed::from_phrase(
            "zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo wrong",
            "",
        )
        .unwrap();
        let a = derive_chain(abandon().seed_bytes(), ChainId::MetalL2).unwrap();
        let b = derive_chain(other.seed_bytes(), ChainId::MetalL2).unwrap();
        assert_ne!(a.address(), b.address());
    }
}
