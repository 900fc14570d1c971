//! Command implementations
//!
//! Every command writes its result to `out`. Secrets (passphrases, mnemonics)
//! are read through a [`SecretSource`] so they never appear in argv.

use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use keyward_core::chains::ChainId;
use keyward_core::crypto::KdfParams;
use keyward_core::passphrase::Passphrase;
use keyward_core::seed;
use keyward_core::signer::signer_for;
use keyward_core::store::{BundleStore, FileStore, SessionToken};
use keyward_core::vault::{IdentityReceipt, KeyVault};
use zeroize::Zeroizing;

use crate::config::KeywardConfig;

/// A parsed subcommand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Generate,
    Create(String),
    Restore(String),
    Addresses(String),
    Sign {
        identity: String,
        chain: ChainId,
        payload: Vec<u8>,
    },
    Rotate(String),
    Inspect(String),
    List,
}

/// Where passphrases and mnemonics come from: environment first, then one
/// line each from the reader.
pub struct SecretSource<R> {
    reader: R,
    passphrase: Option<String>,
    new_passphrase: Option<String>,
}

impl<R: BufRead> SecretSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            passphrase: None,
            new_passphrase: None,
        }
    }

    /// Also honour `KEYWARD_PASSPHRASE` and `KEYWARD_NEW_PASSPHRASE`.
    pub fn with_env(reader: R) -> Self {
        Self {
            reader,
            passphrase: std::env::var("KEYWARD_PASSPHRASE").ok(),
            new_passphrase: std::env::var("KEYWARD_NEW_PASSPHRASE").ok(),
        }
    }

    fn line(&mut self, what: &str) -> Result<Zeroizing<String>> {
        eprint!("{}: ", what);
        let mut line = Zeroizing::new(String::new());
        let read = self
            .reader
            .read_line(&mut line)
            .with_context(|| format!("Failed to read {}", what))?;
        anyhow::ensure!(read > 0, "expected {} on stdin", what);

        let trimmed = line.trim_end_matches(['\r', '\n']).len();
        line.truncate(trimmed);
        Ok(line)
    }

    pub fn passphrase(&mut self) -> Result<Passphrase> {
        match self.passphrase.take() {
            Some(v) => Ok(Passphrase::new(v)),
            None => Ok(Passphrase::from(self.line("Passphrase")?.as_str())),
        }
    }

    pub fn new_passphrase(&mut self) -> Result<Passphrase> {
        match self.new_passphrase.take() {
            Some(v) => Ok(Passphrase::new(v)),
            None => Ok(Passphrase::from(self.line("New passphrase")?.as_str())),
        }
    }

    pub fn mnemonic(&mut self) -> Result<Zeroizing<String>> {
        self.line("Mnemonic")
    }
}

fn open_vault(config: &KeywardConfig) -> Result<KeyVault<FileStore>> {
    let store = FileStore::open(&config.store.data_dir).with_context(|| {
        format!(
            "Failed to open bundle store at {}",
            config.store.data_dir.display()
        )
    })?;
    let kdf = KdfParams::new(config.kdf.iterations).context("Invalid KDF settings")?;
    log::debug!("opened bundle store at {}", store.dir().display());
    Ok(KeyVault::with_kdf(store, kdf))
}

fn print_receipt<W: Write>(out: &mut W, receipt: &IdentityReceipt) -> Result<()> {
    writeln!(out, "Identity: {}", receipt.identity)?;
    for (chain, address) in &receipt.addresses {
        writeln!(out, "  {:<9} {}", chain, address)?;
    }
    for warning in &receipt.passphrase_warnings {
        writeln!(out, "Warning: passphrase {}", warning)?;
    }
    Ok(())
}

/// Run one command against the configured store.
pub fn run<R: BufRead, W: Write>(
    config: &KeywardConfig,
    command: &Command,
    secrets: &mut SecretSource<R>,
    out: &mut W,
) -> Result<()> {
    let session = SessionToken::new(config.session.token.clone());

    match command {
        Command::Generate => {
            let master = seed::generate("").context("Failed to generate mnemonic")?;
            writeln!(out, "{}", master.phrase())?;
        }
        Command::Create(identity) => {
            let vault = open_vault(config)?;
            let passphrase = secrets.passphrase()?;
            let mut backup = Ok(());
            let receipt = vault
                .create_identity(&session, identity, &passphrase, |phrase| {
                    backup = writeln!(out, "Write down these words and keep them offline:\n\n    {}\n", phrase);
                })
                .with_context(|| format!("Failed to create identity '{}'", identity))?;
            backup?;
            print_receipt(out, &receipt)?;
        }
        Command::Restore(identity) => {
            let vault = open_vault(config)?;
            let phrase = secrets.mnemonic()?;
            let passphrase = secrets.passphrase()?;
            let receipt = vault
                .restore_identity(&session, identity, &phrase, &passphrase)
                .with_context(|| format!("Failed to restore identity '{}'", identity))?;
            print_receipt(out, &receipt)?;
        }
        Command::Addresses(identity) => {
            let vault = open_vault(config)?;
            let passphrase = secrets.passphrase()?;
            let addresses = vault
                .addresses(&session, identity, &passphrase)
                .with_context(|| format!("Failed to unlock identity '{}'", identity))?;
            for (chain, address) in addresses {
                writeln!(out, "{:<9} {}", chain, address)?;
            }
        }
        Command::Sign {
            identity,
            chain,
            payload,
        } => {
            let vault = open_vault(config)?;
            let passphrase = secrets.passphrase()?;
            let signer = signer_for(*chain);
            let signature = vault
                .sign(&session, identity, &passphrase, signer.as_ref(), payload)
                .with_context(|| format!("Failed to sign with {} key of '{}'", chain, identity))?;
            writeln!(out, "{}", hex::encode(signature))?;
        }
        Command::Rotate(identity) => {
            let vault = open_vault(config)?;
            let old = secrets.passphrase()?;
            let new = secrets.new_passphrase()?;
            let warnings = vault
                .rotate_passphrase(&session, identity, &old, &new)
                .with_context(|| format!("Failed to rotate passphrase for '{}'", identity))?;
            writeln!(out, "Passphrase rotated for {}", identity)?;
            for warning in warnings {
                writeln!(out, "Warning: passphrase {}", warning)?;
            }
        }
        Command::Inspect(identity) => {
            let vault = open_vault(config)?;
            let envelope = vault
                .store()
                .fetch(&session, identity)
                .with_context(|| format!("Failed to load identity '{}'", identity))?;
            let meta = &envelope.derivation_metadata;
            writeln!(out, "Identity:   {}", identity)?;
            writeln!(out, "Version:    {}", envelope.version)?;
            writeln!(out, "KDF:        {} ({} iterations)", meta.algorithm, meta.iterations)?;
            writeln!(out, "Cipher:     {} ({}-bit key)", meta.encryption, meta.key_size)?;
            writeln!(
                out,
                "Tag:        {}",
                if envelope.auth_tag.is_some() { "detached" } else { "appended" }
            )?;
        }
        Command::List => {
            let vault = open_vault(config)?;
            for id in vault.store().identities(&session)? {
                writeln!(out, "{}", id)?;
            }
        }
    }
    Ok(())
}
