//! Keyward: multi-chain key bundle manager
//!
//! Generates a mnemonic, derives XRPL / Metal L2 / Stellar / XPR keys from it,
//! and keeps them only as passphrase-encrypted envelopes on disk.
//!
//! # Usage
//!
//! ```bash
//! keyward create alice                  # passphrase on stdin or KEYWARD_PASSPHRASE
//! keyward addresses alice
//! keyward sign alice stellar 68656c6c6f
//! keyward --config keyward.toml --validate
//! ```

mod commands;
mod config;

use anyhow::{Context, Result};
use keyward_core::chains::ChainId;
use std::path::PathBuf;

use commands::{Command, SecretSource};

/// What the command line asked for
#[derive(Debug, Default, PartialEq, Eq)]
struct Invocation {
    config_path: Option<PathBuf>,
    validate_only: bool,
    help: bool,
    version: bool,
    command: Option<Command>,
}

fn main() -> Result<()> {
    // Security hardening: disable core dumps to prevent key material leaking to disk
    keyward_core::memory::disable_core_dumps();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let invocation = parse_args(&args)?;

    if invocation.help {
        print_help();
        return Ok(());
    }
    if invocation.version {
        println!("keyward {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Load config
    let config_path = invocation
        .config_path
        .or_else(|| std::env::var("KEYWARD_CONFIG").ok().map(PathBuf::from));
    let mut keyward_config = match &config_path {
        Some(path) => config::KeywardConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => config::KeywardConfig::default(),
    };

    // Apply env overrides
    let ignored_overrides = keyward_config.apply_env_overrides();

    // Validate
    keyward_config
        .validate()
        .context("Configuration validation failed")?;

    // Init logger; RUST_LOG still wins when set
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(keyward_config.log.level.as_str()),
    )
    .init();

    for ignored in &ignored_overrides {
        log::warn!("{}", ignored);
    }

    log::debug!(
        "data_dir={} kdf.iterations={}",
        keyward_config.store.data_dir.display(),
        keyward_config.kdf.iterations
    );

    if invocation.validate_only {
        println!("✅ Configuration is valid.");
        println!("  KDF iterations: {}", keyward_config.kdf.iterations);
        println!(
            "  Data dir:       {}",
            keyward_config.store.data_dir.display()
        );
        println!("  Log level:      {}", keyward_config.log.level);
        return Ok(());
    }

    let Some(command) = invocation.command else {
        print_help();
        anyhow::bail!("missing command");
    };

    let stdin = std::io::stdin();
    let mut secrets = SecretSource::with_env(stdin.lock());
    let mut stdout = std::io::stdout().lock();
    commands::run(&keyward_config, &command, &mut secrets, &mut stdout)
}

fn parse_args(args: &[String]) -> Result<Invocation> {
    let mut invocation = Invocation::default();
    let mut positional: Vec<&str> = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                if i < args.len() {
                    invocation.config_path = Some(PathBuf::from(&args[i]));
                } else {
                    anyhow::bail!("--config requires a path argument");
                }
            }
            "--validate" => {
                invocation.validate_only = true;
            }
            "--help" | "-h" => {
                invocation.help = true;
            }
            "--version" | "-V" => {
                invocation.version = true;
            }
            other if other.starts_with('-') => {
                anyhow::bail!("Unknown argument: {}", other);
            }
            other => positional.push(other),
        }
        i += 1;
    }

    if let Some((name, rest)) = positional.split_first() {
        invocation.command = Some(parse_command(name, rest)?);
    }
    Ok(invocation)
}

fn parse_command(name: &str, rest: &[&str]) -> Result<Command> {
    let identity = |rest: &[&str]| -> Result<String> {
        match rest {
            [identity] => Ok(identity.to_string()),
            _ => anyhow::bail!("{} takes exactly one <identity> argument", name),
        }
    };

    let command = match name {
        "generate" => {
            anyhow::ensure!(rest.is_empty(), "generate takes no arguments");
            Command::Generate
        }
        "list" => {
            anyhow::ensure!(rest.is_empty(), "list takes no arguments");
            Command::List
        }
        "create" => Command::Create(identity(rest)?),
        "restore" => Command::Restore(identity(rest)?),
        "addresses" => Command::Addresses(identity(rest)?),
        "rotate" => Command::Rotate(identity(rest)?),
        "inspect" => Command::Inspect(identity(rest)?),
        "sign" => match rest {
            [identity, chain, payload] => Command::Sign {
                identity: identity.to_string(),
                chain: chain.parse::<ChainId>()?,
                payload: hex::decode(payload).context("payload must be hex")?,
            },
            _ => anyhow::bail!("sign takes <identity> <chain> <hex-payload>"),
        },
        other => anyhow::bail!("Unknown command: {}", other),
    };
    Ok(command)
}

fn print_help() {
    println!(
        r#"Keyward: multi-chain key bundle manager

USAGE:
    keyward [OPTIONS] <COMMAND> [ARGS]

COMMANDS:
    generate                          Print a fresh 12-word mnemonic (not stored)
    create <identity>                 Generate, encrypt and store a new identity
    restore <identity>                Rebuild an identity from a mnemonic read on stdin
    addresses <identity>              Print each chain's public address
    sign <identity> <chain> <hex>     Sign a payload (32-byte digest for secp256k1 chains)
    rotate <identity>                 Re-encrypt under a new passphrase
    inspect <identity>                Show envelope metadata without decrypting
    list                              List stored identities

CHAINS:
    xrpl, metal_l2, stellar, xpr

OPTIONS:
    -c, --config <PATH>   Config file path (default: none, built-in defaults)
    --validate            Validate configuration and exit
    -h, --help            Show this help message
    -V, --version         Show version

ENVIRONMENT VARIABLES (override config file):
    KEYWARD_CONFIG            Config file path when --config is not given
    KEYWARD_KDF_ITERATIONS    PBKDF2 iterations for new envelopes (100000 to 10000000)
    KEYWARD_DATA_DIR          Directory holding encrypted bundles
    KEYWARD_SESSION_TOKEN     Session token passed to the bundle store
    KEYWARD_LOG_LEVEL         Log level (error/warn/info/debug/trace)
    KEYWARD_PASSPHRASE        Passphrase (otherwise read from stdin)
    KEYWARD_NEW_PASSPHRASE    New passphrase for rotate (otherwise read from stdin)

EXAMPLES:
    # New identity, passphrase from the environment
    KEYWARD_PASSPHRASE=... keyward create treasury

    # Restore: mnemonic on the first stdin line, passphrase on the second
    keyward restore treasury < recovery.txt

    # Validate configuration
    keyward --config keyward.toml --validate
"#
    );
}
