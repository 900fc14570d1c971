//! CLI configuration, parsed from a TOML file plus environment variable overrides.
//!
//! Priority: environment variables > config file > defaults.

use anyhow::{Context, Result};
use keyward_core::crypto::{MAX_ITERATIONS, MIN_ITERATIONS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const LOG_LEVELS: &[&str] = &["off", "error", "warn", "info", "debug", "trace"];

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeywardConfig {
    #[serde(default)]
    pub kdf: KdfSection,

    #[serde(default)]
    pub store: StoreSection,

    #[serde(default)]
    pub session: SessionSection,

    #[serde(default)]
    pub log: LogSection,
}

/// Key stretching for new envelopes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdfSection {
    /// PBKDF2 iterations (floor and default: 100000, ceiling: 10000000)
    #[serde(default = "default_iterations")]
    pub iterations: u32,
}

impl Default for KdfSection {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSection {
    /// Directory holding one encrypted bundle per identity
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSection {
    /// Token passed to the bundle store on every call
    #[serde(default = "default_session_token")]
    pub token: String,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            token: default_session_token(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSection {
    /// Log level (off, error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_iterations() -> u32 {
    MIN_ITERATIONS
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("keyward-data")
}

fn default_session_token() -> String {
    "local".to_string()
}

fn default_log_level() -> String {
    "warn".to_string()
}

// ============================================================================
// Loading & environment override
// ============================================================================

impl KeywardConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&contents).with_context(|| "Failed to parse TOML config")
    }

    /// Apply environment variable overrides.
    ///
    /// Supported env vars:
    /// - `KEYWARD_KDF_ITERATIONS`
    /// - `KEYWARD_DATA_DIR`
    /// - `KEYWARD_SESSION_TOKEN`
    /// - `KEYWARD_LOG_LEVEL`
    ///
    /// Returns a description of every override that was ignored. The caller logs
    /// them once the logger is up, since the log level itself comes from here.
    pub fn apply_env_overrides(&mut self) -> Vec<String> {
        let mut ignored = Vec::new();
        if let Ok(v) = std::env::var("KEYWARD_KDF_ITERATIONS") {
            match v.trim().parse::<u32>() {
                Ok(iterations) => self.kdf.iterations = iterations,
                Err(e) => ignored.push(format!(
                    "ignoring KEYWARD_KDF_ITERATIONS={:?}: {}; keeping {}",
                    v, e, self.kdf.iterations
                )),
            }
        }
        if let Ok(v) = std::env::var("KEYWARD_DATA_DIR") {
            self.store.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("KEYWARD_SESSION_TOKEN") {
            self.session.token = v;
        }
        if let Ok(v) = std::env::var("KEYWARD_LOG_LEVEL") {
            self.log.level = v;
        }
        ignored
    }

    /// Validate that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            (MIN_ITERATIONS..=MAX_ITERATIONS).contains(&self.kdf.iterations),
            "kdf.iterations must be between {} and {}",
            MIN_ITERATIONS,
            MAX_ITERATIONS
        );
        anyhow::ensure!(
            !self.store.data_dir.as_os_str().is_empty(),
            "store.data_dir must not be empty"
        );
        anyhow::ensure!(
            !self.session.token.trim().is_empty(),
            "session.token must not be empty"
        );
        anyhow::ensure!(
            LOG_LEVELS.contains(&self.log.level.to_ascii_lowercase().as_str()),
            "log.level must be one of {}",
            LOG_LEVELS.join("/")
        );
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn load(toml: &str) -> KeywardConfig {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", toml).unwrap();
        KeywardConfig::from_file(file.path()).unwrap()
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = load("");
        assert_eq!(config.kdf.iterations, 100_000);
        assert_eq!(config.store.data_dir, PathBuf::from("keyward-data"));
        assert_eq!(config.session.token, "local");
        assert_eq!(config.log.level, "warn");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let config = load(
            r#"
[kdf]
iterations = 310000

[store]
data_dir = "/var/lib/keyward"

[session]
token = "ops-laptop"

[log]
level = "debug"
"#,
        );
        assert_eq!(config.kdf.iterations, 310_000);
        assert_eq!(config.store.data_dir, PathBuf::from("/var/lib/keyward"));
        assert_eq!(config.session.token, "ops-laptop");
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = load("");

        std::env::set_var("KEYWARD_KDF_ITERATIONS", "200000");
        std::env::set_var("KEYWARD_DATA_DIR", "/env/keyward");
        std::env::set_var("KEYWARD_SESSION_TOKEN", "from-env");
        std::env::set_var("KEYWARD_LOG_LEVEL", "trace");

        assert!(config.apply_env_overrides().is_empty());

        assert_eq!(config.kdf.iterations, 200_000);
        assert_eq!(config.store.data_dir, PathBuf::from("/env/keyward"));
        assert_eq!(config.session.token, "from-env");
        assert_eq!(config.log.level, "trace");
        assert!(config.validate().is_ok());

        // Unparseable iteration counts are ignored, the rest still applies
        std::env::set_var("KEYWARD_KDF_ITERATIONS", "300k");
        std::env::set_var("KEYWARD_LOG_LEVEL", "info");
        let ignored = config.apply_env_overrides();
        assert_eq!(ignored.len(), 1);
        assert!(ignored[0].contains("KEYWARD_KDF_ITERATIONS=\"300k\""));
        assert_eq!(config.kdf.iterations, 200_000);
        assert_eq!(config.log.level, "info");

        std::env::remove_var("KEYWARD_KDF_ITERATIONS");
        std::env::remove_var("KEYWARD_DATA_DIR");
        std::env::remove_var("KEYWARD_SESSION_TOKEN");
        std::env::remove_var("KEYWARD_LOG_LEVEL");
    }

    #[test]
    fn test_validation_iterations_floor() {
        let config = load("[kdf]\niterations = 50000\n");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_iterations_ceiling() {
        assert!(load("[kdf]\niterations = 10000000\n").validate().is_ok());
        let err = load("[kdf]\niterations = 10000001\n").validate().unwrap_err();
        assert!(err.to_string().contains("between 100000 and 10000000"));
    }

    #[test]
    fn test_validation_empty_token() {
        let config = load("[session]\ntoken = \"  \"\n");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_bad_log_level() {
        let config = load("[log]\nlevel = \"loud\"\n");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_toml() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "[kdf\niterations = ").unwrap();
        assert!(KeywardConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_serde_roundtrip() {
        let config = load("[kdf]\niterations = 123456\n");
        let serialized = toml::to_string_pretty(&config).unwrap();
        let reparsed: KeywardConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(reparsed.kdf.iterations, 123_456);
        assert_eq!(reparsed.session.token, config.session.token);
    }
}
