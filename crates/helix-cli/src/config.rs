//! User configuration: defaults and named directory pairs.
//!
//! Read from `config.toml` in the platform config directory
//! (`~/.config/helix/` on Linux), or from `$HELIX_CONFIG_DIR` when set:
//!
//! ```toml
//! [defaults]
//! verbosity = 1
//!
//! [pairs.docs]
//! decrypted = "/home/me/Documents"
//! encrypted = "/home/me/Dropbox/docs.hx"
//! key_file = "/home/me/.keys/docs.key"
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use serde::Deserialize;

pub const CONFIG_DIR_ENV: &str = "HELIX_CONFIG_DIR";
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub pairs: BTreeMap<String, PairConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Defaults {
    /// Verbosity used when no `-v` flag is given.
    pub verbosity: Option<u8>,
    pub case_sensitive: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PairConfig {
    pub decrypted: PathBuf,
    pub encrypted: PathBuf,
    pub key_file: Option<PathBuf>,
}

pub fn config_dir() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV) {
        return Some(PathBuf::from(dir));
    }
    ProjectDirs::from("", "", "helix").map(|dirs| dirs.config_dir().to_path_buf())
}

impl Config {
    /// Load the user configuration; a missing file yields the defaults.
    pub fn load() -> Result<Self> {
        match config_dir() {
            Some(dir) => Self::load_from(&dir.join(CONFIG_FILE_NAME)),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e).with_context(|| format!("Failed to read config {}", path.display())),
        };
        toml::from_str(&text).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Resolve a pair argument: `@alias` from the config, or a plaintext path
    /// combined with an explicit encrypted path.
    pub fn resolve_pair(&self, pair: &str, encrypted: Option<&Path>) -> Result<PairConfig> {
        if let Some(alias) = pair.strip_prefix('@') {
            if encrypted.is_some() {
                bail!("Pair alias @{alias} already names its encrypted directory");
            }
            return self.pairs.get(alias).cloned().with_context(|| {
                let known: Vec<&str> = self.pairs.keys().map(String::as_str).collect();
                if known.is_empty() {
                    format!("Unknown pair alias @{alias} (no pairs configured)")
                } else {
                    format!("Unknown pair alias @{alias} (configured: {})", known.join(", "))
                }
            });
        }
        let Some(encrypted) = encrypted else {
            bail!("Missing encrypted directory: pass DECRYPTED ENCRYPTED or a configured @alias");
        };
        Ok(PairConfig {
            decrypted: PathBuf::from(pair),
            encrypted: encrypted.to_path_buf(),
            key_file: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[defaults]
verbosity = 2

[pairs.docs]
decrypted = "/home/me/Documents"
encrypted = "/mnt/cloud/docs"
key_file = "/home/me/.keys/docs.key"
"#;

    #[test]
    fn test_parse_sample() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.defaults.verbosity, Some(2));
        let docs = &config.pairs["docs"];
        assert_eq!(docs.encrypted, PathBuf::from("/mnt/cloud/docs"));
        assert!(docs.key_file.is_some());
    }

    #[test]
    fn test_resolve_alias_and_paths() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        let pair = config.resolve_pair("@docs", None).unwrap();
        assert_eq!(pair.decrypted, PathBuf::from("/home/me/Documents"));

        let pair = config.resolve_pair("plain", Some(Path::new("cipher"))).unwrap();
        assert_eq!(pair.encrypted, PathBuf::from("cipher"));
        assert!(pair.key_file.is_none());
    }

    #[test]
    fn test_resolve_errors() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        let err = config.resolve_pair("@missing", None).unwrap_err();
        assert!(err.to_string().contains("configured: docs"));
        assert!(config.resolve_pair("plain", None).is_err());
        assert!(config.resolve_pair("@docs", Some(Path::new("x"))).is_err());
    }

    #[test]
    fn test_missing_file_is_default() {
        let config = Config::load_from(Path::new("/nonexistent/helix/config.toml")).unwrap();
        assert!(config.pairs.is_empty());
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(toml::from_str::<Config>("[pairs.x]\ndecrypted = \"a\"\nencrypted = \"b\"\ncolour = 1\n").is_err());
    }
}
