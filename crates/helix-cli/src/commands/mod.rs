//! Subcommands.

pub mod cleanup;
pub mod init;
pub mod inspect;
pub mod status;
pub mod sync;

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Args as ClapArgs, ValueEnum};
use helix_core::FileVersion;
use helix_core::sync::{DirectoryPair, PairOptions};

use crate::auth::{self, CredentialOptions};
use crate::config::Config;

/// State shared by every subcommand.
pub struct Context {
    pub credentials: CredentialOptions,
    pub config: Config,
    pub quiet: bool,
}

/// File format written into new encrypted directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatVersion {
    V1,
    /// Cheap key derivation for automated tests; never use for real data.
    UnitTest,
}

impl From<FormatVersion> for FileVersion {
    fn from(version: FormatVersion) -> Self {
        match version {
            FormatVersion::V1 => FileVersion::V1,
            FormatVersion::UnitTest => FileVersion::UnitTest,
        }
    }
}

/// A plaintext directory and its encrypted mirror.
#[derive(ClapArgs, Clone, Debug)]
pub struct PairArgs {
    /// Plaintext directory, or @alias of a configured pair
    #[arg(value_name = "DECRYPTED")]
    pub pair: String,

    /// Encrypted directory (omit when using @alias)
    #[arg(value_name = "ENCRYPTED")]
    pub encrypted: Option<PathBuf>,

    /// Compare names case-sensitively (default: platform convention)
    #[arg(long)]
    pub case_sensitive: Option<bool>,
}

impl PairArgs {
    /// Resolve the pair and open it.
    pub fn open(&self, ctx: &Context, options: PairOptions) -> Result<DirectoryPair> {
        let resolved = ctx.config.resolve_pair(&self.pair, self.encrypted.as_deref())?;
        let mut options = options;
        if let Some(case_sensitive) = self.case_sensitive.or(ctx.config.defaults.case_sensitive) {
            options = options.case_sensitive(case_sensitive);
        }
        let creating = options.initialize && !resolved.encrypted.join(helix_core::dir::HEADER_FILE_NAME).exists();
        let provider = auth::provider(&ctx.credentials, resolved.key_file.as_ref(), creating)?;
        DirectoryPair::open(&resolved.decrypted, &resolved.encrypted, provider, options).with_context(|| {
            format!(
                "Failed to open pair {} <-> {}",
                resolved.decrypted.display(),
                resolved.encrypted.display()
            )
        })
    }
}
