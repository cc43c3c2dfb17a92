//! Init command - create a new encrypted directory.
//!
//! # Examples
//!
//! ```bash
//! helix init ~/Dropbox/docs.hx
//! helix --key-file ~/.keys/docs.key init ~/Dropbox/docs.hx
//! ```

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args as ClapArgs;
use helix_core::dir::EncryptedDirectory;
use helix_core::fs::tree::TreeOptions;
use tracing::instrument;

use super::{Context, FormatVersion};
use crate::auth;

#[derive(ClapArgs, Clone, Debug)]
pub struct Args {
    /// Directory to initialize
    #[arg(value_name = "ENCRYPTED")]
    pub encrypted: PathBuf,

    /// File format version
    #[arg(long, value_enum, default_value = "v1", hide = true)]
    pub file_version: FormatVersion,
}

#[instrument(level = "info", name = "cmd::init", skip_all, fields(encrypted = %args.encrypted.display()))]
pub fn execute(ctx: &Context, args: &Args) -> Result<()> {
    let provider = auth::provider(&ctx.credentials, None, true)?;
    let options = TreeOptions {
        case_sensitive: true,
        what_if: false,
    };
    let directory = EncryptedDirectory::initialize(&args.encrypted, provider, args.file_version.into(), options)
        .with_context(|| format!("Failed to initialize {}", args.encrypted.display()))?;

    if !ctx.quiet {
        println!(
            "Initialized encrypted directory {} (id {})",
            args.encrypted.display(),
            directory.directory_id()
        );
    }
    Ok(())
}
