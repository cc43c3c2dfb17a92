#![deny(unsafe_code)]

mod auth;
mod commands;
mod config;
mod exit_code;
mod output;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use helix_core::crypto::KeyAccessError;
use helix_core::dir::DirectoryError;
use helix_core::fs::file::FileError;
use helix_core::sync::SyncError;

use crate::auth::CredentialOptions;
use crate::commands::sync::IncompleteSync;
use crate::commands::{Context, cleanup, init, inspect, status, sync};
use crate::config::Config;

/// Keep a plaintext directory in sync with a per-file encrypted mirror
#[derive(Parser)]
#[command(name = "helix")]
#[command(author, version)]
#[command(propagate_version = true)]
#[command(after_help = "EXAMPLES:
    # Create an encrypted mirror of ~/Documents and sync it
    helix sync --init ~/Documents ~/Dropbox/docs.hx

    # Preview pending changes (pipe the password from a secret manager)
    echo \"$SECRET\" | helix --password-stdin status ~/Documents ~/Dropbox/docs.hx

    # Use a pair alias (from ~/.config/helix/config.toml)
    helix sync @docs

    # Show the entry stored in an encrypted file
    helix inspect ~/Dropbox/docs.hx/3f2a9c...e9.hx
")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Password (insecure, prefer --password-stdin or HELIX_PASSWORD)
    #[arg(long, env = "HELIX_PASSWORD", hide_env_values = true, global = true)]
    password: Option<String>,

    /// Read the password from stdin (single line)
    #[arg(long, conflicts_with = "password", global = true)]
    password_stdin: bool,

    /// Key file used in addition to (or instead of) the password; repeatable
    #[arg(long, value_name = "PATH", global = true)]
    key_file: Vec<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new encrypted directory
    Init(init::Args),

    /// Synchronize a plaintext directory with its encrypted mirror
    Sync(sync::Args),

    /// List pending changes without applying them
    Status(status::Args),

    /// Recover files left behind by interrupted writes
    Cleanup(cleanup::Args),

    /// Show the entry stored in an encrypted file
    Inspect(inspect::Args),
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::from(exit_code::SUCCESS),
        Err(e) => {
            let code = categorize_error(&e);
            let args: Vec<String> = std::env::args().collect();
            let is_quiet = args.iter().any(|a| a == "-q" || a == "--quiet");
            if !is_quiet {
                eprintln!("Error: {e:#}");
            }
            ExitCode::from(code)
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;

    if !cli.quiet {
        let verbose = if cli.verbose > 0 {
            cli.verbose
        } else {
            config.defaults.verbosity.unwrap_or(0)
        };
        setup_tracing(verbose);
    }

    let ctx = Context {
        credentials: CredentialOptions {
            password: cli.password.clone(),
            password_stdin: cli.password_stdin,
            key_files: cli.key_file.clone(),
        },
        config,
        quiet: cli.quiet,
    };

    match &cli.command {
        Commands::Init(args) => init::execute(&ctx, args),
        Commands::Sync(args) => sync::execute(&ctx, args),
        Commands::Status(args) => status::execute(&ctx, args),
        Commands::Cleanup(args) => cleanup::execute(&ctx, args),
        Commands::Inspect(args) => inspect::execute(&ctx, args),
    }
}

/// Set up tracing based on verbosity; `RUST_LOG` takes precedence.
fn setup_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(io::stderr)
        .init();
}

fn categorize_file_error(e: &FileError) -> Option<u8> {
    if e.is_authentication_failure() {
        return Some(exit_code::AUTH_FAILED);
    }
    if e.is_integrity_violation() {
        return Some(exit_code::INTEGRITY_VIOLATION);
    }
    None
}

fn categorize_io(e: &io::Error) -> Option<u8> {
    match e.kind() {
        io::ErrorKind::PermissionDenied => Some(exit_code::PERMISSION_DENIED),
        io::ErrorKind::NotFound => Some(exit_code::NOT_FOUND),
        _ => None,
    }
}

fn categorize_directory_error(e: &DirectoryError) -> Option<u8> {
    match e {
        DirectoryError::File(e) => categorize_file_error(e),
        DirectoryError::NotInitialized { .. }
        | DirectoryError::AlreadyInitialized { .. }
        | DirectoryError::InvalidHeader { .. } => Some(exit_code::DIRECTORY_INVALID),
        DirectoryError::Io { source, .. } => categorize_io(source),
    }
}

/// Map the error chain to an exit code using typed downcasts.
fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if let Some(incomplete) = cause.downcast_ref::<IncompleteSync>() {
            return if incomplete.failed == 0 {
                exit_code::CONFLICTS
            } else {
                exit_code::GENERAL_ERROR
            };
        }

        if let Some(file_err) = cause.downcast_ref::<FileError>()
            && let Some(code) = categorize_file_error(file_err)
        {
            return code;
        }

        if let Some(dir_err) = cause.downcast_ref::<DirectoryError>()
            && let Some(code) = categorize_directory_error(dir_err)
        {
            return code;
        }

        if let Some(sync_err) = cause.downcast_ref::<SyncError>() {
            if sync_err.is_integrity_violation() {
                return exit_code::INTEGRITY_VIOLATION;
            }
            let code = match sync_err {
                // transparent: the directory error itself is not part of the chain
                SyncError::Directory(e) => categorize_directory_error(e),
                SyncError::Io(source) => categorize_io(source),
                _ => None,
            };
            if let Some(code) = code {
                return code;
            }
        }

        if let Some(KeyAccessError::KeyFile { .. }) = cause.downcast_ref::<KeyAccessError>() {
            return exit_code::NOT_FOUND;
        }

        if let Some(config_err) = cause.downcast_ref::<toml::de::Error>() {
            tracing::debug!(error = %config_err, "Configuration error");
            return exit_code::USAGE_ERROR;
        }
    }
    exit_code::GENERAL_ERROR
}
