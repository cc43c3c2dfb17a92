//! Sync command - run one synchronization pass over a pair.
//!
//! # Examples
//!
//! ```bash
//! # First run: create the encrypted directory and encrypt everything
//! helix sync --init ~/Documents ~/Dropbox/docs.hx
//!
//! # Preview what would change
//! helix sync --what-if @docs
//!
//! # Let the encrypted side win every conflict
//! helix sync --resolve encrypted @docs
//! ```

use std::fmt;

use anyhow::Result;
use clap::{Args as ClapArgs, ValueEnum};
use helix_core::sync::{ConflictSide, PairOptions, PreSyncDetails, SyncMode, SyncResult, SyncSummary};
use tracing::instrument;

use super::{Context, FormatVersion, PairArgs};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Side {
    Decrypted,
    Encrypted,
}

impl From<Side> for ConflictSide {
    fn from(side: Side) -> Self {
        match side {
            Side::Decrypted => ConflictSide::Decrypted,
            Side::Encrypted => ConflictSide::Encrypted,
        }
    }
}

#[derive(ClapArgs, Clone, Debug)]
pub struct Args {
    #[command(flatten)]
    pub pair: PairArgs,

    /// Show what would change without touching either directory
    #[arg(long, short = 'n')]
    pub what_if: bool,

    /// Create the encrypted directory if it does not exist
    #[arg(long)]
    pub init: bool,

    /// Resolve conflicts in favor of one side
    #[arg(long, value_enum)]
    pub resolve: Option<Side>,

    /// File format version for a newly created encrypted directory
    #[arg(long, value_enum, default_value = "v1", hide = true)]
    pub file_version: FormatVersion,
}

/// A pass that left failures or unresolved conflicts behind.
#[derive(Debug)]
pub struct IncompleteSync {
    pub failed: usize,
    pub conflicts: usize,
}

impl fmt::Display for IncompleteSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.failed, self.conflicts) {
            (0, c) => write!(f, "{c} conflict(s) need resolution (use --resolve)"),
            (n, 0) => write!(f, "{n} change(s) failed"),
            (n, c) => write!(f, "{n} change(s) failed and {c} conflict(s) need resolution"),
        }
    }
}

impl std::error::Error for IncompleteSync {}

fn print_result(quiet: bool, change: &PreSyncDetails, result: &SyncResult) {
    match result {
        SyncResult::Synced(_) if !quiet => println!("{change}"),
        SyncResult::Skipped(_) if change.sync_mode == SyncMode::Conflict => {
            eprintln!("conflict: {}", change.display_name());
        }
        SyncResult::Failed(e) => eprintln!("failed: {}: {e}", change.display_name()),
        _ => {}
    }
}

#[instrument(level = "info", name = "cmd::sync", skip_all, fields(pair = %args.pair.pair))]
pub fn execute(ctx: &Context, args: &Args) -> Result<()> {
    let options = PairOptions::default()
        .what_if(args.what_if)
        .initialize(args.init)
        .file_version(args.file_version.into());
    let mut pair = args.pair.open(ctx, options)?;

    let quiet = ctx.quiet;
    let mut summary: SyncSummary = pair.sync_all(&mut |change: &PreSyncDetails, result: &SyncResult| {
        print_result(quiet, change, result);
    })?;

    if let Some(side) = args.resolve
        && summary.conflicts > 0
    {
        let conflicts: Vec<PreSyncDetails> = pair
            .find_changes(true)?
            .into_iter()
            .filter(|c| c.sync_mode == SyncMode::Conflict)
            .collect();
        for change in &conflicts {
            let result = pair.resolve_conflict(change, side.into());
            print_result(quiet, change, &result);
            match result {
                SyncResult::Synced(_) => {
                    summary.conflicts -= 1;
                    summary.synced += 1;
                }
                SyncResult::Failed(_) => {
                    summary.conflicts -= 1;
                    summary.failed += 1;
                }
                SyncResult::Skipped(_) => {}
            }
        }
    }

    if !quiet {
        let prefix = if args.what_if { "What-if: " } else { "" };
        println!(
            "{prefix}{} synced, {} conflicts, {} failed",
            summary.synced, summary.conflicts, summary.failed
        );
    }
    if summary.is_clean() {
        Ok(())
    } else {
        Err(IncompleteSync {
            failed: summary.failed,
            conflicts: summary.conflicts,
        }
        .into())
    }
}
