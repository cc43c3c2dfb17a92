//! Cleanup command - recover from interrupted writes.
//!
//! `sync` does this automatically; this command needs no password and can be
//! run on any directory.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args as ClapArgs;
use helix_core::fs::cleanup::{CleanupReport, cleanup_tree};
use serde::Serialize;
use tracing::instrument;

use super::Context;

#[derive(ClapArgs, Clone, Debug)]
pub struct Args {
    /// Directories to clean, or @alias of a configured pair
    #[arg(required = true, value_name = "DIR")]
    pub dirs: Vec<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct CleanupOutput {
    directory: String,
    staging_removed: usize,
    backups_restored: usize,
    backups_removed: usize,
}

impl CleanupOutput {
    fn new(directory: &std::path::Path, report: &CleanupReport) -> Self {
        CleanupOutput {
            directory: directory.display().to_string(),
            staging_removed: report.staging_removed.len(),
            backups_restored: report.backups_restored.len(),
            backups_removed: report.backups_removed.len(),
        }
    }
}

fn expand(ctx: &Context, dirs: &[String]) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for dir in dirs {
        if dir.starts_with('@') {
            let pair = ctx.config.resolve_pair(dir, None)?;
            out.push(pair.decrypted);
            out.push(pair.encrypted);
        } else {
            out.push(PathBuf::from(dir));
        }
    }
    Ok(out)
}

#[instrument(level = "info", name = "cmd::cleanup", skip_all)]
pub fn execute(ctx: &Context, args: &Args) -> Result<()> {
    let mut results = Vec::new();
    for dir in expand(ctx, &args.dirs)? {
        let report = cleanup_tree(&dir).with_context(|| format!("Failed to clean {}", dir.display()))?;
        results.push(CleanupOutput::new(&dir, &report));
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else if !ctx.quiet {
        for r in &results {
            println!(
                "{}: removed {} staged, restored {} backups, removed {} backups",
                r.directory, r.staging_removed, r.backups_restored, r.backups_removed
            );
        }
    }
    Ok(())
}
