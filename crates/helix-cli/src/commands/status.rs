//! Status command - list pending changes without applying them.

use anyhow::Result;
use clap::Args as ClapArgs;
use helix_core::sync::{PairOptions, PreSyncDetails, SyncMode};
use serde::Serialize;
use tracing::instrument;

use super::{Context, PairArgs};
use crate::output::create_table;

#[derive(ClapArgs, Clone, Debug)]
pub struct Args {
    #[command(flatten)]
    pub pair: PairArgs,

    /// Include unchanged entries
    #[arg(long, short)]
    pub all: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct StatusEntry {
    name: String,
    encrypted_name: String,
    mode: String,
    operation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<&PreSyncDetails> for StatusEntry {
    fn from(row: &PreSyncDetails) -> Self {
        StatusEntry {
            name: row.display_name().to_string(),
            encrypted_name: row.encr_file_name.clone(),
            mode: format!("{:?}", row.sync_mode),
            operation: row.operation.to_string(),
            error: row.header_error.clone(),
        }
    }
}

#[instrument(level = "info", name = "cmd::status", skip_all, fields(pair = %args.pair.pair))]
pub fn execute(ctx: &Context, args: &Args) -> Result<()> {
    // what-if keeps status strictly read-only
    let mut pair = args.pair.open(ctx, PairOptions::default().what_if(true))?;
    let rows: Vec<PreSyncDetails> = pair
        .status(true)?
        .into_iter()
        .filter(|r| args.all || r.sync_mode != SyncMode::Unchanged)
        .collect();

    if args.json {
        let entries: Vec<StatusEntry> = rows.iter().map(StatusEntry::from).collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if rows.is_empty() {
        if !ctx.quiet {
            println!("Up to date");
        }
        return Ok(());
    }

    let mut table = create_table();
    table.set_header(vec!["", "Direction", "Name", "Encrypted", "Note"]);
    for row in &rows {
        table.add_row(vec![
            row.operation.glyph().to_string(),
            row.direction().to_string(),
            row.display_name().to_string(),
            row.encr_file_name.clone(),
            row.header_error.clone().unwrap_or_default(),
        ]);
    }
    println!("{table}");
    Ok(())
}
