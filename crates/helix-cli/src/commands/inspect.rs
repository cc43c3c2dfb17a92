//! Inspect command - show the entry stored in an encrypted file.
//!
//! Only the header block is decrypted; the content is not read.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args as ClapArgs;
use helix_core::fs::file::decrypt_header;
use serde::Serialize;
use tracing::instrument;

use super::Context;
use crate::auth;
use crate::output::{create_table, format_entry_type, format_size, format_time};

#[derive(ClapArgs, Clone, Debug)]
pub struct Args {
    /// Encrypted `.hx` file
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct InspectOutput {
    file: String,
    name: String,
    #[serde(rename = "type")]
    entry_type: String,
    modified: String,
    length: u64,
}

#[instrument(level = "info", name = "cmd::inspect", skip_all, fields(file = %args.file.display()))]
pub fn execute(ctx: &Context, args: &Args) -> Result<()> {
    let provider = auth::provider(&ctx.credentials, None, false)?;
    let entry = decrypt_header(&args.file, &provider)
        .with_context(|| format!("Failed to read header of {}", args.file.display()))?;

    if args.json {
        let output = InspectOutput {
            file: args.file.display().to_string(),
            name: entry.file_name.clone(),
            entry_type: format_entry_type(entry.entry_type).to_string(),
            modified: entry.last_write_time_utc.to_rfc3339(),
            length: entry.length,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        let mut table = create_table();
        table.set_header(vec!["Property", "Value"]);
        table.add_row(vec!["Name", entry.file_name.as_str()]);
        table.add_row(vec!["Type", format_entry_type(entry.entry_type)]);
        table.add_row(vec!["Modified".to_string(), format_time(entry.last_write_time_utc)]);
        table.add_row(vec!["Length".to_string(), format_size(entry.length)]);
        println!("{table}");
    }
    Ok(())
}
