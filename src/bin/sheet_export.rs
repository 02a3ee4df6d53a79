//! sheet_export - print the rows of one inventory sheet as JSON

use anyhow::Result;
use clap::Parser;
use serde::Serialize;

use tally_kernel::{validate_sheet_id, SheetRow, SheetStore, SqliteSheetStore};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the sheet database.
    #[arg(long, env = "COUNTER_DB_PATH", default_value = "tally.db")]
    db_path: String,
    /// Sheet to export, e.g. sheet:warehouse_a.
    #[arg(long)]
    sheet: String,
    /// Omit per-detection payloads and print only row summaries.
    #[arg(long)]
    summary: bool,
}

#[derive(Serialize)]
struct RowSummary<'a> {
    row_id: &'a str,
    session_id: &'a str,
    template: String,
    quantity: u64,
    recorded_at_ms: u64,
}

#[derive(Serialize)]
struct Export<T: Serialize> {
    sheet_id: String,
    total_quantity: u64,
    rows: Vec<T>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    validate_sheet_id(&args.sheet)?;

    let mut store = SqliteSheetStore::open(&args.db_path)?;
    let rows: Vec<SheetRow> = store.rows(&args.sheet)?;
    let total_quantity = store.total_quantity(&args.sheet)?;
    log::info!("{} rows in {}", rows.len(), args.sheet);

    let out = if args.summary {
        serde_json::to_string_pretty(&Export {
            sheet_id: args.sheet.clone(),
            total_quantity,
            rows: rows
                .iter()
                .map(|r| RowSummary {
                    row_id: &r.row_id,
                    session_id: &r.session_id,
                    template: r.template.to_string(),
                    quantity: r.quantity,
                    recorded_at_ms: r.recorded_at_ms,
                })
                .collect(),
        })?
    } else {
        serde_json::to_string_pretty(&Export {
            sheet_id: args.sheet.clone(),
            total_quantity,
            rows,
        })?
    };
    println!("{}", out);
    Ok(())
}
