use anyhow::{bail, Result};
use colored::Colorize;
use std::path::Path;
use tracing::info;

use crate::cli::formatters::format_import_report;
use crate::cli::runner::parse_uuid;

use super::Context;

pub async fn dispatch_import(ctx: &Context, file: &str, dry_run: bool) -> Result<()> {
    let path = Path::new(file);
    if !path.exists() {
        bail!("File not found: {}", file);
    }
    let portfolio = ctx.selected_portfolio()?;
    info!("Importing transactions from {} into {}", file, portfolio.name);

    let report = ctx.ledger.import_csv(portfolio.id, path, dry_run).await?;
    ctx.emit(&report, || format_import_report(&report));
    Ok(())
}

pub fn dispatch_import_undo(ctx: &Context, batch: &str) -> Result<()> {
    let portfolio = ctx.selected_portfolio()?;
    let batch_id = parse_uuid(batch, "batch")?;
    let removed = ctx.ledger.delete_import_batch(portfolio.id, batch_id)?;
    ctx.emit(
        &serde_json::json!({ "batch_id": batch_id, "removed": removed }),
        || {
            format!(
                "{} Removed {} transactions of batch {}\n",
                "✓".green().bold(),
                removed,
                batch_id
            )
        },
    );
    Ok(())
}
