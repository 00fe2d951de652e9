use anyhow::Result;
use colored::Colorize;
use tracing::info;

use crate::cli::formatters::{format_lots, format_transactions};
use crate::cli::runner::{parse_uuid, to_draft};
use crate::cli::TxCommands;
use crate::db::TransactionKind;
use crate::engine::normalize_symbol;
use crate::utils::format_quantity;

use super::Context;

pub async fn dispatch_transactions(ctx: &Context, action: TxCommands) -> Result<()> {
    let portfolio = ctx.selected_portfolio()?;
    match action {
        TxCommands::Add(args) => {
            let mut draft = to_draft(&args)?;
            if draft.kind == TransactionKind::Spinoff && draft.allocation.is_none() {
                draft.allocation = Some(ctx.ledger.config().default_spinoff_allocation);
            }
            let tx = ctx.ledger.add_transaction(portfolio.id, draft).await?;
            info!("Recorded {} {} in {}", tx.kind.as_str(), tx.symbol, portfolio.name);
            ctx.emit(&tx, || {
                format!(
                    "{} Recorded {} {} {} on {} ({})\n",
                    "✓".green().bold(),
                    tx.kind.as_str(),
                    format_quantity(tx.quantity),
                    tx.symbol.bold(),
                    tx.trade_date,
                    tx.id
                )
            });
        }
        TxCommands::Remove { id } => {
            let id = parse_uuid(&id, "transaction")?;
            let tx = ctx.ledger.revoke_transaction(portfolio.id, id)?;
            ctx.emit(&tx, || {
                format!(
                    "{} Removed {} {} from {}\n",
                    "✓".green().bold(),
                    tx.kind.as_str(),
                    tx.symbol.bold(),
                    tx.trade_date
                )
            });
        }
        TxCommands::List { symbol } => {
            let mut transactions = ctx.ledger.transactions(portfolio.id)?;
            if let Some(symbol) = symbol {
                let symbol = normalize_symbol(&symbol)?;
                transactions.retain(|t| t.symbols().contains(&symbol));
            }
            ctx.emit(&transactions, || format_transactions(&transactions));
        }
        TxCommands::Lots { symbol } => {
            let lots = ctx.ledger.lots(portfolio.id, &symbol)?;
            ctx.emit(&lots, || format_lots(&symbol.to_uppercase(), &lots));
        }
        TxCommands::Recalculate { symbol } => {
            let holding = ctx.ledger.recalculate(portfolio.id, &symbol)?;
            ctx.emit(&holding, || match &holding {
                Some(h) => format!(
                    "{} {} rebuilt: {} shares, cost basis {}\n",
                    "✓".green().bold(),
                    h.symbol.bold(),
                    format_quantity(h.quantity),
                    h.cost_basis
                ),
                None => format!(
                    "{} {} rebuilt: position closed\n",
                    "✓".green().bold(),
                    symbol.to_uppercase().bold()
                ),
            });
        }
    }
    Ok(())
}
