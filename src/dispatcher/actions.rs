use anyhow::Result;
use colored::Colorize;
use std::str::FromStr;
use tracing::info;

use crate::cli::formatters::{format_announcements, format_portfolio_actions};
use crate::cli::runner::{parse_uuid, to_announcement};
use crate::cli::ActionCommands;
use crate::db::PortfolioActionStatus;

use super::Context;

pub fn dispatch_actions(ctx: &Context, action: ActionCommands) -> Result<()> {
    match action {
        ActionCommands::Announce(args) => {
            let announcement = ctx.ledger.announce(to_announcement(&args)?)?;
            ctx.emit(&announcement, || {
                format!(
                    "{} Announced {} for {} effective {} ({})\n",
                    "✓".green().bold(),
                    announcement.kind.as_str(),
                    announcement.symbol.bold(),
                    announcement.effective_date,
                    announcement.id
                )
            });
        }
        ActionCommands::Distribute { id } => {
            let id = parse_uuid(&id, "corporate action")?;
            let queued = ctx.ledger.distribute(id)?;
            info!("Corporate action {} queued for {} portfolios", id, queued.len());
            ctx.emit(&queued, || {
                format!(
                    "{} Queued for {} portfolio(s)\n",
                    "✓".green().bold(),
                    queued.len()
                )
            });
        }
        ActionCommands::Apply => {
            let portfolio = ctx.selected_portfolio()?;
            let processed = ctx.ledger.apply_pending_actions(portfolio.id)?;
            ctx.emit(&processed, || format_portfolio_actions(&processed));
        }
        ActionCommands::List { status } => {
            let portfolio = ctx.selected_portfolio()?;
            let status = status
                .as_deref()
                .map(PortfolioActionStatus::from_str)
                .transpose()?;
            let actions = ctx.ledger.portfolio_actions(portfolio.id, status)?;
            ctx.emit(&actions, || format_portfolio_actions(&actions));
        }
        ActionCommands::Unapplied => {
            let announcements = ctx.ledger.unapplied_announcements()?;
            ctx.emit(&announcements, || format_announcements(&announcements));
        }
    }
    Ok(())
}
