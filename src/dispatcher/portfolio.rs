use anyhow::Result;
use colored::Colorize;
use std::str::FromStr;

use crate::cli::formatters::{format_holdings, format_portfolios};
use crate::cli::PortfolioCommands;
use crate::db::CostBasisPolicy;
use crate::engine::portfolios::{PortfolioDraft, PortfolioUpdate};
use crate::money::Currency;

use super::Context;

pub fn dispatch_portfolio(ctx: &Context, action: PortfolioCommands) -> Result<()> {
    match action {
        PortfolioCommands::Create {
            name,
            currency,
            policy,
            description,
        } => {
            let portfolio = ctx.ledger.create_portfolio(PortfolioDraft {
                name,
                description,
                base_currency: Currency::from_str(&currency)?,
                cost_basis_policy: CostBasisPolicy::from_str(&policy)?,
            })?;
            ctx.emit(&portfolio, || {
                format!(
                    "{} Created portfolio {} ({})\n",
                    "✓".green().bold(),
                    portfolio.name.bold(),
                    portfolio.id
                )
            });
            Ok(())
        }
        PortfolioCommands::List => {
            let portfolios = ctx.ledger.portfolios()?;
            ctx.emit(&portfolios, || format_portfolios(&portfolios));
            Ok(())
        }
        PortfolioCommands::Show => {
            let portfolio = ctx.selected_portfolio()?;
            tracing::info!("Showing holdings of {}", portfolio.name);
            let holdings = ctx.ledger.holdings(portfolio.id)?;
            ctx.emit(&holdings, || format_holdings(&portfolio, &holdings));
            Ok(())
        }
        PortfolioCommands::Update {
            name,
            description,
            policy,
        } => {
            let portfolio = ctx.selected_portfolio()?;
            let update = PortfolioUpdate {
                name,
                description: description.map(|d| if d.is_empty() { None } else { Some(d) }),
                cost_basis_policy: policy
                    .as_deref()
                    .map(CostBasisPolicy::from_str)
                    .transpose()?,
            };
            let updated = ctx.ledger.update_portfolio(portfolio.id, update)?;
            ctx.emit(&updated, || {
                format!(
                    "{} Updated portfolio {} ({})\n",
                    "✓".green().bold(),
                    updated.name.bold(),
                    updated.cost_basis_policy.as_str()
                )
            });
            Ok(())
        }
        PortfolioCommands::Delete { name } => {
            let portfolio = ctx.ledger.portfolio(&name)?;
            ctx.ledger.delete_portfolio(portfolio.id)?;
            ctx.emit(&serde_json::json!({ "deleted": portfolio.id }), || {
                format!(
                    "{} Deleted portfolio {}\n",
                    "✓".green().bold(),
                    portfolio.name.bold()
                )
            });
            Ok(())
        }
    }
}
