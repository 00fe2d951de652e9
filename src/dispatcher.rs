//! Command dispatcher that routes parsed clap commands to the ledger
//! and prints their results.

mod actions;
mod imports;
mod performance;
mod portfolio;
mod transactions;

use anyhow::{anyhow, bail, Result};
use tracing::{debug, info};

use crate::cli::formatters::{format_tax_report, to_json};
use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::db::{Portfolio, SqliteStore};
use crate::ledger::{Ledger, Providers};

/// Everything a command handler needs
pub struct Context {
    pub ledger: Ledger<SqliteStore>,
    pub json: bool,
    portfolio: Option<String>,
}

impl Context {
    pub fn new(ledger: Ledger<SqliteStore>, json: bool, portfolio: Option<String>) -> Self {
        Self {
            ledger,
            json,
            portfolio,
        }
    }

    /// Portfolio named by `--portfolio`, or the only one the caller owns.
    pub fn selected_portfolio(&self) -> Result<Portfolio> {
        if let Some(selector) = &self.portfolio {
            return Ok(self.ledger.portfolio(selector)?);
        }
        let mut portfolios = self.ledger.portfolios()?;
        match portfolios.len() {
            0 => bail!("No portfolios yet. Create one with: lotbook portfolio create <name>"),
            1 => Ok(portfolios.remove(0)),
            _ => {
                let names: Vec<&str> = portfolios.iter().map(|p| p.name.as_str()).collect();
                Err(anyhow!(
                    "Several portfolios exist ({}); choose one with --portfolio",
                    names.join(", ")
                ))
            }
        }
    }

    pub fn emit<T: serde::Serialize>(&self, value: &T, text: impl FnOnce() -> String) {
        if self.json {
            println!("{}", to_json(value));
        } else {
            print!("{}", text());
        }
    }
}

/// Open the configured database and run one command.
pub async fn dispatch(cli: Cli, config: AppConfig) -> Result<()> {
    let path = config.database_path()?;
    debug!("Using database {}", path.display());
    let store = SqliteStore::open(&path)?;
    let providers = Providers::yahoo(&config)?;
    let ledger = Ledger::new(store, config, providers);

    // Ctrl-C abandons pending quote fetches; the store is never left mid-write
    let token = ledger.cancel_token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling pending requests");
            token.cancel();
        }
    });

    let ctx = Context::new(ledger, cli.json, cli.portfolio);
    dispatch_command(&ctx, cli.command).await
}

/// Route a parsed command to its handler
pub async fn dispatch_command(ctx: &Context, command: Commands) -> Result<()> {
    match command {
        Commands::Portfolio { action } => portfolio::dispatch_portfolio(ctx, action),
        Commands::Tx { action } => transactions::dispatch_transactions(ctx, action).await,
        Commands::Import { file, dry_run } => imports::dispatch_import(ctx, &file, dry_run).await,
        Commands::ImportUndo { batch } => imports::dispatch_import_undo(ctx, &batch),
        Commands::Snapshot { prices, live, date } => {
            performance::dispatch_snapshot(ctx, &prices, live, date.as_deref()).await
        }
        Commands::Tax { year } => dispatch_tax(ctx, year),
        Commands::Performance {
            from,
            to,
            period,
            benchmark,
        } => {
            performance::dispatch_performance(
                ctx,
                from.as_deref(),
                to.as_deref(),
                period.as_deref(),
                benchmark.as_deref(),
            )
            .await
        }
        Commands::Actions { action } => actions::dispatch_actions(ctx, action),
    }
}

fn dispatch_tax(ctx: &Context, year: i32) -> Result<()> {
    let portfolio = ctx.selected_portfolio()?;
    info!("Generating realized gains report for {} ({})", portfolio.name, year);
    let report = ctx.ledger.tax_report(portfolio.id, year)?;
    ctx.emit(&report, || format_tax_report(&report, portfolio.base_currency));
    Ok(())
}
