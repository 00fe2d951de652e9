use anyhow::{bail, Result};
use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::cli::formatters::{format_metrics, format_snapshot};
use crate::cli::runner::{date_or_today, parse_date, parse_period, parse_price_assignments};
use crate::reports::{get_period_dates, BenchmarkComparison, Period, PortfolioMetrics};

use super::Context;

#[derive(Serialize)]
struct PerformanceOutput {
    #[serde(flatten)]
    metrics: PortfolioMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    benchmark: Option<BenchmarkComparison>,
}

pub async fn dispatch_snapshot(
    ctx: &Context,
    prices: &[String],
    live: bool,
    date: Option<&str>,
) -> Result<()> {
    let portfolio = ctx.selected_portfolio()?;
    let snapshot = if live {
        if date.is_some() {
            bail!("--live always records today's snapshot; drop --date");
        }
        ctx.ledger.snapshot_from_quotes(portfolio.id).await?
    } else {
        let prices = parse_price_assignments(prices)?;
        ctx.ledger
            .record_snapshot(portfolio.id, &prices, date_or_today(date)?)?
    };
    ctx.emit(&snapshot, || format_snapshot(&snapshot, portfolio.base_currency));
    Ok(())
}

pub async fn dispatch_performance(
    ctx: &Context,
    from: Option<&str>,
    to: Option<&str>,
    period: Option<&str>,
    benchmark: Option<&str>,
) -> Result<()> {
    let portfolio = ctx.selected_portfolio()?;
    let today = Utc::now().date_naive();

    let period = match (period, from) {
        (Some(name), _) => parse_period(name)?,
        (None, Some(from)) => Period::Custom {
            from: parse_date(from)?,
            to: date_or_today(to)?,
        },
        (None, None) => Period::Ytd,
    };
    let first_trade = ctx
        .ledger
        .transactions(portfolio.id)?
        .first()
        .map(|t| t.trade_date);
    let (from, to) = get_period_dates(period, today, first_trade)?;
    info!("Performance of {} from {} to {}", portfolio.name, from, to);

    let metrics = ctx.ledger.metrics(portfolio.id, from, to)?;
    let benchmark = match benchmark {
        Some(symbol) => Some(
            ctx.ledger
                .compare_to_benchmark(portfolio.id, symbol, from, to)
                .await?,
        ),
        None => None,
    };

    let output = PerformanceOutput { metrics, benchmark };
    ctx.emit(&output, || {
        format_metrics(&output.metrics, output.benchmark.as_ref(), portfolio.base_currency)
    });
    Ok(())
}
