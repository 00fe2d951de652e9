//! Performance analytics over snapshots and transactions
//!
//! Everything here is read-only. Time-weighted return chains sub-period
//! returns between adjacent snapshots, neutralising external cash flows
//! (purchases add money, sales take it out). Money-weighted return is the
//! IRR of the same flows, solved with Newton-Raphson in `f64`.

use chrono::{Datelike, NaiveDate, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, MathematicalOps};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::db::{authorize, PerformanceSnapshot, Store, StoreTx, Transaction, TransactionKind};
use crate::error::{Error, Result};
use crate::money::{div_round, round_money};
use crate::pricing::{with_deadline, HistoricalProvider};
use crate::utils::cancel::CancellationToken;

/// Days per year used for annualisation and IRR exponents
pub const DAYS_PER_YEAR: f64 = 365.25;
/// How far `snapshot_near` looks on either side of the requested date
pub const SNAPSHOT_WINDOW_DAYS: i64 = 7;

const IRR_GUESS: f64 = 0.1;
const IRR_MAX_ITERATIONS: usize = 100;
const IRR_TOLERANCE: f64 = 1e-4;
const IRR_MIN_RATE: f64 = -0.99;
const IRR_MAX_RATE: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Mtd,     // Month-to-date
    Qtd,     // Quarter-to-date
    Ytd,     // Year-to-date
    OneYear, // Last 365 days
    AllTime, // Since first transaction
    Custom { from: NaiveDate, to: NaiveDate },
}

/// Resolve a period to dates. `AllTime` starts at `first_trade`, or a year
/// back when the portfolio has no history.
pub fn get_period_dates(
    period: Period,
    today: NaiveDate,
    first_trade: Option<NaiveDate>,
) -> Result<(NaiveDate, NaiveDate)> {
    let invalid = |what: &str| Error::Internal(format!("failed to compute {}", what));
    let (start, end) = match period {
        Period::Mtd => {
            let start = NaiveDate::from_ymd_opt(today.year(), today.month(), 1)
                .ok_or_else(|| invalid("month start"))?;
            (start, today)
        }
        Period::Qtd => {
            let quarter_start_month = ((today.month() - 1) / 3) * 3 + 1;
            let start = NaiveDate::from_ymd_opt(today.year(), quarter_start_month, 1)
                .ok_or_else(|| invalid("quarter start"))?;
            (start, today)
        }
        Period::Ytd => {
            let start = NaiveDate::from_ymd_opt(today.year(), 1, 1)
                .ok_or_else(|| invalid("year start"))?;
            (start, today)
        }
        Period::OneYear => {
            let start = today
                .checked_sub_days(chrono::Days::new(365))
                .ok_or_else(|| invalid("one-year start"))?;
            (start, today)
        }
        Period::AllTime => {
            let start = first_trade.unwrap_or_else(|| {
                today
                    .checked_sub_days(chrono::Days::new(365))
                    .unwrap_or(today)
            });
            (start, today)
        }
        Period::Custom { from, to } => {
            if from > to {
                return Err(Error::validation("period start must not be after its end"));
            }
            (from, to)
        }
    };
    Ok((start, end))
}

/// Net external cash flow (Buy cost minus Sell proceeds) dated in `(after, through]`.
pub fn net_cash_flow(transactions: &[Transaction], after: NaiveDate, through: NaiveDate) -> Decimal {
    transactions
        .iter()
        .filter(|t| t.trade_date > after && t.trade_date <= through)
        .map(|t| match t.kind {
            TransactionKind::Buy => t.total_cost_base(),
            TransactionKind::Sell => -t.proceeds_base(),
            _ => Decimal::ZERO,
        })
        .sum()
}

/// Cumulative time-weighted return over ascending snapshots.
///
/// Periods whose starting value is not positive are skipped.
pub fn time_weighted_return(
    snapshots: &[PerformanceSnapshot],
    transactions: &[Transaction],
) -> Result<Decimal> {
    if snapshots.len() < 2 {
        return Err(Error::InsufficientData(format!(
            "time-weighted return needs at least 2 snapshots, found {}",
            snapshots.len()
        )));
    }
    let mut ordered: Vec<&PerformanceSnapshot> = snapshots.iter().collect();
    ordered.sort_by_key(|s| s.date);

    let mut growth = Decimal::ONE;
    for pair in ordered.windows(2) {
        let (prev, cur) = (pair[0], pair[1]);
        if prev.total_value <= Decimal::ZERO {
            debug!("Skipping period {} - {}: no starting value", prev.date, cur.date);
            continue;
        }
        let flow = net_cash_flow(transactions, prev.date, cur.date);
        let period_return = div_round(cur.total_value - flow, prev.total_value)? - Decimal::ONE;
        growth *= Decimal::ONE + period_return;
    }
    Ok(round_money(growth - Decimal::ONE))
}

/// `(1 + r)^(1/years) - 1` with `years = days / 365.25`.
pub fn annualize(total_return: Decimal, days: i64) -> Result<Decimal> {
    if days <= 0 {
        return Err(Error::InsufficientData(
            "cannot annualise a return over an empty period".to_string(),
        ));
    }
    let base = Decimal::ONE + total_return;
    if base <= Decimal::ZERO {
        return Ok(-Decimal::ONE);
    }
    let years = div_round(Decimal::from(days), Decimal::new(36525, 2))?;
    let exponent = div_round(Decimal::ONE, years)?;
    let grown = base.checked_powd(exponent).ok_or_else(|| {
        Error::InsufficientData(format!(
            "annualised return of {} over {} days is out of range",
            total_return, days
        ))
    })?;
    Ok(round_money(grown - Decimal::ONE))
}

fn annualize_or_none(total_return: Decimal, days: i64) -> Option<Decimal> {
    match annualize(total_return, days) {
        Ok(rate) => Some(rate),
        Err(err) => {
            debug!("Leaving return {} unannualised: {}", total_return, err);
            None
        }
    }
}

/// Internal rate of return as found by the solver
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MwrResult {
    pub rate: f64,
    pub converged: bool,
    pub iterations: usize,
}

impl MwrResult {
    pub fn rate_decimal(&self) -> Decimal {
        Decimal::from_f64(self.rate)
            .map(|d| d.round_dp(8))
            .unwrap_or_default()
    }
}

/// NPV and its derivative at `rate` for `(amount, years)` flows.
fn npv_and_derivative(flows: &[(f64, f64)], rate: f64) -> (f64, f64) {
    let mut npv = 0.0;
    let mut dnpv = 0.0;
    for (amount, years) in flows {
        let discount = (1.0 + rate).powf(*years);
        npv += amount / discount;
        // d/dr [cf / (1+r)^t] = -t * cf / (1+r)^(t+1)
        dnpv -= years * amount / (discount * (1.0 + rate));
    }
    (npv, dnpv)
}

/// Solve `Σ cf / (1+r)^y = 0` for dated cash flows (negative = money in).
pub fn irr(flows: &[(NaiveDate, Decimal)]) -> Result<MwrResult> {
    if flows.len() < 2 {
        return Err(Error::InsufficientCashFlows(format!(
            "money-weighted return needs at least 2 cash flows, found {}",
            flows.len()
        )));
    }
    let first = flows.iter().map(|(d, _)| *d).min().unwrap_or(flows[0].0);
    let series: Vec<(f64, f64)> = flows
        .iter()
        .map(|(date, amount)| {
            let years = (*date - first).num_days() as f64 / DAYS_PER_YEAR;
            (amount.to_f64().unwrap_or(0.0), years)
        })
        .collect();

    let mut rate = IRR_GUESS;
    for iteration in 0..IRR_MAX_ITERATIONS {
        let (npv, dnpv) = npv_and_derivative(&series, rate);
        if npv.abs() < IRR_TOLERANCE {
            return Ok(MwrResult {
                rate,
                converged: true,
                iterations: iteration,
            });
        }
        if dnpv == 0.0 || !dnpv.is_finite() {
            return Err(Error::InsufficientCashFlows(
                "cash flows have no sensitivity to the rate".to_string(),
            ));
        }
        rate = (rate - npv / dnpv).clamp(IRR_MIN_RATE, IRR_MAX_RATE);
    }

    Ok(MwrResult {
        rate,
        converged: false,
        iterations: IRR_MAX_ITERATIONS,
    })
}

/// Cash-flow series for the money-weighted return between two snapshots.
pub fn mwr_cash_flows(
    start: &PerformanceSnapshot,
    end: &PerformanceSnapshot,
    transactions: &[Transaction],
) -> Vec<(NaiveDate, Decimal)> {
    let mut flows = vec![(start.date, -start.total_value)];
    for tx in transactions
        .iter()
        .filter(|t| t.trade_date >= start.date && t.trade_date <= end.date)
    {
        match tx.kind {
            TransactionKind::Buy => flows.push((tx.trade_date, -tx.total_cost_base())),
            TransactionKind::Sell => flows.push((tx.trade_date, tx.proceeds_base())),
            _ => {}
        }
    }
    flows.push((end.date, end.total_value));
    flows
}

fn nearest_snapshot(
    unit: &dyn StoreTx,
    portfolio_id: Uuid,
    date: NaiveDate,
) -> Result<PerformanceSnapshot> {
    if let Some(exact) = unit.get_snapshot(portfolio_id, date)? {
        return Ok(exact);
    }
    let window = chrono::Days::new(SNAPSHOT_WINDOW_DAYS as u64);
    let from = date.checked_sub_days(window).unwrap_or(date);
    let to = date.checked_add_days(window).unwrap_or(date);
    unit.find_snapshots_in_range(portfolio_id, from, to)?
        .into_iter()
        .min_by_key(|s| ((s.date - date).num_days().abs(), s.date))
        .ok_or_else(|| {
            Error::InsufficientData(format!(
                "no snapshot within {} days of {}",
                SNAPSHOT_WINDOW_DAYS, date
            ))
        })
}

/// Snapshot on `date`, or the closest one within a week of it.
pub fn snapshot_near<S: Store>(
    store: &S,
    owner_id: Uuid,
    portfolio_id: Uuid,
    date: NaiveDate,
) -> Result<PerformanceSnapshot> {
    store.read(|unit| {
        authorize(unit, owner_id, portfolio_id)?;
        nearest_snapshot(unit, portfolio_id, date)
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TwrReport {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub snapshots: usize,
    pub total_return: Decimal,
    /// `None` when the period is empty or the growth overflows
    pub annualized_return: Option<Decimal>,
}

pub fn twr<S: Store>(
    store: &S,
    owner_id: Uuid,
    portfolio_id: Uuid,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<TwrReport> {
    if from > to {
        return Err(Error::validation("period start must not be after its end"));
    }
    let (snapshots, transactions) = store.read(|unit| {
        authorize(unit, owner_id, portfolio_id)?;
        Ok((
            unit.find_snapshots_in_range(portfolio_id, from, to)?,
            unit.find_transactions_in_range(portfolio_id, None, from, to)?,
        ))
    })?;
    let total_return = time_weighted_return(&snapshots, &transactions)?;
    Ok(TwrReport {
        from,
        to,
        snapshots: snapshots.len(),
        total_return,
        annualized_return: annualize_or_none(total_return, (to - from).num_days()),
    })
}

pub fn mwr<S: Store>(
    store: &S,
    owner_id: Uuid,
    portfolio_id: Uuid,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<MwrResult> {
    if from > to {
        return Err(Error::validation("period start must not be after its end"));
    }
    let (start, end, transactions) = store.read(|unit| {
        authorize(unit, owner_id, portfolio_id)?;
        let start = nearest_snapshot(unit, portfolio_id, from)?;
        let end = nearest_snapshot(unit, portfolio_id, to)?;
        let transactions =
            unit.find_transactions_in_range(portfolio_id, None, start.date, end.date)?;
        Ok((start, end, transactions))
    })?;
    if start.date >= end.date {
        return Err(Error::InsufficientCashFlows(format!(
            "start and end snapshot coincide on {}",
            start.date
        )));
    }
    irr(&mwr_cash_flows(&start, &end, &transactions))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkReturn {
    pub symbol: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub start_price: Decimal,
    pub end_price: Decimal,
    pub total_return: Decimal,
    pub annualized_return: Option<Decimal>,
}

/// `(last - first) / first` over the benchmark's closes in the range.
pub async fn benchmark_return(
    provider: &dyn HistoricalProvider,
    symbol: &str,
    from: NaiveDate,
    to: NaiveDate,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<BenchmarkReturn> {
    let mut bars = with_deadline(
        &format!("history for {}", symbol),
        timeout,
        cancel,
        provider.get_historical(symbol, from, to),
    )
    .await?;
    bars.sort_by_key(|b| b.date);

    let (first, last) = match (bars.first(), bars.last()) {
        (Some(first), Some(last)) if bars.len() >= 2 => (first, last),
        _ => {
            return Err(Error::InsufficientData(format!(
                "benchmark {} needs at least 2 prices between {} and {}",
                symbol, from, to
            )))
        }
    };
    if first.close <= Decimal::ZERO {
        return Err(Error::InsufficientData(format!(
            "benchmark {} starts at a non-positive price",
            symbol
        )));
    }
    let total_return = round_money(div_round(last.close - first.close, first.close)?);
    Ok(BenchmarkReturn {
        symbol: symbol.to_string(),
        from: first.date,
        to: last.date,
        start_price: first.close,
        end_price: last.close,
        total_return,
        annualized_return: annualize_or_none(total_return, (last.date - first.date).num_days()),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkComparison {
    pub portfolio: TwrReport,
    pub benchmark: BenchmarkReturn,
    /// Portfolio annualised minus benchmark annualised, when both exist
    pub alpha: Option<Decimal>,
}

#[allow(clippy::too_many_arguments)]
pub async fn compare_to_benchmark<S: Store>(
    store: &S,
    owner_id: Uuid,
    portfolio_id: Uuid,
    provider: &dyn HistoricalProvider,
    benchmark: &str,
    from: NaiveDate,
    to: NaiveDate,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<BenchmarkComparison> {
    let portfolio = twr(store, owner_id, portfolio_id, from, to)?;
    let benchmark = benchmark_return(provider, benchmark, from, to, timeout, cancel).await?;
    Ok(BenchmarkComparison {
        alpha: portfolio
            .annualized_return
            .zip(benchmark.annualized_return)
            .map(|(p, b)| p - b),
        portfolio,
        benchmark,
    })
}

/// Aggregate figures for a period
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioMetrics {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub market_value: Decimal,
    pub cost_basis: Decimal,
    pub unrealized_gain: Decimal,
    pub realized_gain: Decimal,
    pub dividend_income: Decimal,
    pub twr: Option<Decimal>,
    pub annualized_twr: Option<Decimal>,
    pub mwr: Option<MwrResult>,
}

/// Returns that lack enough data come back as `None` instead of failing.
pub fn portfolio_metrics<S: Store>(
    store: &S,
    owner_id: Uuid,
    portfolio_id: Uuid,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<PortfolioMetrics> {
    if from > to {
        return Err(Error::validation("period start must not be after its end"));
    }
    let (end_snapshot, holdings, gains, dividends) = store.read(|unit| {
        authorize(unit, owner_id, portfolio_id)?;
        let end_snapshot = match nearest_snapshot(unit, portfolio_id, to) {
            Ok(s) => Some(s),
            Err(Error::InsufficientData(_)) => None,
            Err(e) => return Err(e),
        };
        let holdings = unit.list_holdings(portfolio_id)?;
        let gains = unit.list_realized_gains(portfolio_id, Some(from), Some(to))?;
        let dividends: Decimal = unit
            .find_transactions_in_range(portfolio_id, None, from, to)?
            .iter()
            .filter(|t| t.kind == TransactionKind::Dividend)
            .map(|t| t.cash_base())
            .sum();
        Ok((end_snapshot, holdings, gains, dividends))
    })?;

    let (market_value, cost_basis) = match &end_snapshot {
        Some(s) => (s.total_value, s.total_cost_basis),
        None => {
            let cost: Decimal = holdings.iter().map(|h| h.cost_basis).sum();
            (cost, cost)
        }
    };

    let soft = |e: &Error| matches!(e, Error::InsufficientData(_) | Error::InsufficientCashFlows(_));
    let (twr_total, twr_annual) = match twr(store, owner_id, portfolio_id, from, to) {
        Ok(r) => (Some(r.total_return), r.annualized_return),
        Err(e) if soft(&e) => (None, None),
        Err(e) => return Err(e),
    };
    let mwr = match mwr(store, owner_id, portfolio_id, from, to) {
        Ok(r) => Some(r),
        Err(e) if soft(&e) => None,
        Err(e) => return Err(e),
    };

    Ok(PortfolioMetrics {
        from,
        to,
        market_value,
        cost_basis,
        unrealized_gain: market_value - cost_basis,
        realized_gain: gains.iter().map(|g| g.gain).sum(),
        dividend_income: dividends,
        twr: twr_total,
        annualized_twr: twr_annual,
        mwr,
    })
}

/// Metrics for a named period ending today.
pub fn calculate_performance<S: Store>(
    store: &S,
    owner_id: Uuid,
    portfolio_id: Uuid,
    period: Period,
) -> Result<PortfolioMetrics> {
    let first_trade = store.read(|unit| {
        authorize(unit, owner_id, portfolio_id)?;
        Ok(unit
            .list_transactions(portfolio_id)?
            .first()
            .map(|t| t.trade_date))
    })?;
    let (from, to) = get_period_dates(period, Utc::now().date_naive(), first_trade)?;
    portfolio_metrics(store, owner_id, portfolio_id, from, to)
}
