//! Portfolio valuation snapshots
//!
//! Prices are read as amounts in the portfolio base currency. A holding with
//! no price is valued at its cost basis.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{authorize, Holding, PerformanceSnapshot, Store};
use crate::engine;
use crate::error::{Error, Result};
use crate::money::{div_round, round_money};
use crate::pricing::{with_deadline, QuoteProvider};
use crate::utils::cancel::CancellationToken;

/// Market value of holdings under `prices`, plus the count of holdings that fell back to cost.
pub fn value_holdings(holdings: &[Holding], prices: &HashMap<String, Decimal>) -> (Decimal, usize) {
    let mut missing = 0;
    let value = holdings
        .iter()
        .map(|h| match prices.get(&h.symbol) {
            Some(price) => round_money(h.quantity * price),
            None => {
                missing += 1;
                h.cost_basis
            }
        })
        .sum();
    (value, missing)
}

fn pct_of(numerator: Decimal, denominator: Decimal) -> Result<Decimal> {
    if denominator.is_zero() {
        return Ok(Decimal::ZERO);
    }
    Ok(round_money(div_round(numerator, denominator)? * Decimal::ONE_HUNDRED))
}

/// Record (or overwrite) the snapshot for `date`, valuing the positions held
/// at the end of that day.
pub fn record<S: Store>(
    store: &S,
    owner_id: Uuid,
    portfolio_id: Uuid,
    prices: &HashMap<String, Decimal>,
    date: NaiveDate,
) -> Result<PerformanceSnapshot> {
    if date > Utc::now().date_naive() {
        return Err(Error::validation(format!("snapshot date {} is in the future", date)));
    }
    let prices: HashMap<String, Decimal> = prices
        .iter()
        .map(|(symbol, price)| (symbol.trim().to_ascii_uppercase(), *price))
        .collect();
    if let Some((symbol, price)) = prices.iter().find(|(_, p)| **p < Decimal::ZERO) {
        return Err(Error::validation(format!(
            "price for {} must not be negative, got {}",
            symbol, price
        )));
    }

    let snapshot = store.write(|unit| {
        let portfolio = authorize(&*unit, owner_id, portfolio_id)?;
        let holdings = engine::book_as_of(&*unit, &portfolio, date)?.holdings()?;
        let (total_value, missing) = value_holdings(&holdings, &prices);
        if missing > 0 {
            warn!(
                "{} holding(s) without a price valued at cost on {}",
                missing, date
            );
        }
        let total_cost_basis: Decimal = holdings.iter().map(|h| h.cost_basis).sum();
        let total_return = total_value - total_cost_basis;

        let previous = match date.pred_opt() {
            Some(prev) => unit.get_snapshot(portfolio_id, prev)?,
            None => None,
        };
        let (day_change, day_change_pct) = match previous {
            Some(prev) => {
                let change = total_value - prev.total_value;
                let pct = if prev.total_value.is_zero() {
                    None
                } else {
                    Some(pct_of(change, prev.total_value)?)
                };
                (Some(change), pct)
            }
            None => (None, None),
        };

        let existing = unit.get_snapshot(portfolio_id, date)?;
        let snapshot = PerformanceSnapshot {
            id: existing.map(|s| s.id).unwrap_or_else(Uuid::new_v4),
            portfolio_id,
            date,
            total_value,
            total_cost_basis,
            total_return,
            total_return_pct: pct_of(total_return, total_cost_basis)?,
            day_change,
            day_change_pct,
            created_at: Utc::now(),
        };
        unit.upsert_snapshot(&snapshot)?;
        Ok(snapshot)
    })?;

    info!(
        "Recorded snapshot for portfolio {} on {}: value {} cost {}",
        portfolio_id, snapshot.date, snapshot.total_value, snapshot.total_cost_basis
    );
    Ok(snapshot)
}

/// Fetch quotes for every held symbol and record today's snapshot.
///
/// `timeout` bounds the whole batch fetch (see [`crate::pricing::BATCH_TIMEOUT`]).
pub async fn record_from_quotes<S: Store>(
    store: &S,
    owner_id: Uuid,
    portfolio_id: Uuid,
    provider: &dyn QuoteProvider,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<PerformanceSnapshot> {
    let symbols: Vec<String> = store.read(|unit| {
        authorize(unit, owner_id, portfolio_id)?;
        Ok(unit
            .list_holdings(portfolio_id)?
            .into_iter()
            .map(|h| h.symbol)
            .collect())
    })?;

    let quotes = with_deadline("batch quote fetch", timeout, cancel, async {
        Ok(provider.get_quotes(&symbols).await)
    })
    .await?;

    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    let prices: HashMap<String, Decimal> = quotes
        .into_iter()
        .map(|(symbol, quote)| (symbol, quote.price))
        .collect();
    record(store, owner_id, portfolio_id, &prices, Utc::now().date_naive())
}

pub fn latest<S: Store>(
    store: &S,
    owner_id: Uuid,
    portfolio_id: Uuid,
) -> Result<Option<PerformanceSnapshot>> {
    store.read(|unit| {
        authorize(unit, owner_id, portfolio_id)?;
        unit.find_latest_snapshot(portfolio_id)
    })
}

pub fn in_range<S: Store>(
    store: &S,
    owner_id: Uuid,
    portfolio_id: Uuid,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<PerformanceSnapshot>> {
    store.read(|unit| {
        authorize(unit, owner_id, portfolio_id)?;
        unit.find_snapshots_in_range(portfolio_id, from, to)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CostBasisPolicy, MemoryStore, TransactionDraft};
    use crate::engine::apply_transaction;
    use crate::engine::portfolios::{create_portfolio, PortfolioDraft};
    use crate::money::Currency;
    use crate::pricing::StaticPrices;
    use rust_decimal_macros::dec;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn setup() -> (MemoryStore, Uuid, Uuid) {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let p = create_portfolio(
            &store,
            owner,
            PortfolioDraft {
                name: "Main".to_string(),
                description: None,
                base_currency: Currency::USD,
                cost_basis_policy: CostBasisPolicy::Fifo,
            },
        )
        .unwrap();
        for (symbol, qty, px) in [("AAPL", dec!(10), dec!(100)), ("MSFT", dec!(5), dec!(200))] {
            apply_transaction(
                &store,
                owner,
                p.id,
                TransactionDraft::buy(symbol, date("2024-01-02"), qty, px),
            )
            .unwrap();
        }
        (store, owner, p.id)
    }

    #[test]
    fn test_missing_price_falls_back_to_cost() {
        let (store, owner, pid) = setup();
        let prices = HashMap::from([("aapl".to_string(), dec!(110))]);
        let snap = record(&store, owner, pid, &prices, date("2024-02-01")).unwrap();
        assert_eq!(snap.total_value, dec!(2100));
        assert_eq!(snap.total_cost_basis, dec!(2000));
        assert_eq!(snap.total_return, dec!(100));
        assert_eq!(snap.total_return_pct, dec!(5));
        assert_eq!(snap.day_change, None);
    }

    #[test]
    fn test_same_day_overwrites_and_day_change_uses_previous_day() {
        let (store, owner, pid) = setup();
        let first = HashMap::from([("AAPL".to_string(), dec!(100)), ("MSFT".to_string(), dec!(200))]);
        record(&store, owner, pid, &first, date("2024-02-01")).unwrap();

        let second = HashMap::from([("AAPL".to_string(), dec!(120)), ("MSFT".to_string(), dec!(200))]);
        let a = record(&store, owner, pid, &second, date("2024-02-02")).unwrap();
        let third = HashMap::from([("AAPL".to_string(), dec!(130)), ("MSFT".to_string(), dec!(200))]);
        let b = record(&store, owner, pid, &third, date("2024-02-02")).unwrap();

        assert_eq!(a.id, b.id);
        assert_eq!(b.day_change, Some(dec!(300)));
        assert_eq!(b.day_change_pct, Some(dec!(15)));
        let all = in_range(&store, owner, pid, date("2024-01-01"), date("2024-12-31")).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].total_value, dec!(2300));
    }

    #[test]
    fn test_backfilled_snapshot_values_positions_held_on_that_day() {
        let (store, owner, pid) = setup();
        apply_transaction(
            &store,
            owner,
            pid,
            TransactionDraft::buy("AAPL", date("2024-06-01"), dec!(10), dec!(100)),
        )
        .unwrap();
        let prices = HashMap::from([("AAPL".to_string(), dec!(100)), ("MSFT".to_string(), dec!(200))]);

        let before_any = record(&store, owner, pid, &prices, date("2023-12-01")).unwrap();
        assert_eq!(before_any.total_value, Decimal::ZERO);
        assert_eq!(before_any.total_cost_basis, Decimal::ZERO);

        let backfilled = record(&store, owner, pid, &prices, date("2024-03-01")).unwrap();
        assert_eq!(backfilled.total_value, dec!(2000));
        assert_eq!(backfilled.total_cost_basis, dec!(2000));

        let current = record(&store, owner, pid, &prices, date("2024-06-01")).unwrap();
        assert_eq!(current.total_value, dec!(3000));
    }

    #[tokio::test]
    async fn test_record_from_quotes() {
        let (store, owner, pid) = setup();
        let provider = StaticPrices::new().with_quote("AAPL", dec!(150));
        let snap = record_from_quotes(
            &store,
            owner,
            pid,
            &provider,
            crate::pricing::BATCH_TIMEOUT,
            &CancellationToken::new(),
        )
            .await
            .unwrap();
        assert_eq!(snap.total_value, dec!(2500));
        assert_eq!(snap.date, Utc::now().date_naive());
        assert!(latest(&store, owner, pid).unwrap().is_some());
    }

    #[test]
    fn test_stranger_cannot_record() {
        let (store, _, pid) = setup();
        let err = record(&store, Uuid::new_v4(), pid, &HashMap::new(), date("2024-02-01"))
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }
}
