//! Position engine
//!
//! Every mutation runs inside one `Store::write` unit: the transaction row,
//! its lots, holdings and realized gains commit together or not at all.
//!
//! A transaction dated at or after everything else recorded for its symbols
//! is applied incrementally on top of the stored lots. Anything else (a
//! backdated entry, an edit, a removal) replays the whole set of symbols
//! linked to it through mergers, spinoffs and ticker changes, in
//! `(trade_date, seq)` order, and replaces their derived state.

pub mod book;
pub mod portfolios;
pub mod validation;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeSet, VecDeque};
use tracing::{debug, info};
use uuid::Uuid;

use crate::corporate_actions;
use crate::db::{
    authorize, CostBasisPolicy, Holding, Portfolio, RealizedGain, Store, StoreTx, TaxLot,
    Transaction, TransactionDraft, TransactionKind,
};
use crate::error::{Error, Result};

pub use book::{derived_lot_id, purchase_lot_id, PositionBook};
pub use validation::{normalize_symbol, validate};

/// Validate and record a transaction for `owner_id`.
pub fn apply_transaction<S: Store>(
    store: &S,
    owner_id: Uuid,
    portfolio_id: Uuid,
    draft: TransactionDraft,
) -> Result<Transaction> {
    let today = Utc::now().date_naive();
    store.write(|unit| {
        let portfolio = authorize(&*unit, owner_id, portfolio_id)?;
        apply_in(unit, &portfolio, draft, today)
    })
}

/// Shared path for callers that already hold a write unit.
pub(crate) fn apply_in(
    unit: &mut dyn StoreTx,
    portfolio: &Portfolio,
    draft: TransactionDraft,
    today: NaiveDate,
) -> Result<Transaction> {
    let tx = validate(portfolio, draft, today)?;
    if !tx.lot_selection.is_empty() && portfolio.cost_basis_policy != CostBasisPolicy::SpecificLot
    {
        return Err(Error::validation(format!(
            "lot selection needs the SPECIFIC_LOT policy, portfolio uses {}",
            portfolio.cost_basis_policy.as_str()
        )));
    }
    if tx.kind.is_corporate_action() {
        corporate_actions::check_preconditions(&*unit, &tx)?;
    }
    commit(unit, portfolio, tx)
}

fn commit(unit: &mut dyn StoreTx, portfolio: &Portfolio, mut tx: Transaction) -> Result<Transaction> {
    let history = unit.list_transactions(portfolio.id)?;
    let component = linked_symbols(&history, &tx.symbols());
    let latest = history
        .iter()
        .filter(|t| touches(t, &component))
        .map(|t| t.trade_date)
        .max();

    if tx.kind == TransactionKind::TickerChange {
        tx.quantity = unit
            .get_holding(portfolio.id, &tx.symbol)?
            .map(|h| h.quantity)
            .unwrap_or_default();
    }

    unit.insert_transaction(&mut tx)?;

    if tx.kind == TransactionKind::TickerChange {
        if let Some(new_symbol) = tx.counterpart_symbol.as_deref() {
            unit.rename_symbol(portfolio.id, &tx.symbol, new_symbol, tx.id)?;
        }
    }

    if latest.map_or(true, |d| d <= tx.trade_date) {
        let mut lots = Vec::new();
        for symbol in tx.symbols() {
            lots.extend(unit.list_lots(portfolio.id, &symbol)?);
        }
        let mut book = PositionBook::with_lots(portfolio, lots);
        let audit = book.apply(&tx)?;
        let touched: Vec<String> = book.touched().iter().cloned().collect();
        persist(unit, portfolio, &mut book, &touched)?;
        if let Some(quantity) = audit {
            if tx.kind != TransactionKind::TickerChange && quantity != tx.quantity {
                tx.quantity = quantity;
                unit.update_transaction(&tx)?;
            }
        }
    } else {
        debug!(
            "{} {} dated {} precedes recorded history, replaying",
            tx.kind.as_str(),
            tx.symbol,
            tx.trade_date
        );
        let audit = rebuild(unit, portfolio, &tx.symbols(), Some(tx.id))?;
        if let Some(quantity) = audit {
            if tx.kind != TransactionKind::TickerChange {
                tx.quantity = quantity;
            }
        }
    }

    info!(
        "Recorded {} {} {} on {} in portfolio {}",
        tx.kind.as_str(),
        tx.quantity,
        tx.symbol,
        tx.trade_date,
        portfolio.id
    );
    Ok(tx)
}

/// Remove a transaction and recompute everything it affected.
pub fn revoke_transaction<S: Store>(
    store: &S,
    owner_id: Uuid,
    portfolio_id: Uuid,
    transaction_id: Uuid,
) -> Result<Transaction> {
    store.write(|unit| {
        let portfolio = authorize(&*unit, owner_id, portfolio_id)?;
        let tx = load_transaction(&*unit, &portfolio, transaction_id)?;
        if tx.kind == TransactionKind::TickerChange {
            return Err(Error::validation(format!(
                "ticker change {} -> {} rewrote history and cannot be revoked",
                tx.symbol,
                tx.counterpart_symbol.as_deref().unwrap_or("?")
            )));
        }

        unit.delete_transaction(tx.id)?;
        unit.delete_realized_gains(&[tx.id])?;
        rebuild(unit, &portfolio, &tx.symbols(), None)?;

        info!(
            "Revoked {} {} {} from portfolio {}",
            tx.kind.as_str(),
            tx.quantity,
            tx.symbol,
            portfolio.id
        );
        Ok(tx)
    })
}

/// Replace the payload of a trade or dividend, keeping its identity and place
/// in the ledger, and recompute the old and new symbols.
pub fn update_transaction<S: Store>(
    store: &S,
    owner_id: Uuid,
    portfolio_id: Uuid,
    transaction_id: Uuid,
    draft: TransactionDraft,
) -> Result<Transaction> {
    let today = Utc::now().date_naive();
    store.write(|unit| {
        let portfolio = authorize(&*unit, owner_id, portfolio_id)?;
        let old = load_transaction(&*unit, &portfolio, transaction_id)?;
        if old.kind.is_corporate_action() || draft.kind.is_corporate_action() {
            return Err(Error::validation(
                "corporate action entries cannot be edited; revoke and re-apply instead",
            ));
        }

        let fresh = validate(&portfolio, draft, today)?;
        if !fresh.lot_selection.is_empty()
            && portfolio.cost_basis_policy != CostBasisPolicy::SpecificLot
        {
            return Err(Error::validation(
                "lot selection needs the SPECIFIC_LOT policy",
            ));
        }
        let updated = Transaction {
            id: old.id,
            seq: old.seq,
            created_at: old.created_at,
            import_batch: old.import_batch,
            fingerprint: old.fingerprint.clone(),
            ..fresh
        };
        unit.update_transaction(&updated)?;

        let mut seeds = old.symbols();
        seeds.extend(updated.symbols());
        rebuild(unit, &portfolio, &seeds, None)?;

        info!(
            "Updated {} {} {} in portfolio {}",
            updated.kind.as_str(),
            updated.quantity,
            updated.symbol,
            portfolio.id
        );
        Ok(updated)
    })
}

/// Rebuild `symbol` (and every symbol linked to it) from its transactions.
pub fn recalculate<S: Store>(
    store: &S,
    owner_id: Uuid,
    portfolio_id: Uuid,
    symbol: &str,
) -> Result<Option<Holding>> {
    let symbol = normalize_symbol(symbol)?;
    store.write(|unit| {
        let portfolio = authorize(&*unit, owner_id, portfolio_id)?;
        rebuild(unit, &portfolio, &[symbol.clone()], None)?;
        info!("Recalculated {} in portfolio {}", symbol, portfolio.id);
        unit.get_holding(portfolio.id, &symbol)
    })
}

/// Replay every transaction of the portfolio in a fresh book.
pub fn replay(portfolio: &Portfolio, transactions: &[Transaction]) -> Result<PositionBook> {
    let mut ordered: Vec<&Transaction> = transactions.iter().collect();
    ordered.sort_by_key(|t| t.replay_key());
    let mut book = PositionBook::new(portfolio);
    for tx in ordered {
        book.apply(tx)?;
    }
    Ok(book)
}

/// Position book as it stood at the end of `date`.
pub(crate) fn book_as_of(
    unit: &dyn StoreTx,
    portfolio: &Portfolio,
    date: NaiveDate,
) -> Result<PositionBook> {
    let history: Vec<Transaction> = unit
        .list_transactions(portfolio.id)?
        .into_iter()
        .filter(|t| t.trade_date <= date)
        .collect();
    replay(portfolio, &history)
}

/// Recompute lots, holdings and realized gains for every symbol linked to
/// `seeds`. Returns the audit quantity of transaction `watch`, if given.
pub(crate) fn rebuild(
    unit: &mut dyn StoreTx,
    portfolio: &Portfolio,
    seeds: &[String],
    watch: Option<Uuid>,
) -> Result<Option<Decimal>> {
    let history = unit.list_transactions(portfolio.id)?;
    let component = linked_symbols(&history, seeds);
    let replayed: Vec<&Transaction> = history.iter().filter(|t| touches(t, &component)).collect();

    let sells: Vec<Uuid> = replayed
        .iter()
        .filter(|t| t.kind == TransactionKind::Sell)
        .map(|t| t.id)
        .collect();
    unit.delete_realized_gains(&sells)?;

    let mut book = PositionBook::new(portfolio);
    let mut watched = None;
    let mut stale = Vec::new();
    for tx in &replayed {
        let audit = book.apply(tx)?;
        if Some(tx.id) == watch {
            watched = audit;
        }
        if let Some(quantity) = audit {
            if tx.kind != TransactionKind::TickerChange && quantity != tx.quantity {
                stale.push(Transaction {
                    quantity,
                    ..(*tx).clone()
                });
            }
        }
    }
    for tx in &stale {
        unit.update_transaction(tx)?;
    }

    let symbols: Vec<String> = component.into_iter().collect();
    persist(unit, portfolio, &mut book, &symbols)?;

    debug!(
        "Replayed {} transactions over {} in portfolio {}",
        replayed.len(),
        symbols.join(", "),
        portfolio.id
    );
    Ok(watched)
}

/// Recompute every symbol the portfolio ever traded.
pub(crate) fn rebuild_all(unit: &mut dyn StoreTx, portfolio: &Portfolio) -> Result<()> {
    let mut seeds: BTreeSet<String> = BTreeSet::new();
    for tx in unit.list_transactions(portfolio.id)? {
        seeds.extend(tx.symbols());
    }
    for holding in unit.list_holdings(portfolio.id)? {
        seeds.insert(holding.symbol);
    }
    let seeds: Vec<String> = seeds.into_iter().collect();
    rebuild(unit, portfolio, &seeds, None)?;
    Ok(())
}

fn persist(
    unit: &mut dyn StoreTx,
    portfolio: &Portfolio,
    book: &mut PositionBook,
    symbols: &[String],
) -> Result<()> {
    for symbol in symbols {
        unit.replace_lots(portfolio.id, symbol, book.lots(symbol))?;
        match book.holding(symbol)? {
            Some(holding) => unit.put_holding(&holding)?,
            None => unit.delete_holding(portfolio.id, symbol)?,
        }
    }
    for gain in book.take_gains() {
        unit.insert_realized_gain(&gain)?;
    }
    Ok(())
}

fn load_transaction(
    unit: &dyn StoreTx,
    portfolio: &Portfolio,
    transaction_id: Uuid,
) -> Result<Transaction> {
    unit.get_transaction(transaction_id)?
        .filter(|t| t.portfolio_id == portfolio.id)
        .ok_or_else(|| Error::not_found(format!("transaction {}", transaction_id)))
}

fn touches(tx: &Transaction, symbols: &BTreeSet<String>) -> bool {
    symbols.contains(&tx.symbol)
        || tx
            .counterpart_symbol
            .as_ref()
            .is_some_and(|s| symbols.contains(s))
}

/// Symbols reachable from `seeds` through merger, spinoff and ticker change
/// entries.
pub fn linked_symbols(history: &[Transaction], seeds: &[String]) -> BTreeSet<String> {
    let mut component: BTreeSet<String> = seeds.iter().cloned().collect();
    let mut queue: VecDeque<String> = component.iter().cloned().collect();

    while let Some(symbol) = queue.pop_front() {
        for tx in history.iter().filter(|t| t.kind.links_symbols()) {
            let Some(other) = tx.counterpart_symbol.as_ref() else {
                continue;
            };
            let next = if tx.symbol == symbol {
                other
            } else if *other == symbol {
                &tx.symbol
            } else {
                continue;
            };
            if component.insert(next.clone()) {
                queue.push_back(next.clone());
            }
        }
    }
    component
}

// Read helpers, owner-scoped

pub fn holdings<S: Store>(store: &S, owner_id: Uuid, portfolio_id: Uuid) -> Result<Vec<Holding>> {
    store.read(|unit| {
        authorize(unit, owner_id, portfolio_id)?;
        unit.list_holdings(portfolio_id)
    })
}

pub fn holding<S: Store>(
    store: &S,
    owner_id: Uuid,
    portfolio_id: Uuid,
    symbol: &str,
) -> Result<Holding> {
    let symbol = normalize_symbol(symbol)?;
    store.read(|unit| {
        authorize(unit, owner_id, portfolio_id)?;
        unit.get_holding(portfolio_id, &symbol)?
            .ok_or_else(|| Error::not_found(format!("holding {}", symbol)))
    })
}

pub fn lots<S: Store>(
    store: &S,
    owner_id: Uuid,
    portfolio_id: Uuid,
    symbol: &str,
) -> Result<Vec<TaxLot>> {
    let symbol = normalize_symbol(symbol)?;
    store.read(|unit| {
        authorize(unit, owner_id, portfolio_id)?;
        unit.list_lots(portfolio_id, &symbol)
    })
}

pub fn transactions<S: Store>(
    store: &S,
    owner_id: Uuid,
    portfolio_id: Uuid,
) -> Result<Vec<Transaction>> {
    store.read(|unit| {
        authorize(unit, owner_id, portfolio_id)?;
        unit.list_transactions(portfolio_id)
    })
}

pub fn realized_gains<S: Store>(
    store: &S,
    owner_id: Uuid,
    portfolio_id: Uuid,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<Vec<RealizedGain>> {
    store.read(|unit| {
        authorize(unit, owner_id, portfolio_id)?;
        unit.list_realized_gains(portfolio_id, from, to)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::engine::portfolios::{create_portfolio, PortfolioDraft};
    use crate::money::Currency;
    use rust_decimal_macros::dec;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn setup(policy: CostBasisPolicy) -> (MemoryStore, Uuid, Portfolio) {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let portfolio = create_portfolio(
            &store,
            owner,
            PortfolioDraft {
                name: "Main".to_string(),
                description: None,
                base_currency: Currency::USD,
                cost_basis_policy: policy,
            },
        )
        .unwrap();
        (store, owner, portfolio)
    }

    fn assert_lot_sums(store: &MemoryStore, owner: Uuid, portfolio: &Portfolio, symbol: &str) {
        let lots = lots(store, owner, portfolio.id, symbol).unwrap();
        let qty: Decimal = lots.iter().map(|l| l.quantity).sum();
        let cost: Decimal = lots.iter().map(|l| l.cost_basis).sum();
        match holding(store, owner, portfolio.id, symbol) {
            Ok(h) => {
                assert_eq!(h.quantity, qty);
                assert!((h.cost_basis - cost).abs() < dec!(0.000001));
            }
            Err(Error::NotFound(_)) => assert!(lots.is_empty()),
            Err(e) => panic!("unexpected error {e}"),
        }
    }

    #[test]
    fn test_buy_then_sell_round_trip() {
        let (store, owner, p) = setup(CostBasisPolicy::Fifo);
        apply_transaction(
            &store,
            owner,
            p.id,
            TransactionDraft::buy("IBM", date("2024-01-02"), dec!(10), dec!(100))
                .with_commission(dec!(1)),
        )
        .unwrap();
        apply_transaction(
            &store,
            owner,
            p.id,
            TransactionDraft::sell("IBM", date("2024-02-02"), dec!(10), dec!(120))
                .with_commission(dec!(1)),
        )
        .unwrap();

        let gains = realized_gains(&store, owner, p.id, None, None).unwrap();
        let total: Decimal = gains.iter().map(|g| g.gain).sum();
        assert_eq!(total, dec!(198));
        assert!(holdings(&store, owner, p.id).unwrap().is_empty());
        assert!(lots(&store, owner, p.id, "IBM").unwrap().is_empty());
    }

    #[test]
    fn test_failed_sell_leaves_no_trace() {
        let (store, owner, p) = setup(CostBasisPolicy::Fifo);
        apply_transaction(
            &store,
            owner,
            p.id,
            TransactionDraft::buy("IBM", date("2024-01-02"), dec!(5), dec!(100)),
        )
        .unwrap();
        let err = apply_transaction(
            &store,
            owner,
            p.id,
            TransactionDraft::sell("IBM", date("2024-02-02"), dec!(6), dec!(120)),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InsufficientShares { .. }));
        assert_eq!(transactions(&store, owner, p.id).unwrap().len(), 1);
        assert_eq!(
            holding(&store, owner, p.id, "IBM").unwrap().quantity,
            dec!(5)
        );
    }

    #[test]
    fn test_backdated_buy_replays_later_sell() {
        let (store, owner, p) = setup(CostBasisPolicy::Fifo);
        apply_transaction(
            &store,
            owner,
            p.id,
            TransactionDraft::buy("MSFT", date("2024-06-01"), dec!(10), dec!(200)),
        )
        .unwrap();
        apply_transaction(
            &store,
            owner,
            p.id,
            TransactionDraft::sell("MSFT", date("2024-12-01"), dec!(10), dec!(150)),
        )
        .unwrap();
        // An older, cheaper lot now comes first under FIFO
        apply_transaction(
            &store,
            owner,
            p.id,
            TransactionDraft::buy("MSFT", date("2024-01-01"), dec!(10), dec!(100)),
        )
        .unwrap();

        let gains = realized_gains(&store, owner, p.id, None, None).unwrap();
        assert_eq!(gains.len(), 1);
        assert_eq!(gains[0].gain, dec!(500));
        let remaining = lots(&store, owner, p.id, "MSFT").unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].purchase_date, date("2024-06-01"));
        assert_lot_sums(&store, owner, &p, "MSFT");
    }

    #[test]
    fn test_revoke_restores_prior_state() {
        let (store, owner, p) = setup(CostBasisPolicy::Fifo);
        apply_transaction(
            &store,
            owner,
            p.id,
            TransactionDraft::buy("AAPL", date("2024-01-02"), dec!(10), dec!(100)),
        )
        .unwrap();
        let sell = apply_transaction(
            &store,
            owner,
            p.id,
            TransactionDraft::sell("AAPL", date("2024-02-02"), dec!(4), dec!(110)),
        )
        .unwrap();

        revoke_transaction(&store, owner, p.id, sell.id).unwrap();
        assert_eq!(
            holding(&store, owner, p.id, "AAPL").unwrap().quantity,
            dec!(10)
        );
        assert!(realized_gains(&store, owner, p.id, None, None)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_revoking_needed_buy_fails() {
        let (store, owner, p) = setup(CostBasisPolicy::Fifo);
        let buy = apply_transaction(
            &store,
            owner,
            p.id,
            TransactionDraft::buy("AAPL", date("2024-01-02"), dec!(10), dec!(100)),
        )
        .unwrap();
        apply_transaction(
            &store,
            owner,
            p.id,
            TransactionDraft::sell("AAPL", date("2024-02-02"), dec!(4), dec!(110)),
        )
        .unwrap();

        let err = revoke_transaction(&store, owner, p.id, buy.id).unwrap_err();
        assert!(matches!(err, Error::InsufficientShares { .. }));
        assert_eq!(transactions(&store, owner, p.id).unwrap().len(), 2);
    }

    #[test]
    fn test_update_moves_position_between_symbols() {
        let (store, owner, p) = setup(CostBasisPolicy::Fifo);
        let buy = apply_transaction(
            &store,
            owner,
            p.id,
            TransactionDraft::buy("GOOG", date("2024-01-02"), dec!(10), dec!(100)),
        )
        .unwrap();

        let updated = update_transaction(
            &store,
            owner,
            p.id,
            buy.id,
            TransactionDraft::buy("GOOGL", date("2024-01-02"), dec!(12), dec!(100)),
        )
        .unwrap();
        assert_eq!(updated.id, buy.id);
        assert_eq!(updated.seq, buy.seq);

        assert!(matches!(
            holding(&store, owner, p.id, "GOOG"),
            Err(Error::NotFound(_))
        ));
        let h = holding(&store, owner, p.id, "GOOGL").unwrap();
        assert_eq!(h.quantity, dec!(12));
        assert_eq!(lots(&store, owner, p.id, "GOOGL").unwrap()[0].id, purchase_lot_id(buy.id));
    }

    #[test]
    fn test_recalculate_matches_incremental_state() {
        let (store, owner, p) = setup(CostBasisPolicy::Lifo);
        for (d, qty, px) in [
            ("2024-01-02", dec!(10), dec!(100)),
            ("2024-02-02", dec!(5), dec!(120)),
            ("2024-03-02", dec!(8), dec!(90)),
        ] {
            apply_transaction(
                &store,
                owner,
                p.id,
                TransactionDraft::buy("NVDA", date(d), qty, px),
            )
            .unwrap();
        }
        apply_transaction(
            &store,
            owner,
            p.id,
            TransactionDraft::sell("NVDA", date("2024-04-02"), dec!(9), dec!(130))
                .with_commission(dec!(3)),
        )
        .unwrap();

        let before_lots = lots(&store, owner, p.id, "NVDA").unwrap();
        let before_gains = realized_gains(&store, owner, p.id, None, None).unwrap();
        let rebuilt = recalculate(&store, owner, p.id, "nvda").unwrap().unwrap();

        assert_eq!(lots(&store, owner, p.id, "NVDA").unwrap(), before_lots);
        assert_eq!(
            realized_gains(&store, owner, p.id, None, None).unwrap(),
            before_gains
        );
        assert_eq!(rebuilt.quantity, dec!(14));
        assert_lot_sums(&store, owner, &p, "NVDA");
    }

    #[test]
    fn test_other_owner_is_unauthorized() {
        let (store, _owner, p) = setup(CostBasisPolicy::Fifo);
        let stranger = Uuid::new_v4();
        let err = apply_transaction(
            &store,
            stranger,
            p.id,
            TransactionDraft::buy("AAPL", date("2024-01-02"), dec!(1), dec!(1)),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
        assert!(matches!(
            holdings(&store, stranger, p.id),
            Err(Error::Unauthorized(_))
        ));
        assert!(matches!(
            recalculate(&store, stranger, p.id, "AAPL"),
            Err(Error::Unauthorized(_))
        ));
    }

    #[test]
    fn test_lot_selection_requires_specific_policy() {
        let (store, owner, p) = setup(CostBasisPolicy::Fifo);
        let buy = apply_transaction(
            &store,
            owner,
            p.id,
            TransactionDraft::buy("AAPL", date("2024-01-02"), dec!(10), dec!(100)),
        )
        .unwrap();
        let err = apply_transaction(
            &store,
            owner,
            p.id,
            TransactionDraft::sell("AAPL", date("2024-02-02"), dec!(1), dec!(100))
                .with_lots(vec![purchase_lot_id(buy.id)]),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_linked_symbols_follow_renames_and_mergers() {
        let mk = |kind, symbol: &str, other: Option<&str>| Transaction {
            id: Uuid::new_v4(),
            portfolio_id: Uuid::nil(),
            kind,
            symbol: symbol.to_string(),
            trade_date: date("2024-01-01"),
            quantity: Decimal::ZERO,
            price: None,
            commission: Decimal::ZERO,
            currency: Currency::USD,
            fx_rate: Decimal::ONE,
            cash_amount: None,
            ratio: None,
            counterpart_symbol: other.map(str::to_string),
            allocation: None,
            lot_selection: Vec::new(),
            note: None,
            import_batch: None,
            fingerprint: None,
            seq: 0,
            created_at: Utc::now(),
        };
        let history = vec![
            mk(TransactionKind::Merger, "A", Some("B")),
            mk(TransactionKind::TickerChange, "B", Some("C")),
            mk(TransactionKind::Buy, "D", None),
        ];
        let component = linked_symbols(&history, &["C".to_string()]);
        assert_eq!(
            component.into_iter().collect::<Vec<_>>(),
            vec!["A".to_string(), "B".to_string(), "C".to_string()]
        );
    }
}
