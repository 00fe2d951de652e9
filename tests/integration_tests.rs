//! Integration tests for the lotbook core
//!
//! These tests run the ledger against an on-disk SQLite store:
//! - Splits, mergers and spinoffs
//! - FIFO / LIFO / specific-lot sales and realized gains
//! - Revocation and policy changes rebuilding positions
//! - Ownership checks
//! - Persistence across reopening the database

use chrono::NaiveDate;
use lotbook::config::AppConfig;
use lotbook::db::{CostBasisPolicy, Portfolio, SqliteStore, TransactionDraft, TransactionKind};
use lotbook::engine::portfolios::{PortfolioDraft, PortfolioUpdate};
use lotbook::error::Error;
use lotbook::ledger::{Ledger, Providers};
use lotbook::money::Currency;
use lotbook::pricing::StaticPrices;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::path::Path;
use tempfile::TempDir;
use uuid::Uuid;

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn open_ledger(path: &Path, owner: Uuid) -> Ledger<SqliteStore> {
    let store = SqliteStore::open(path).unwrap();
    let config = AppConfig {
        owner_id: owner,
        ..AppConfig::default()
    };
    Ledger::new(store, config, Providers::single(StaticPrices::new()))
}

/// Test helper: fresh database with one portfolio
fn setup(policy: CostBasisPolicy) -> (TempDir, Ledger<SqliteStore>, Portfolio) {
    let dir = TempDir::new().unwrap();
    let ledger = open_ledger(&dir.path().join("test.db"), Uuid::new_v4());
    let portfolio = ledger
        .create_portfolio(PortfolioDraft {
            name: "Brokerage".to_string(),
            description: Some("taxable account".to_string()),
            base_currency: Currency::USD,
            cost_basis_policy: policy,
        })
        .unwrap();
    (dir, ledger, portfolio)
}

async fn buy(ledger: &Ledger<SqliteStore>, p: &Portfolio, symbol: &str, d: &str, qty: Decimal, px: Decimal) {
    ledger
        .add_transaction(p.id, TransactionDraft::buy(symbol, date(d), qty, px))
        .await
        .unwrap();
}

/// Holding quantity equals the sum of lot quantities, and cost basis the sum of lot costs.
fn assert_lots_match_holdings(ledger: &Ledger<SqliteStore>, p: &Portfolio) {
    for holding in ledger.holdings(p.id).unwrap() {
        let lots = ledger.lots(p.id, &holding.symbol).unwrap();
        let qty: Decimal = lots.iter().map(|l| l.quantity).sum();
        let cost: Decimal = lots.iter().map(|l| l.cost_basis).sum();
        assert_eq!(qty, holding.quantity, "{} quantity", holding.symbol);
        assert_eq!(cost, holding.cost_basis, "{} cost basis", holding.symbol);
        assert!(lots.iter().all(|l| l.quantity > Decimal::ZERO));
    }
}

#[tokio::test]
async fn test_split_multiplies_shares_and_keeps_cost() {
    let (_dir, ledger, p) = setup(CostBasisPolicy::Fifo);
    buy(&ledger, &p, "AAPL", "2023-01-10", dec!(100), dec!(180)).await;

    let audit = ledger.split(p.id, "AAPL", date("2023-08-01"), dec!(4)).unwrap();
    assert_eq!(audit.kind, TransactionKind::Split);
    assert_eq!(audit.quantity, dec!(300));

    let holding = &ledger.holdings(p.id).unwrap()[0];
    assert_eq!(holding.quantity, dec!(400));
    assert_eq!(holding.cost_basis, dec!(18000));
    assert_eq!(holding.avg_cost, dec!(45));

    let lots = ledger.lots(p.id, "AAPL").unwrap();
    assert_eq!(lots.len(), 1);
    assert_eq!(lots[0].quantity, dec!(400));
    assert_eq!(lots[0].cost_basis, dec!(18000));
    assert_eq!(lots[0].purchase_date, date("2023-01-10"));
    assert_lots_match_holdings(&ledger, &p);
}

#[tokio::test]
async fn test_fifo_sell_realizes_oldest_lots_first() {
    let (_dir, ledger, p) = setup(CostBasisPolicy::Fifo);
    buy(&ledger, &p, "MSFT", "2023-01-01", dec!(100), dec!(100)).await;
    buy(&ledger, &p, "MSFT", "2023-06-01", dec!(50), dec!(200)).await;
    ledger
        .add_transaction(
            p.id,
            TransactionDraft::sell("MSFT", date("2023-12-01"), dec!(120), dec!(150)),
        )
        .await
        .unwrap();

    let gains = ledger.realized_gains(p.id, None, None).unwrap();
    assert_eq!(gains.len(), 2);
    assert_eq!(gains[0].purchase_date, date("2023-01-01"));
    assert_eq!(gains[0].quantity, dec!(100));
    assert_eq!(gains[0].cost_basis, dec!(10000));
    assert_eq!(gains[1].purchase_date, date("2023-06-01"));
    assert_eq!(gains[1].quantity, dec!(20));
    assert_eq!(gains[1].cost_basis, dec!(4000));
    let total: Decimal = gains.iter().map(|g| g.gain).sum();
    assert_eq!(total, dec!(4000));
    assert!(gains.iter().all(|g| !g.is_long_term));

    let lots = ledger.lots(p.id, "MSFT").unwrap();
    assert_eq!(lots.len(), 1);
    assert_eq!(lots[0].purchase_date, date("2023-06-01"));
    assert_eq!(lots[0].quantity, dec!(30));
    assert_eq!(lots[0].cost_basis, dec!(6000));
    assert_lots_match_holdings(&ledger, &p);
}

#[tokio::test]
async fn test_policy_change_rebuilds_history() {
    let (_dir, ledger, p) = setup(CostBasisPolicy::Fifo);
    buy(&ledger, &p, "MSFT", "2023-01-01", dec!(100), dec!(100)).await;
    buy(&ledger, &p, "MSFT", "2023-06-01", dec!(50), dec!(200)).await;
    ledger
        .add_transaction(
            p.id,
            TransactionDraft::sell("MSFT", date("2023-12-01"), dec!(120), dec!(150)),
        )
        .await
        .unwrap();

    ledger
        .update_portfolio(
            p.id,
            PortfolioUpdate {
                cost_basis_policy: Some(CostBasisPolicy::Lifo),
                ..Default::default()
            },
        )
        .unwrap();

    // LIFO: all 50 June shares, then 70 January shares
    let total: Decimal = ledger
        .realized_gains(p.id, None, None)
        .unwrap()
        .iter()
        .map(|g| g.gain)
        .sum();
    assert_eq!(total, dec!(1000));
    let lots = ledger.lots(p.id, "MSFT").unwrap();
    assert_eq!(lots.len(), 1);
    assert_eq!(lots[0].purchase_date, date("2023-01-01"));
    assert_eq!(lots[0].quantity, dec!(30));
    assert_eq!(lots[0].cost_basis, dec!(3000));
}

#[tokio::test]
async fn test_specific_lot_sale() {
    let (_dir, ledger, p) = setup(CostBasisPolicy::SpecificLot);
    buy(&ledger, &p, "NVDA", "2023-01-01", dec!(10), dec!(100)).await;
    buy(&ledger, &p, "NVDA", "2023-02-01", dec!(10), dec!(300)).await;
    let expensive = ledger.lots(p.id, "NVDA").unwrap()[1].id;

    ledger
        .add_transaction(
            p.id,
            TransactionDraft::sell("NVDA", date("2023-03-01"), dec!(5), dec!(400))
                .with_lots(vec![expensive]),
        )
        .await
        .unwrap();
    let gains = ledger.realized_gains(p.id, None, None).unwrap();
    assert_eq!(gains.len(), 1);
    assert_eq!(gains[0].lot_id, expensive);
    assert_eq!(gains[0].gain, dec!(500));

    let err = ledger
        .add_transaction(
            p.id,
            TransactionDraft::sell("NVDA", date("2023-03-02"), dec!(1), dec!(400))
                .with_lots(vec![Uuid::new_v4()]),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SpecificLotUnknown(_)), "{:?}", err);
}

#[tokio::test]
async fn test_overselling_is_rejected_and_nothing_changes() {
    let (_dir, ledger, p) = setup(CostBasisPolicy::Fifo);
    buy(&ledger, &p, "AAPL", "2023-01-01", dec!(10), dec!(100)).await;

    let err = ledger
        .add_transaction(
            p.id,
            TransactionDraft::sell("AAPL", date("2023-02-01"), dec!(11), dec!(120)),
        )
        .await
        .unwrap_err();
    match err {
        Error::InsufficientShares {
            requested,
            available,
            ..
        } => {
            assert_eq!(requested, dec!(11));
            assert_eq!(available, dec!(10));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(ledger.transactions(p.id).unwrap().len(), 1);
    assert!(ledger.realized_gains(p.id, None, None).unwrap().is_empty());
}

#[tokio::test]
async fn test_revoke_rebuilds_and_guards_later_sales() {
    let (_dir, ledger, p) = setup(CostBasisPolicy::Fifo);
    buy(&ledger, &p, "AAPL", "2023-01-01", dec!(10), dec!(100)).await;
    let second = ledger
        .add_transaction(p.id, TransactionDraft::buy("AAPL", date("2023-02-01"), dec!(10), dec!(110)))
        .await
        .unwrap();
    let sale = ledger
        .add_transaction(
            p.id,
            TransactionDraft::sell("AAPL", date("2023-03-01"), dec!(15), dec!(120)),
        )
        .await
        .unwrap();

    // The sale needs shares from the second buy
    let err = ledger.revoke_transaction(p.id, second.id).unwrap_err();
    assert!(matches!(err, Error::InsufficientShares { .. }), "{:?}", err);
    assert_eq!(ledger.transactions(p.id).unwrap().len(), 3);

    ledger.revoke_transaction(p.id, sale.id).unwrap();
    assert!(ledger.realized_gains(p.id, None, None).unwrap().is_empty());
    let holding = &ledger.holdings(p.id).unwrap()[0];
    assert_eq!(holding.quantity, dec!(20));
    assert_eq!(holding.cost_basis, dec!(2100));

    ledger.revoke_transaction(p.id, second.id).unwrap();
    let holding = &ledger.holdings(p.id).unwrap()[0];
    assert_eq!(holding.quantity, dec!(10));
    assert_lots_match_holdings(&ledger, &p);
}

#[tokio::test]
async fn test_merger_moves_lots_to_new_symbol() {
    let (_dir, ledger, p) = setup(CostBasisPolicy::Fifo);
    buy(&ledger, &p, "FB", "2019-05-01", dec!(100), dec!(100)).await;

    ledger
        .merger(p.id, "FB", "META", date("2022-06-09"), dec!(1))
        .unwrap();

    let holdings = ledger.holdings(p.id).unwrap();
    assert_eq!(holdings.len(), 1);
    assert_eq!(holdings[0].symbol, "META");
    assert_eq!(holdings[0].quantity, dec!(100));
    assert_eq!(holdings[0].cost_basis, dec!(10000));
    assert!(ledger.lots(p.id, "FB").unwrap().is_empty());
    let lots = ledger.lots(p.id, "META").unwrap();
    assert_eq!(lots[0].purchase_date, date("2019-05-01"));
}

#[tokio::test]
async fn test_spinoff_allocates_cost_to_child() {
    let (_dir, ledger, p) = setup(CostBasisPolicy::Fifo);
    buy(&ledger, &p, "PARENT", "2020-01-01", dec!(100), dec!(100)).await;

    ledger
        .spinoff(p.id, "PARENT", "CHILD", date("2024-01-15"), dec!(0.5), Some(dec!(0.1)))
        .unwrap();

    let child = ledger
        .holdings(p.id)
        .unwrap()
        .into_iter()
        .find(|h| h.symbol == "CHILD")
        .unwrap();
    assert_eq!(child.quantity, dec!(50));
    assert_eq!(child.cost_basis, dec!(1000));
    let child_lots = ledger.lots(p.id, "CHILD").unwrap();
    assert_eq!(child_lots.len(), 1);
    assert_eq!(child_lots[0].purchase_date, date("2020-01-01"));

    let parent = ledger
        .holdings(p.id)
        .unwrap()
        .into_iter()
        .find(|h| h.symbol == "PARENT")
        .unwrap();
    assert_eq!(parent.quantity, dec!(100));
    assert_eq!(parent.cost_basis, dec!(9000));
    assert_lots_match_holdings(&ledger, &p);
}

#[tokio::test]
async fn test_other_owner_is_unauthorized() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.db");
    let alice = open_ledger(&path, Uuid::new_v4());
    let p = alice
        .create_portfolio(PortfolioDraft {
            name: "Alice".to_string(),
            description: None,
            base_currency: Currency::USD,
            cost_basis_policy: CostBasisPolicy::Fifo,
        })
        .unwrap();
    buy(&alice, &p, "AAPL", "2023-01-01", dec!(1), dec!(100)).await;

    let mallory = alice.with_owner(Uuid::new_v4());
    assert!(matches!(mallory.holdings(p.id), Err(Error::Unauthorized(_))));
    assert!(matches!(
        mallory
            .add_transaction(p.id, TransactionDraft::buy("AAPL", date("2023-01-02"), dec!(1), dec!(1)))
            .await,
        Err(Error::Unauthorized(_))
    ));
    assert!(mallory.portfolios().unwrap().is_empty());
}

#[tokio::test]
async fn test_state_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.db");
    let owner = Uuid::new_v4();
    let portfolio_id = {
        let ledger = open_ledger(&path, owner);
        let p = ledger
            .create_portfolio(PortfolioDraft {
                name: "Persisted".to_string(),
                description: None,
                base_currency: Currency::USD,
                cost_basis_policy: CostBasisPolicy::Fifo,
            })
            .unwrap();
        buy(&ledger, &p, "AAPL", "2023-01-01", dec!(3), dec!(100.25)).await;
        p.id
    };

    let ledger = open_ledger(&path, owner);
    let p = ledger.portfolio("Persisted").unwrap();
    assert_eq!(p.id, portfolio_id);
    let holding = &ledger.holdings(p.id).unwrap()[0];
    assert_eq!(holding.quantity, dec!(3));
    assert_eq!(holding.cost_basis, dec!(300.75));
}

#[tokio::test]
async fn test_delete_portfolio_removes_everything() {
    let (_dir, ledger, p) = setup(CostBasisPolicy::Fifo);
    buy(&ledger, &p, "AAPL", "2023-01-01", dec!(1), dec!(100)).await;
    ledger.delete_portfolio(p.id).unwrap();
    assert!(ledger.portfolios().unwrap().is_empty());
    assert!(matches!(ledger.holdings(p.id), Err(Error::NotFound(_))));
}
