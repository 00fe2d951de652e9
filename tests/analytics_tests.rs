//! Snapshots and return calculations over an on-disk store

use chrono::NaiveDate;
use lotbook::config::AppConfig;
use lotbook::db::{CostBasisPolicy, Portfolio, SqliteStore, TransactionDraft};
use lotbook::engine::portfolios::PortfolioDraft;
use lotbook::error::Error;
use lotbook::ledger::{Ledger, Providers};
use lotbook::money::Currency;
use lotbook::pricing::StaticPrices;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use tempfile::TempDir;
use uuid::Uuid;

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn prices(px: Decimal) -> HashMap<String, Decimal> {
    HashMap::from([("VTI".to_string(), px)])
}

fn setup(provider: StaticPrices) -> (TempDir, Ledger<SqliteStore>, Portfolio) {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(&dir.path().join("test.db")).unwrap();
    let config = AppConfig {
        owner_id: Uuid::new_v4(),
        ..AppConfig::default()
    };
    let ledger = Ledger::new(store, config, Providers::single(provider));
    let portfolio = ledger
        .create_portfolio(PortfolioDraft {
            name: "Index".to_string(),
            description: None,
            base_currency: Currency::USD,
            cost_basis_policy: CostBasisPolicy::Fifo,
        })
        .unwrap();
    (dir, ledger, portfolio)
}

/// Three snapshots with a purchase in the first period and a sale in the second.
///
/// Period 1: (12100 - 1000) / 10000 - 1 = 0.11
/// Period 2: (12100 + 1100) / 12100 - 1 = 0.0909...
async fn build_history(ledger: &Ledger<SqliteStore>, p: &Portfolio) {
    trade(ledger, p, TransactionDraft::buy("VTI", date("2023-12-20"), dec!(100), dec!(100))).await;
    ledger
        .record_snapshot(p.id, &prices(dec!(100)), date("2024-01-01"))
        .unwrap();
    trade(ledger, p, TransactionDraft::buy("VTI", date("2024-01-15"), dec!(10), dec!(100))).await;
    ledger
        .record_snapshot(p.id, &prices(dec!(110)), date("2024-02-01"))
        .unwrap();
    trade(ledger, p, TransactionDraft::sell("VTI", date("2024-02-15"), dec!(10), dec!(110))).await;
    ledger
        .record_snapshot(p.id, &prices(dec!(121)), date("2024-03-01"))
        .unwrap();
}

async fn trade(ledger: &Ledger<SqliteStore>, p: &Portfolio, draft: TransactionDraft) {
    ledger.add_transaction(p.id, draft).await.unwrap();
}

#[tokio::test]
async fn test_snapshot_values_and_day_change() {
    let (_dir, ledger, p) = setup(StaticPrices::new());
    ledger
        .add_transaction(p.id, TransactionDraft::buy("VTI", date("2024-01-02"), dec!(10), dec!(200)))
        .await
        .unwrap();

    let first = ledger
        .record_snapshot(p.id, &prices(dec!(210)), date("2024-01-02"))
        .unwrap();
    assert_eq!(first.total_value, dec!(2100));
    assert_eq!(first.total_cost_basis, dec!(2000));
    assert_eq!(first.total_return, dec!(100));
    assert_eq!(first.total_return_pct, dec!(5));
    assert_eq!(first.day_change, None);

    let second = ledger
        .record_snapshot(p.id, &prices(dec!(189)), date("2024-01-03"))
        .unwrap();
    assert_eq!(second.day_change, Some(dec!(-210)));
    assert_eq!(second.day_change_pct, Some(dec!(-10)));

    // Re-recording a date replaces it
    let again = ledger
        .record_snapshot(p.id, &prices(dec!(200)), date("2024-01-03"))
        .unwrap();
    assert_eq!(again.id, second.id);
    let stored = ledger
        .snapshots(p.id, date("2024-01-01"), date("2024-01-31"))
        .unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[1].total_value, dec!(2000));
}

#[tokio::test]
async fn test_time_weighted_return_neutralizes_flows() {
    let (_dir, ledger, p) = setup(StaticPrices::new());
    build_history(&ledger, &p).await;

    let report = ledger.twr(p.id, date("2024-01-01"), date("2024-03-01")).unwrap();
    assert_eq!(report.snapshots, 3);
    assert!(
        (report.total_return - dec!(0.210909)).abs() < dec!(0.0001),
        "twr {}",
        report.total_return
    );
    assert!(report.annualized_return.unwrap() > report.total_return);
}

#[tokio::test]
async fn test_twr_needs_two_snapshots() {
    let (_dir, ledger, p) = setup(StaticPrices::new());
    let err = ledger
        .twr(p.id, date("2024-01-01"), date("2024-03-01"))
        .unwrap_err();
    assert!(matches!(err, Error::InsufficientData(_)));
}

#[tokio::test]
async fn test_twr_survives_unrepresentable_annualisation() {
    let (_dir, ledger, p) = setup(StaticPrices::new());
    trade(&ledger, &p, TransactionDraft::buy("VTI", date("2024-01-01"), dec!(1), dec!(100))).await;
    ledger
        .record_snapshot(p.id, &prices(dec!(100)), date("2024-01-01"))
        .unwrap();
    ledger
        .record_snapshot(p.id, &prices(dec!(150)), date("2024-01-02"))
        .unwrap();

    let report = ledger.twr(p.id, date("2024-01-01"), date("2024-01-02")).unwrap();
    assert_eq!(report.total_return, dec!(0.5));
    assert_eq!(report.annualized_return, None);

    let metrics = ledger
        .metrics(p.id, date("2024-01-01"), date("2024-01-02"))
        .unwrap();
    assert_eq!(metrics.twr, Some(dec!(0.5)));
    assert_eq!(metrics.annualized_twr, None);
}

#[tokio::test]
async fn test_money_weighted_return_converges() {
    let (_dir, ledger, p) = setup(StaticPrices::new());
    build_history(&ledger, &p).await;

    let mwr = ledger.mwr(p.id, date("2024-01-01"), date("2024-03-01")).unwrap();
    assert!(mwr.converged);
    assert!(mwr.rate > 0.0, "rate {}", mwr.rate);
}

#[tokio::test]
async fn test_metrics_for_period() {
    let (_dir, ledger, p) = setup(StaticPrices::new());
    build_history(&ledger, &p).await;

    let metrics = ledger
        .metrics(p.id, date("2024-01-01"), date("2024-03-01"))
        .unwrap();
    assert_eq!(metrics.market_value, dec!(12100));
    assert_eq!(metrics.cost_basis, dec!(10000));
    assert_eq!(metrics.unrealized_gain, dec!(2100));
    assert_eq!(metrics.realized_gain, dec!(100));
    assert_eq!(metrics.dividend_income, Decimal::ZERO);
    assert!(metrics.twr.is_some());
    assert!(metrics.mwr.is_some());
}

#[tokio::test]
async fn test_metrics_without_snapshots_fall_back_to_cost() {
    let (_dir, ledger, p) = setup(StaticPrices::new());
    ledger
        .add_transaction(p.id, TransactionDraft::buy("VTI", date("2024-01-02"), dec!(10), dec!(200)))
        .await
        .unwrap();
    ledger
        .add_transaction(p.id, TransactionDraft::dividend("VTI", date("2024-03-01"), dec!(12.5)))
        .await
        .unwrap();

    let metrics = ledger
        .metrics(p.id, date("2024-01-01"), date("2024-12-31"))
        .unwrap();
    assert_eq!(metrics.market_value, dec!(2000));
    assert_eq!(metrics.unrealized_gain, Decimal::ZERO);
    assert_eq!(metrics.dividend_income, dec!(12.5));
    assert_eq!(metrics.twr, None);
    assert_eq!(metrics.mwr, None);
}

#[tokio::test]
async fn test_benchmark_comparison() {
    let provider = StaticPrices::new().with_closes(
        "SPY",
        &[
            (date("2024-01-01"), dec!(400)),
            (date("2024-02-01"), dec!(410)),
            (date("2024-03-01"), dec!(440)),
        ],
    );
    let (_dir, ledger, p) = setup(provider);
    build_history(&ledger, &p).await;

    let comparison = ledger
        .compare_to_benchmark(p.id, "SPY", date("2024-01-01"), date("2024-03-01"))
        .await
        .unwrap();
    assert_eq!(comparison.benchmark.total_return, dec!(0.1));
    assert_eq!(comparison.benchmark.start_price, dec!(400));
    let alpha = comparison.alpha.unwrap();
    assert_eq!(
        alpha,
        comparison.portfolio.annualized_return.unwrap()
            - comparison.benchmark.annualized_return.unwrap()
    );
    assert!(alpha > Decimal::ZERO);
}

#[tokio::test]
async fn test_unknown_benchmark_is_insufficient_data() {
    let (_dir, ledger, p) = setup(StaticPrices::new());
    build_history(&ledger, &p).await;
    let err = ledger
        .compare_to_benchmark(p.id, "NOPE", date("2024-01-01"), date("2024-03-01"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InsufficientData(_)), "{:?}", err);
}
