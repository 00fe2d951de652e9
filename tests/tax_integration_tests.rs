//! Yearly realized-gains reports over an on-disk store

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
use tempfile::TempDir;
use uuid::Uuid;

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn setup() -> (TempDir, Ledger<SqliteStore>, Portfolio) {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(&dir.path().join("tax.db")).unwrap();
    let config = AppConfig {
        owner_id: Uuid::new_v4(),
        ..AppConfig::default()
    };
    let ledger = Ledger::new(store, config, Providers::single(StaticPrices::new()));
    let portfolio = ledger
        .create_portfolio(PortfolioDraft {
            name: "Taxable".to_string(),
            description: None,
            base_currency: Currency::USD,
            cost_basis_policy: CostBasisPolicy::Fifo,
        })
        .unwrap();
    (dir, ledger, portfolio)
}

async fn record(ledger: &Ledger<SqliteStore>, p: &Portfolio, draft: TransactionDraft) {
    ledger.add_transaction(p.id, draft).await.unwrap();
}

#[tokio::test]
async fn test_long_term_sale_report() {
    let (_dir, ledger, p) = setup();
    record(&ledger, &p, TransactionDraft::buy("AAPL", date("2022-05-01"), dec!(50), dec!(150))).await;
    record(&ledger, &p, TransactionDraft::sell("AAPL", date("2024-06-01"), dec!(50), dec!(200))).await;

    let report = ledger.tax_report(p.id, 2024).unwrap();
    assert_eq!(report.entries.len(), 1);
    assert!(report.entries[0].is_long_term);
    assert_eq!(report.entries[0].gain, dec!(2500));
    assert_eq!(report.total_long_term, dec!(2500));
    assert_eq!(report.total_short_term, Decimal::ZERO);
    assert_eq!(report.total_proceeds, dec!(10000));
    assert_eq!(report.total_cost_basis, dec!(7500));
    assert_eq!(report.total, dec!(2500));
}

#[tokio::test]
async fn test_report_only_covers_its_year() {
    let (_dir, ledger, p) = setup();
    record(&ledger, &p, TransactionDraft::buy("MSFT", date("2023-01-10"), dec!(30), dec!(100))).await;
    record(&ledger, &p, TransactionDraft::sell("MSFT", date("2023-12-29"), dec!(10), dec!(90))).await;
    record(&ledger, &p, TransactionDraft::sell("MSFT", date("2024-01-10"), dec!(10), dec!(130))).await;
    record(&ledger, &p, TransactionDraft::sell("MSFT", date("2024-02-01"), dec!(10), dec!(140))).await;

    let y2023 = ledger.tax_report(p.id, 2023).unwrap();
    assert_eq!(y2023.entries.len(), 1);
    assert_eq!(y2023.total_short_term, dec!(-100));

    let y2024 = ledger.tax_report(p.id, 2024).unwrap();
    assert_eq!(y2024.entries.len(), 2);
    // Exactly 365 days counts as long term
    assert!(y2024.entries[0].is_long_term);
    assert_eq!(y2024.total_long_term, dec!(700));
    assert_eq!(y2024.by_symbol.len(), 1);
    assert_eq!(y2024.by_symbol[0].symbol, "MSFT");
    assert_eq!(y2024.by_symbol[0].long_term, dec!(700));

    assert!(ledger.tax_report(p.id, 2025).unwrap().entries.is_empty());
}

#[tokio::test]
async fn test_commissions_reduce_gain() {
    let (_dir, ledger, p) = setup();
    record(
        &ledger,
        &p,
        TransactionDraft::buy("AAPL", date("2024-01-02"), dec!(10), dec!(100)).with_commission(dec!(5)),
    )
    .await;
    record(
        &ledger,
        &p,
        TransactionDraft::sell("AAPL", date("2024-03-01"), dec!(10), dec!(110)).with_commission(dec!(5)),
    )
    .await;

    let report = ledger.tax_report(p.id, 2024).unwrap();
    assert_eq!(report.total_cost_basis, dec!(1005));
    assert_eq!(report.total_proceeds, dec!(1095));
    assert_eq!(report.total_short_term, dec!(90));
}

#[tokio::test]
async fn test_invalid_year_is_rejected() {
    let (_dir, ledger, p) = setup();
    assert!(matches!(ledger.tax_report(p.id, 1800), Err(Error::Validation(_))));
}
