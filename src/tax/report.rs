use chrono::Datelike;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;
use uuid::Uuid;

use crate::db::{authorize, RealizedGain, Store};
use crate::engine;
use crate::error::{Error, Result};

/// Per-symbol totals within a tax year
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SymbolTaxSummary {
    pub symbol: String,
    pub proceeds: Decimal,
    pub cost_basis: Decimal,
    pub short_term: Decimal,
    pub long_term: Decimal,
}

/// Realized gains for one calendar year
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaxReport {
    pub portfolio_id: Uuid,
    pub year: i32,
    pub entries: Vec<RealizedGain>,
    pub by_symbol: Vec<SymbolTaxSummary>,
    pub total_proceeds: Decimal,
    pub total_cost_basis: Decimal,
    pub total_short_term: Decimal,
    pub total_long_term: Decimal,
    pub total: Decimal,
}

impl TaxReport {
    fn build(portfolio_id: Uuid, year: i32, mut entries: Vec<RealizedGain>) -> Self {
        entries.sort_by(|a, b| {
            a.sale_date
                .cmp(&b.sale_date)
                .then_with(|| a.symbol.cmp(&b.symbol))
                .then_with(|| a.purchase_date.cmp(&b.purchase_date))
        });

        let mut by_symbol: BTreeMap<String, SymbolTaxSummary> = BTreeMap::new();
        let mut total_short_term = Decimal::ZERO;
        let mut total_long_term = Decimal::ZERO;
        for gain in &entries {
            let summary = by_symbol
                .entry(gain.symbol.clone())
                .or_insert_with(|| SymbolTaxSummary {
                    symbol: gain.symbol.clone(),
                    ..Default::default()
                });
            summary.proceeds += gain.proceeds;
            summary.cost_basis += gain.cost_basis;
            if gain.is_long_term {
                summary.long_term += gain.gain;
                total_long_term += gain.gain;
            } else {
                summary.short_term += gain.gain;
                total_short_term += gain.gain;
            }
        }

        Self {
            portfolio_id,
            year,
            total_proceeds: entries.iter().map(|g| g.proceeds).sum(),
            total_cost_basis: entries.iter().map(|g| g.cost_basis).sum(),
            entries,
            by_symbol: by_symbol.into_values().collect(),
            total_short_term,
            total_long_term,
            total: total_short_term + total_long_term,
        }
    }
}

/// Generate the realized-gain report for `year`.
///
/// The whole history is replayed so that each sale in the year is matched
/// against the lots that existed on its date under the portfolio's policy.
pub fn generate_report<S: Store>(
    store: &S,
    owner_id: Uuid,
    portfolio_id: Uuid,
    year: i32,
) -> Result<TaxReport> {
    if !(1900..=9999).contains(&year) {
        return Err(Error::validation(format!("invalid tax year {}", year)));
    }
    let (portfolio, history) = store.read(|unit| {
        let portfolio = authorize(unit, owner_id, portfolio_id)?;
        let history = unit.list_transactions(portfolio_id)?;
        Ok((portfolio, history))
    })?;

    let book = engine::replay(&portfolio, &history)?;
    let entries: Vec<RealizedGain> = book
        .gains()
        .iter()
        .filter(|g| g.sale_date.year() == year)
        .cloned()
        .collect();

    let report = TaxReport::build(portfolio.id, year, entries);
    info!(
        "Generated {} tax report for portfolio {}: {} entries, total {}",
        year,
        portfolio.id,
        report.entries.len(),
        report.total
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CostBasisPolicy, MemoryStore, TransactionDraft};
    use crate::engine::apply_transaction;
    use crate::engine::portfolios::{create_portfolio, PortfolioDraft};
    use crate::money::Currency;
    use chrono::NaiveDate;
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
                name: "Taxable".to_string(),
                description: None,
                base_currency: Currency::USD,
                cost_basis_policy: CostBasisPolicy::Fifo,
            },
        )
        .unwrap();
        (store, owner, p.id)
    }

    #[test]
    fn test_long_term_sale() {
        let (store, owner, pid) = setup();
        apply_transaction(
            &store,
            owner,
            pid,
            TransactionDraft::buy("AAPL", date("2022-05-01"), dec!(50), dec!(150)),
        )
        .unwrap();
        apply_transaction(
            &store,
            owner,
            pid,
            TransactionDraft::sell("AAPL", date("2024-06-01"), dec!(50), dec!(200)),
        )
        .unwrap();

        let report = generate_report(&store, owner, pid, 2024).unwrap();
        assert_eq!(report.entries.len(), 1);
        assert!(report.entries[0].is_long_term);
        assert_eq!(report.entries[0].gain, dec!(2500));
        assert_eq!(report.total_long_term, dec!(2500));
        assert_eq!(report.total_short_term, Decimal::ZERO);
        assert_eq!(report.total, dec!(2500));
        assert_eq!(report.by_symbol.len(), 1);
        assert_eq!(report.by_symbol[0].proceeds, dec!(10000));

        let empty = generate_report(&store, owner, pid, 2023).unwrap();
        assert!(empty.entries.is_empty());
        assert_eq!(empty.total, Decimal::ZERO);
    }

    #[test]
    fn test_split_between_terms() {
        let (store, owner, pid) = setup();
        for (d, px) in [("2023-01-10", dec!(100)), ("2024-03-01", dec!(120))] {
            apply_transaction(
                &store,
                owner,
                pid,
                TransactionDraft::buy("MSFT", date(d), dec!(10), px),
            )
            .unwrap();
        }
        apply_transaction(
            &store,
            owner,
            pid,
            TransactionDraft::sell("MSFT", date("2024-06-01"), dec!(15), dec!(110)),
        )
        .unwrap();

        let report = generate_report(&store, owner, pid, 2024).unwrap();
        assert_eq!(report.entries.len(), 2);
        // 10 @ 100 held > 1 year, 5 @ 120 held 3 months
        assert_eq!(report.total_long_term, dec!(100));
        assert_eq!(report.total_short_term, dec!(-50));
        assert_eq!(report.total, dec!(50));
    }

    #[test]
    fn test_stranger_is_rejected() {
        let (store, _, pid) = setup();
        assert!(matches!(
            generate_report(&store, Uuid::new_v4(), pid, 2024),
            Err(Error::Unauthorized(_))
        ));
    }
}
