// Import module - canonical CSV transactions, batch tagging and batch removal

pub mod canonical_csv;

use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{authorize, Store, TransactionDraft};
use crate::engine;
use crate::error::{Error, Result};
use crate::money::canonical;

pub use canonical_csv::{parse_csv, parse_csv_file, ParseError, ParsedCsv, ParsedRow};

/// Outcome of an import run
#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub batch_id: Uuid,
    pub dry_run: bool,
    /// Recorded transaction ids (empty on a dry run)
    pub transaction_ids: Vec<Uuid>,
    /// Rows accepted; on a dry run, rows that passed validation
    pub imported: usize,
    /// Line numbers of rows already present in the portfolio
    pub duplicates: Vec<usize>,
    pub errors: Vec<ParseError>,
}

impl ImportReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Content hash identifying a row across imports.
///
/// Symbol, kind and currency are normalised and amounts compared in
/// canonical form, so `10.0` and `10` hash alike.
pub fn fingerprint(draft: &TransactionDraft) -> String {
    let amount = |v: Option<rust_decimal::Decimal>| {
        v.map(|d| canonical(d).to_string()).unwrap_or_default()
    };
    let content = format!(
        "{}|{}|{}|{}|{}|{}|{}|{}|{}",
        draft.trade_date,
        draft.symbol.trim().to_ascii_uppercase(),
        draft.kind.as_str(),
        canonical(draft.quantity),
        amount(draft.price),
        amount(draft.commission),
        draft.currency.map(|c| c.to_string()).unwrap_or_default(),
        amount(draft.cash_amount),
        draft.note.as_deref().map(str::trim).unwrap_or_default(),
    );
    blake3::hash(content.as_bytes()).to_hex().to_string()
}

/// Record parsed rows under a fresh batch id.
///
/// Rows are applied one by one; a row that fails validation or would sell
/// shares that are not held is reported and the rest continue. A dry run
/// validates the rows and checks for duplicates without writing.
pub fn import_rows<S: Store>(
    store: &S,
    owner_id: Uuid,
    portfolio_id: Uuid,
    parsed: ParsedCsv,
    dry_run: bool,
) -> Result<ImportReport> {
    let portfolio = store.read(|unit| authorize(unit, owner_id, portfolio_id))?;
    let today = Utc::now().date_naive();
    let mut report = ImportReport {
        batch_id: Uuid::new_v4(),
        dry_run,
        transaction_ids: Vec::new(),
        imported: 0,
        duplicates: Vec::new(),
        errors: parsed.errors,
    };
    let mut seen: HashSet<String> = HashSet::new();

    for row in parsed.rows {
        let fp = fingerprint(&row.draft);
        let exists = store.read(|unit| unit.fingerprint_exists(portfolio.id, &fp))?;
        if exists || !seen.insert(fp.clone()) {
            report.duplicates.push(row.line_no);
            continue;
        }

        let mut draft = row.draft;
        draft.import_batch = Some(report.batch_id);
        draft.fingerprint = Some(fp);
        let raw = format!(
            "{} {} {} {}",
            draft.trade_date,
            draft.kind.as_str(),
            draft.quantity,
            draft.symbol
        );

        let outcome = if dry_run {
            engine::validate(&portfolio, draft, today).map(|tx| tx.id)
        } else {
            engine::apply_transaction(store, owner_id, portfolio.id, draft).map(|tx| tx.id)
        };
        match outcome {
            Ok(id) => {
                report.imported += 1;
                if !dry_run {
                    report.transaction_ids.push(id);
                }
            }
            Err(err @ (Error::Internal(_) | Error::Cancelled | Error::Unauthorized(_))) => {
                return Err(err)
            }
            Err(err) => {
                warn!("Import row {} rejected: {}", row.line_no, err);
                report.errors.push(ParseError {
                    line_no: row.line_no,
                    message: err.to_string(),
                    raw,
                });
            }
        }
    }
    report.errors.sort_by_key(|e| e.line_no);

    info!(
        "Import batch {} into portfolio {}: {} imported, {} duplicates, {} errors{}",
        report.batch_id,
        portfolio.id,
        report.imported,
        report.duplicates.len(),
        report.errors.len(),
        if dry_run { " (dry run)" } else { "" }
    );
    Ok(report)
}

/// Remove every transaction of `batch_id` and rebuild the affected symbols.
///
/// All or nothing: if the remaining history no longer balances (a later sale
/// relied on imported shares) nothing is removed.
pub fn delete_batch<S: Store>(
    store: &S,
    owner_id: Uuid,
    portfolio_id: Uuid,
    batch_id: Uuid,
) -> Result<usize> {
    let removed = store.write(|unit| {
        let portfolio = authorize(&*unit, owner_id, portfolio_id)?;
        let transactions = unit.find_transactions_by_batch(portfolio.id, batch_id)?;
        if transactions.is_empty() {
            return Err(Error::not_found(format!("import batch {}", batch_id)));
        }

        let ids: Vec<Uuid> = transactions.iter().map(|t| t.id).collect();
        let symbols: BTreeSet<String> = transactions.iter().flat_map(|t| t.symbols()).collect();
        for id in &ids {
            unit.delete_transaction(*id)?;
        }
        unit.delete_realized_gains(&ids)?;
        let seeds: Vec<String> = symbols.into_iter().collect();
        engine::rebuild(unit, &portfolio, &seeds, None)?;
        Ok(ids.len())
    })?;

    info!(
        "Deleted import batch {} ({} transactions) from portfolio {}",
        batch_id, removed, portfolio_id
    );
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CostBasisPolicy, MemoryStore};
    use crate::engine::portfolios::{create_portfolio, PortfolioDraft};
    use crate::money::Currency;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    const CSV: &str = "\
date,symbol,type,quantity,price,commission,currency,note
2024-01-02,AAPL,buy,10,100,1,,
2024-02-01,AAPL,sell,4,120,1,,
2024-03-01,AAPL,dividend,5.5,,,,
2024-03-02,AAPL,sell,100,120,,,
";

    fn setup() -> (MemoryStore, Uuid, Uuid) {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let p = create_portfolio(
            &store,
            owner,
            PortfolioDraft {
                name: "Broker".to_string(),
                description: None,
                base_currency: Currency::USD,
                cost_basis_policy: CostBasisPolicy::Fifo,
            },
        )
        .unwrap();
        (store, owner, p.id)
    }

    #[test]
    fn test_fingerprint_ignores_formatting() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let a = TransactionDraft::buy("aapl", d, dec!(10.0), dec!(100));
        let b = TransactionDraft::buy("AAPL ", d, dec!(10), dec!(100.00));
        assert_eq!(fingerprint(&a), fingerprint(&b));
        let c = TransactionDraft::buy("AAPL", d, dec!(11), dec!(100));
        assert_ne!(fingerprint(&a), fingerprint(&c));
    }

    #[test]
    fn test_import_reports_errors_and_duplicates() {
        let (store, owner, pid) = setup();
        let report = import_rows(&store, owner, pid, parse_csv(CSV.as_bytes()).unwrap(), false)
            .unwrap();
        assert_eq!(report.imported, 3);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].line_no, 5);
        assert!(report.errors[0].message.contains("insufficient shares"));

        let holding = engine::holding(&store, owner, pid, "AAPL").unwrap();
        assert_eq!(holding.quantity, dec!(6));

        // Same file again: every accepted row is a duplicate
        let again = import_rows(&store, owner, pid, parse_csv(CSV.as_bytes()).unwrap(), false)
            .unwrap();
        assert_eq!(again.imported, 0);
        assert_eq!(again.duplicates, vec![2, 3, 4]);
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let (store, owner, pid) = setup();
        let report = import_rows(&store, owner, pid, parse_csv(CSV.as_bytes()).unwrap(), true)
            .unwrap();
        assert!(report.dry_run);
        assert_eq!(report.imported, 4);
        assert!(report.transaction_ids.is_empty());
        assert!(engine::transactions(&store, owner, pid).unwrap().is_empty());
    }

    #[test]
    fn test_delete_batch_rebuilds() {
        let (store, owner, pid) = setup();
        let d = NaiveDate::from_ymd_opt(2023, 12, 1).unwrap();
        engine::apply_transaction(&store, owner, pid, TransactionDraft::buy("AAPL", d, dec!(1), dec!(90)))
            .unwrap();
        let report = import_rows(&store, owner, pid, parse_csv(CSV.as_bytes()).unwrap(), false)
            .unwrap();
        // FIFO: one share from the older lot, three from the imported one
        assert_eq!(engine::realized_gains(&store, owner, pid, None, None).unwrap().len(), 2);

        let removed = delete_batch(&store, owner, pid, report.batch_id).unwrap();
        assert_eq!(removed, 3);
        let holding = engine::holding(&store, owner, pid, "AAPL").unwrap();
        assert_eq!(holding.quantity, dec!(1));
        assert_eq!(holding.cost_basis, dec!(90));
        assert!(engine::realized_gains(&store, owner, pid, None, None).unwrap().is_empty());

        assert!(matches!(
            delete_batch(&store, owner, pid, report.batch_id),
            Err(Error::NotFound(_))
        ));
    }
}
