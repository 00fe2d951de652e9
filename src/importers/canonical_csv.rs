use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord, Trim};
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::db::{TransactionDraft, TransactionKind};
use crate::error::{Error, Result};
use crate::money::Currency;

/// A row that could not be turned into a transaction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParseError {
    pub line_no: usize,
    pub message: String,
    pub raw: String,
}

/// A parsed row, ready for validation
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRow {
    pub line_no: usize,
    pub draft: TransactionDraft,
}

#[derive(Debug, Default)]
pub struct ParsedCsv {
    pub rows: Vec<ParsedRow>,
    pub errors: Vec<ParseError>,
}

#[derive(Debug)]
struct ColumnMapping {
    date: usize,
    symbol: usize,
    kind: usize,
    quantity: usize,
    price: Option<usize>,
    commission: Option<usize>,
    currency: Option<usize>,
    note: Option<usize>,
}

fn find_columns(headers: &StringRecord) -> Result<ColumnMapping> {
    let position = |names: &[&str]| {
        headers
            .iter()
            .position(|h| names.contains(&h.trim().to_ascii_lowercase().as_str()))
    };
    let required = |names: &[&str]| {
        position(names).ok_or_else(|| {
            Error::validation(format!("missing required column '{}'", names[0]))
        })
    };

    Ok(ColumnMapping {
        date: required(&["date", "trade_date"])?,
        symbol: required(&["symbol", "ticker"])?,
        kind: required(&["type", "kind"])?,
        quantity: required(&["quantity", "qty", "shares"])?,
        price: position(&["price", "unit_price"]),
        commission: position(&["commission", "fees", "fee"]),
        currency: position(&["currency", "ccy"]),
        note: position(&["note", "notes", "memo"]),
    })
}

fn field<'a>(record: &'a StringRecord, idx: Option<usize>) -> Option<&'a str> {
    idx.and_then(|i| record.get(i))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn parse_date(value: &str) -> std::result::Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| format!("invalid date '{}', expected YYYY-MM-DD", value))
}

/// Parse an amount, tolerating a leading currency sign and thousands separators.
fn parse_amount(value: &str, what: &str) -> std::result::Result<Decimal, String> {
    let cleaned: String = value
        .trim_start_matches('$')
        .chars()
        .filter(|c| *c != ',' && *c != '_')
        .collect();
    Decimal::from_str(&cleaned).map_err(|_| format!("invalid {} '{}'", what, value))
}

fn parse_row(record: &StringRecord, columns: &ColumnMapping) -> std::result::Result<TransactionDraft, String> {
    let date = parse_date(field(record, Some(columns.date)).ok_or("missing date")?)?;
    let symbol = field(record, Some(columns.symbol)).ok_or("missing symbol")?;
    let kind_text = field(record, Some(columns.kind)).ok_or("missing type")?;
    let kind = TransactionKind::from_str(kind_text).map_err(|e| e.to_string())?;
    if kind.is_corporate_action() {
        return Err(format!(
            "{} entries are recorded as corporate actions, not imported",
            kind.as_str()
        ));
    }
    let quantity = parse_amount(
        field(record, Some(columns.quantity)).ok_or("missing quantity")?,
        "quantity",
    )?;
    let price = field(record, columns.price)
        .map(|p| parse_amount(p, "price"))
        .transpose()?;

    let mut draft = TransactionDraft::new(kind, symbol, date, quantity, price);
    if let Some(commission) = field(record, columns.commission) {
        draft.commission = Some(parse_amount(commission, "commission")?);
    }
    if let Some(currency) = field(record, columns.currency) {
        draft.currency = Some(Currency::from_str(currency).map_err(|e| e.to_string())?);
    }
    draft.note = field(record, columns.note).map(str::to_string);
    Ok(draft)
}

/// Parse the canonical layout: `date,symbol,type,quantity,price,commission,currency,note`.
///
/// Only the first four columns are required; header names are matched
/// case-insensitively in any order. Bad rows are collected, not fatal.
pub fn parse_csv<R: Read>(reader: R) -> Result<ParsedCsv> {
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .trim(Trim::All)
        .comment(Some(b'#'))
        .from_reader(reader);

    let headers = reader
        .headers()
        .map_err(|e| Error::validation(format!("failed to read CSV headers: {}", e)))?
        .clone();
    let columns = find_columns(&headers)?;
    debug!("CSV column mapping: {:?}", columns);

    let mut parsed = ParsedCsv::default();
    for (idx, result) in reader.records().enumerate() {
        let fallback_line = idx + 2;
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                let line_no = e
                    .position()
                    .map(|p| p.line() as usize)
                    .unwrap_or(fallback_line);
                warn!("Skipping unreadable row {}: {}", line_no, e);
                parsed.errors.push(ParseError {
                    line_no,
                    message: e.to_string(),
                    raw: String::new(),
                });
                continue;
            }
        };
        let line_no = record
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(fallback_line);
        if record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }

        match parse_row(&record, &columns) {
            Ok(draft) => parsed.rows.push(ParsedRow { line_no, draft }),
            Err(message) => {
                warn!("Skipping row {}: {}", line_no, message);
                parsed.errors.push(ParseError {
                    line_no,
                    message,
                    raw: record.iter().collect::<Vec<_>>().join(","),
                });
            }
        }
    }

    info!(
        "Parsed {} rows from CSV ({} rejected)",
        parsed.rows.len(),
        parsed.errors.len()
    );
    Ok(parsed)
}

pub fn parse_csv_file(path: &Path) -> Result<ParsedCsv> {
    info!("Parsing CSV file: {:?}", path);
    let file = std::fs::File::open(path)
        .map_err(|e| Error::validation(format!("cannot open {}: {}", path.display(), e)))?;
    parse_csv(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parses_canonical_layout() {
        let csv = "\
date,symbol,type,quantity,price,commission,currency,note
2024-01-02,aapl,buy,10,\"$1,150.50\",1.5,USD,first lot
2024-02-01,AAPL,SELL,4,1200,,,
2024-03-01,MSFT,dividend,12.34,,,,
";
        let parsed = parse_csv(csv.as_bytes()).unwrap();
        assert!(parsed.errors.is_empty(), "{:?}", parsed.errors);
        assert_eq!(parsed.rows.len(), 3);

        let first = &parsed.rows[0];
        assert_eq!(first.line_no, 2);
        assert_eq!(first.draft.kind, TransactionKind::Buy);
        assert_eq!(first.draft.price, Some(dec!(1150.50)));
        assert_eq!(first.draft.commission, Some(dec!(1.5)));
        assert_eq!(first.draft.currency, Some(Currency::USD));
        assert_eq!(first.draft.note.as_deref(), Some("first lot"));

        assert_eq!(parsed.rows[1].draft.kind, TransactionKind::Sell);
        assert_eq!(parsed.rows[1].draft.commission, None);
        assert_eq!(parsed.rows[2].draft.kind, TransactionKind::Dividend);
        assert_eq!(parsed.rows[2].draft.quantity, dec!(12.34));
    }

    #[test]
    fn test_columns_in_any_order_and_bad_rows_collected() {
        let csv = "\
Type,Quantity,Symbol,Date
buy,5,AAPL,2024-01-02
buy,five,AAPL,2024-01-03
split,2,AAPL,2024-01-04
buy,1,AAPL,01/05/2024
";
        let parsed = parse_csv(csv.as_bytes()).unwrap();
        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(parsed.errors.len(), 3);
        assert_eq!(parsed.errors[0].line_no, 3);
        assert!(parsed.errors[0].message.contains("quantity"));
        assert_eq!(parsed.errors[0].raw, "buy,five,AAPL,2024-01-03");
        assert!(parsed.errors[1].message.contains("corporate"));
        assert!(parsed.errors[2].message.contains("date"));
    }

    #[test]
    fn test_missing_required_column() {
        let err = parse_csv("date,symbol,quantity\n2024-01-01,AAPL,1\n".as_bytes()).unwrap_err();
        assert!(matches!(err, Error::Validation(ref m) if m.contains("type")));
    }
}
