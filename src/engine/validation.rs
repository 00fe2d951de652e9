use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::corporate_actions::DEFAULT_SPINOFF_ALLOCATION;
use crate::db::{Portfolio, Transaction, TransactionDraft, TransactionKind};
use crate::error::{Error, Result};

/// Normalize a ticker: trimmed, uppercase, no inner whitespace.
pub fn normalize_symbol(symbol: &str) -> Result<String> {
    let symbol = symbol.trim().to_ascii_uppercase();
    if symbol.is_empty() {
        return Err(Error::validation("symbol must not be empty"));
    }
    if symbol.chars().any(char::is_whitespace) {
        return Err(Error::validation(format!(
            "symbol '{}' must not contain whitespace",
            symbol
        )));
    }
    Ok(symbol)
}

fn require_positive(value: Option<Decimal>, what: &str, kind: TransactionKind) -> Result<Decimal> {
    match value {
        Some(v) if v > Decimal::ZERO => Ok(v),
        Some(v) => Err(Error::validation(format!(
            "{} {} must be positive, got {}",
            kind.as_str(),
            what,
            v
        ))),
        None => Err(Error::validation(format!(
            "{} requires a {}",
            kind.as_str(),
            what
        ))),
    }
}

/// Turn a draft into a transaction ready for the engine.
///
/// `today` bounds the trade date; the transaction id is freshly generated.
pub fn validate(
    portfolio: &Portfolio,
    draft: TransactionDraft,
    today: NaiveDate,
) -> Result<Transaction> {
    let kind = draft.kind;
    let symbol = normalize_symbol(&draft.symbol)?;

    if draft.trade_date > today {
        return Err(Error::validation(format!(
            "trade date {} is in the future",
            draft.trade_date
        )));
    }

    let commission = draft.commission.unwrap_or(Decimal::ZERO);
    if commission < Decimal::ZERO {
        return Err(Error::validation(format!(
            "commission must not be negative, got {}",
            commission
        )));
    }
    if draft.quantity < Decimal::ZERO {
        return Err(Error::validation(format!(
            "quantity must not be negative, got {}",
            draft.quantity
        )));
    }

    let currency = draft.currency.unwrap_or(portfolio.base_currency);
    let fx_rate = if currency == portfolio.base_currency {
        match draft.fx_rate {
            Some(rate) if rate != Decimal::ONE => {
                return Err(Error::validation(format!(
                    "exchange rate for {} into itself must be 1, got {}",
                    currency, rate
                )))
            }
            _ => Decimal::ONE,
        }
    } else {
        require_positive(draft.fx_rate, "exchange rate", kind).map_err(|_| {
            Error::validation(format!(
                "{} transaction in {} needs a positive exchange rate into {}",
                kind.as_str(),
                currency,
                portfolio.base_currency
            ))
        })?
    };

    if !draft.lot_selection.is_empty() && kind != TransactionKind::Sell {
        return Err(Error::validation("lot selection is only valid on a sell"));
    }

    let mut quantity = draft.quantity;
    let mut cash_amount = draft.cash_amount;
    let mut ratio = draft.ratio;
    let mut allocation = draft.allocation;
    let counterpart_symbol = draft
        .counterpart_symbol
        .as_deref()
        .map(normalize_symbol)
        .transpose()?;

    if kind.is_priced() {
        require_positive(draft.price, "price", kind)?;
        require_positive(Some(quantity), "quantity", kind)?;
    } else if draft.price.is_some() {
        return Err(Error::validation(format!(
            "{} must not carry a price",
            kind.as_str()
        )));
    }

    if kind != TransactionKind::Dividend && cash_amount.is_some() {
        return Err(Error::validation(format!(
            "{} must not carry a cash amount",
            kind.as_str()
        )));
    }
    if !matches!(kind, TransactionKind::Merger | TransactionKind::Spinoff | TransactionKind::TickerChange)
        && counterpart_symbol.is_some()
    {
        return Err(Error::validation(format!(
            "{} must not name a counterpart symbol",
            kind.as_str()
        )));
    }
    if kind != TransactionKind::Spinoff && allocation.is_some() {
        return Err(Error::validation(format!(
            "{} must not carry a cost basis allocation",
            kind.as_str()
        )));
    }

    match kind {
        TransactionKind::Buy | TransactionKind::Sell | TransactionKind::DividendReinvest => {
            if ratio.is_some() {
                return Err(Error::validation(format!(
                    "{} must not carry a ratio",
                    kind.as_str()
                )));
            }
        }
        TransactionKind::Dividend => {
            if ratio.is_some() {
                return Err(Error::validation("DIVIDEND must not carry a ratio"));
            }
            // Older payloads put the cash in the quantity field.
            match cash_amount {
                None if quantity > Decimal::ZERO => {
                    cash_amount = Some(quantity);
                    quantity = Decimal::ZERO;
                }
                Some(_) if quantity > Decimal::ZERO => {
                    return Err(Error::validation(
                        "DIVIDEND cash belongs in cash_amount, not quantity",
                    ));
                }
                _ => {}
            }
            cash_amount = Some(require_positive(cash_amount, "cash amount", kind)?);
        }
        TransactionKind::Split => {
            ratio = Some(require_positive(ratio, "ratio", kind)?);
            quantity = Decimal::ZERO;
        }
        TransactionKind::Merger | TransactionKind::Spinoff | TransactionKind::TickerChange => {
            let target = counterpart_symbol.as_deref().ok_or_else(|| {
                Error::validation(format!("{} requires a counterpart symbol", kind.as_str()))
            })?;
            if target == symbol {
                return Err(Error::validation(format!(
                    "{} counterpart must differ from {}",
                    kind.as_str(),
                    symbol
                )));
            }
            match kind {
                TransactionKind::TickerChange => {
                    if ratio.is_some_and(|r| r != Decimal::ONE) {
                        return Err(Error::validation("TICKER_CHANGE ratio must be 1"));
                    }
                    ratio = None;
                }
                TransactionKind::Spinoff => {
                    ratio = Some(require_positive(ratio, "ratio", kind)?);
                    let alpha = allocation.unwrap_or(DEFAULT_SPINOFF_ALLOCATION);
                    if alpha <= Decimal::ZERO || alpha >= Decimal::ONE {
                        return Err(Error::validation(format!(
                            "spinoff allocation must be between 0 and 1 exclusive, got {}",
                            alpha
                        )));
                    }
                    allocation = Some(alpha);
                }
                _ => {
                    ratio = Some(require_positive(ratio, "ratio", kind)?);
                }
            }
            quantity = Decimal::ZERO;
        }
    }

    let note = draft
        .note
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());

    Ok(Transaction {
        id: Uuid::new_v4(),
        portfolio_id: portfolio.id,
        kind,
        symbol,
        trade_date: draft.trade_date,
        quantity,
        price: draft.price,
        commission,
        currency,
        fx_rate,
        cash_amount,
        ratio,
        counterpart_symbol,
        allocation,
        lot_selection: draft.lot_selection,
        note,
        import_batch: draft.import_batch,
        fingerprint: draft.fingerprint,
        seq: 0,
        created_at: Utc::now(),
    })
}
