//! Convert clap arguments into core payloads.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

use crate::cli::{AnnounceArgs, TxAddArgs};
use crate::corporate_actions::Announcement;
use crate::db::{CorporateActionKind, TransactionDraft, TransactionKind};
use crate::money::Currency;
use crate::reports::Period;

pub fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", value))
}

/// Date argument, defaulting to today.
pub fn date_or_today(value: Option<&str>) -> Result<NaiveDate> {
    match value {
        Some(v) => parse_date(v),
        None => Ok(Utc::now().date_naive()),
    }
}

pub fn parse_decimal(value: &str, what: &str) -> Result<Decimal> {
    Decimal::from_str(value.trim()).with_context(|| format!("Invalid {} '{}'", what, value))
}

fn optional_decimal(value: Option<&str>, what: &str) -> Result<Option<Decimal>> {
    value.map(|v| parse_decimal(v, what)).transpose()
}

pub fn parse_uuid(value: &str, what: &str) -> Result<Uuid> {
    Uuid::parse_str(value.trim()).with_context(|| format!("Invalid {} id '{}'", what, value))
}

/// Parse repeated `SYMBOL=PRICE` pairs.
pub fn parse_price_assignments(pairs: &[String]) -> Result<HashMap<String, Decimal>> {
    let mut prices = HashMap::new();
    for pair in pairs {
        let (symbol, price) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("Expected SYMBOL=PRICE, got '{}'", pair))?;
        let symbol = symbol.trim();
        if symbol.is_empty() {
            bail!("Missing symbol in '{}'", pair);
        }
        prices.insert(symbol.to_uppercase(), parse_decimal(price, "price")?);
    }
    Ok(prices)
}

/// Named period as typed on the command line.
pub fn parse_period(value: &str) -> Result<Period> {
    match value.trim().to_uppercase().as_str() {
        "MTD" => Ok(Period::Mtd),
        "QTD" => Ok(Period::Qtd),
        "YTD" => Ok(Period::Ytd),
        "1Y" | "ONE_YEAR" | "12M" => Ok(Period::OneYear),
        "ALL" | "ALLTIME" | "ALL_TIME" => Ok(Period::AllTime),
        other => bail!("Unknown period '{}'. Use MTD, QTD, YTD, 1Y or ALL", other),
    }
}

pub fn to_draft(args: &TxAddArgs) -> Result<TransactionDraft> {
    let kind = TransactionKind::from_str(&args.kind)?;
    let quantity = optional_decimal(args.quantity.as_deref(), "quantity")?.unwrap_or_default();
    let price = optional_decimal(args.price.as_deref(), "price")?;
    let mut draft = TransactionDraft::new(
        kind,
        &args.symbol,
        date_or_today(args.date.as_deref())?,
        quantity,
        price,
    );
    draft.commission = optional_decimal(args.commission.as_deref(), "commission")?;
    draft.currency = args
        .currency
        .as_deref()
        .map(Currency::from_str)
        .transpose()?;
    draft.fx_rate = optional_decimal(args.fx_rate.as_deref(), "exchange rate")?;
    draft.cash_amount = optional_decimal(args.cash.as_deref(), "cash amount")?;
    draft.ratio = optional_decimal(args.ratio.as_deref(), "ratio")?;
    draft.counterpart_symbol = args.counterpart.clone();
    draft.allocation = optional_decimal(args.allocation.as_deref(), "allocation")?;
    draft.lot_selection = args
        .lots
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| parse_uuid(l, "lot"))
        .collect::<Result<_>>()?;
    draft.note = args.note.clone();
    Ok(draft)
}

pub fn to_announcement(args: &AnnounceArgs) -> Result<Announcement> {
    Ok(Announcement {
        symbol: args.symbol.clone(),
        kind: CorporateActionKind::from_str(&args.kind)?,
        effective_date: parse_date(&args.date)?,
        ratio: optional_decimal(args.ratio.as_deref(), "ratio")?,
        amount_per_share: optional_decimal(args.amount.as_deref(), "amount")?,
        new_symbol: args.new_symbol.clone(),
        allocation: optional_decimal(args.allocation.as_deref(), "allocation")?,
    })
}
