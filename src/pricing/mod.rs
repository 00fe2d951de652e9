// Pricing module - market data capabilities, quote cache, deadlines

pub mod cache;
pub mod yahoo;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::error::{Error, Result};
use crate::money::Currency;
use crate::utils::cancel::CancellationToken;

pub use cache::{CachedQuoteProvider, QuoteCache};

/// Deadline for a single-symbol fetch
pub const QUOTE_TIMEOUT: Duration = Duration::from_secs(10);
/// Deadline for batch and historical fetches
pub const BATCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Latest quote for a symbol
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Quote {
    pub symbol: String,
    pub price: Decimal,
    pub prev_close: Option<Decimal>,
    pub change: Option<Decimal>,
    pub change_pct: Option<Decimal>,
    pub volume: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

/// Daily bar
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoricalPrice {
    pub date: NaiveDate,
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub close: Decimal,
    pub adj_close: Option<Decimal>,
    pub volume: Option<i64>,
}

/// Provider-side failure
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("{provider} rate limit reached for {symbol}")]
    RateLimited { provider: String, symbol: String },

    #[error("requests for {symbol} are backed off for another {remaining_secs}s")]
    BackedOff { symbol: String, remaining_secs: u64 },

    #[error("{0}")]
    Unavailable(String),

    #[error("{0} timed out")]
    Timeout(String),
}

impl From<FetchError> for Error {
    fn from(err: FetchError) -> Self {
        Error::ExternalUnavailable(err.to_string())
    }
}

#[async_trait]
pub trait QuoteProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn get_quote(&self, symbol: &str) -> std::result::Result<Quote, FetchError>;

    /// Quotes for every symbol that could be fetched; failures are dropped.
    async fn get_quotes(&self, symbols: &[String]) -> HashMap<String, Quote> {
        let mut quotes = HashMap::new();
        for symbol in symbols {
            match self.get_quote(symbol).await {
                Ok(quote) => {
                    quotes.insert(symbol.clone(), quote);
                }
                Err(e) => warn!("Dropping {} from batch: {}", symbol, e),
            }
        }
        quotes
    }
}

#[async_trait]
pub trait HistoricalProvider: Send + Sync {
    async fn get_historical(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> std::result::Result<Vec<HistoricalPrice>, FetchError>;
}

#[async_trait]
pub trait FxProvider: Send + Sync {
    /// Units of `to` per unit of `from`.
    async fn get_fx(&self, from: Currency, to: Currency) -> std::result::Result<Decimal, FetchError>;
}

/// Await `fut` under a deadline, giving up early when `cancel` fires.
pub async fn with_deadline<T, F>(
    what: &str,
    limit: Duration,
    cancel: &CancellationToken,
    fut: F,
) -> Result<T>
where
    F: Future<Output = std::result::Result<T, FetchError>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        outcome = tokio::time::timeout(limit, fut) => match outcome {
            Ok(result) => result.map_err(Error::from),
            Err(_) => Err(FetchError::Timeout(what.to_string()).into()),
        },
    }
}

/// Rate converting `from` into `to`; 1 when they match, without asking the provider.
pub async fn fx_rate(
    provider: &dyn FxProvider,
    from: Currency,
    to: Currency,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Decimal> {
    if from == to {
        return Ok(Decimal::ONE);
    }
    let rate = with_deadline(
        &format!("exchange rate {}/{}", from, to),
        timeout,
        cancel,
        provider.get_fx(from, to),
    )
    .await?;
    if rate <= Decimal::ZERO {
        return Err(Error::ExternalUnavailable(format!(
            "provider returned non-positive rate {} for {}/{}",
            rate, from, to
        )));
    }
    Ok(rate)
}

/// Fixed quotes, rates and histories kept in memory
#[derive(Debug, Clone, Default)]
pub struct StaticPrices {
    pub quotes: HashMap<String, Decimal>,
    pub rates: HashMap<(Currency, Currency), Decimal>,
    pub history: HashMap<String, Vec<HistoricalPrice>>,
}

impl StaticPrices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quote(mut self, symbol: &str, price: Decimal) -> Self {
        self.quotes.insert(symbol.to_ascii_uppercase(), price);
        self
    }

    pub fn with_rate(mut self, from: Currency, to: Currency, rate: Decimal) -> Self {
        self.rates.insert((from, to), rate);
        self
    }

    pub fn with_closes(mut self, symbol: &str, closes: &[(NaiveDate, Decimal)]) -> Self {
        let bars = closes
            .iter()
            .map(|(date, close)| HistoricalPrice {
                date: *date,
                open: None,
                high: None,
                low: None,
                close: *close,
                adj_close: None,
                volume: None,
            })
            .collect();
        self.history.insert(symbol.to_ascii_uppercase(), bars);
        self
    }
}

#[async_trait]
impl QuoteProvider for StaticPrices {
    fn name(&self) -> &str {
        "static"
    }

    async fn get_quote(&self, symbol: &str) -> std::result::Result<Quote, FetchError> {
        let price = self
            .quotes
            .get(&symbol.to_ascii_uppercase())
            .copied()
            .ok_or_else(|| FetchError::Unavailable(format!("no price for {}", symbol)))?;
        Ok(Quote {
            symbol: symbol.to_string(),
            price,
            prev_close: None,
            change: None,
            change_pct: None,
            volume: None,
            timestamp: Utc::now(),
        })
    }
}

#[async_trait]
impl HistoricalProvider for StaticPrices {
    async fn get_historical(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> std::result::Result<Vec<HistoricalPrice>, FetchError> {
        Ok(self
            .history
            .get(&symbol.to_ascii_uppercase())
            .map(|bars| {
                bars.iter()
                    .filter(|b| b.date >= from && b.date <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl FxProvider for StaticPrices {
    async fn get_fx(&self, from: Currency, to: Currency) -> std::result::Result<Decimal, FetchError> {
        if from == to {
            return Ok(Decimal::ONE);
        }
        self.rates
            .get(&(from, to))
            .copied()
            .ok_or_else(|| FetchError::Unavailable(format!("no rate for {}/{}", from, to)))
    }
}
