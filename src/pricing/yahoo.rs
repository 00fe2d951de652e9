use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use super::{FetchError, FxProvider, HistoricalPrice, HistoricalProvider, Quote, QuoteProvider};
use crate::money::Currency;

const PROVIDER: &str = "Yahoo Finance";
const CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

/// Yahoo Finance chart response
#[derive(Debug, Deserialize)]
struct YahooChartResponse {
    chart: ChartData,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    result: Option<Vec<ChartResult>>,
    error: Option<YahooError>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: Meta,
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Meta {
    #[serde(rename = "regularMarketPrice")]
    regular_market_price: Option<f64>,
    #[serde(rename = "chartPreviousClose")]
    chart_previous_close: Option<f64>,
    #[serde(rename = "regularMarketVolume")]
    regular_market_volume: Option<i64>,
    #[serde(rename = "regularMarketTime")]
    regular_market_time: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<Bars>,
    adjclose: Option<Vec<AdjClose>>,
}

#[derive(Debug, Deserialize)]
struct Bars {
    open: Option<Vec<Option<f64>>>,
    high: Option<Vec<Option<f64>>>,
    low: Option<Vec<Option<f64>>>,
    close: Option<Vec<Option<f64>>>,
    volume: Option<Vec<Option<i64>>>,
}

#[derive(Debug, Deserialize)]
struct AdjClose {
    adjclose: Option<Vec<Option<f64>>>,
}

#[derive(Debug, Deserialize)]
struct YahooError {
    code: String,
    description: String,
}

fn to_decimal(value: f64) -> Option<Decimal> {
    Decimal::from_f64_retain(value).map(|d| d.round_dp(6).normalize())
}

fn unavailable(msg: impl Into<String>) -> FetchError {
    FetchError::Unavailable(format!("{}: {}", PROVIDER, msg.into()))
}

fn first_result(data: YahooChartResponse) -> Result<ChartResult, FetchError> {
    if let Some(error) = data.chart.error {
        return Err(unavailable(format!(
            "API error {} - {}",
            error.code, error.description
        )));
    }
    data.chart
        .result
        .and_then(|r| r.into_iter().next())
        .ok_or_else(|| unavailable("no data returned"))
}

fn parse_quote(symbol: &str, data: YahooChartResponse) -> Result<Quote, FetchError> {
    let meta = first_result(data)?.meta;
    let price = meta
        .regular_market_price
        .and_then(to_decimal)
        .ok_or_else(|| unavailable(format!("no price for {}", symbol)))?;
    let prev_close = meta.chart_previous_close.and_then(to_decimal);
    let change = prev_close.map(|prev| price - prev);
    let change_pct = match (change, prev_close) {
        (Some(change), Some(prev)) if !prev.is_zero() => {
            Some((change / prev * Decimal::ONE_HUNDRED).round_dp(4))
        }
        _ => None,
    };
    let timestamp = meta
        .regular_market_time
        .and_then(|t| DateTime::from_timestamp(t, 0))
        .unwrap_or_else(Utc::now);

    Ok(Quote {
        symbol: symbol.to_string(),
        price,
        prev_close,
        change,
        change_pct,
        volume: meta.regular_market_volume,
        timestamp,
    })
}

fn parse_history(data: YahooChartResponse) -> Result<Vec<HistoricalPrice>, FetchError> {
    let result = first_result(data)?;
    let timestamps = result.timestamp.unwrap_or_default();
    let adj = result
        .indicators
        .adjclose
        .and_then(|a| a.into_iter().next())
        .and_then(|a| a.adjclose)
        .unwrap_or_default();
    let bars = result
        .indicators
        .quote
        .into_iter()
        .next()
        .ok_or_else(|| unavailable("no quote data"))?;

    let opens = bars.open.unwrap_or_default();
    let highs = bars.high.unwrap_or_default();
    let lows = bars.low.unwrap_or_default();
    let closes = bars.close.ok_or_else(|| unavailable("no close prices"))?;
    let volumes = bars.volume.unwrap_or_default();
    let at = |series: &[Option<f64>], i: usize| series.get(i).copied().flatten().and_then(to_decimal);

    let mut prices = Vec::with_capacity(timestamps.len());
    for (i, &timestamp) in timestamps.iter().enumerate() {
        let date = DateTime::from_timestamp(timestamp, 0)
            .ok_or_else(|| unavailable(format!("invalid timestamp {}", timestamp)))?
            .date_naive();

        // Holidays come back as null bars
        let Some(close) = at(&closes, i) else {
            continue;
        };

        prices.push(HistoricalPrice {
            date,
            open: at(&opens, i),
            high: at(&highs, i),
            low: at(&lows, i),
            close,
            adj_close: at(&adj, i),
            volume: volumes.get(i).copied().flatten(),
        });
    }
    Ok(prices)
}

/// Quote and history provider over the public chart endpoint
#[derive(Debug, Clone)]
pub struct YahooProvider {
    client: Client,
    base_url: String,
}

impl YahooProvider {
    pub fn new() -> Result<Self, FetchError> {
        Self::with_base_url(CHART_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent("Mozilla/5.0 (compatible; lotbook/0.1)")
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| unavailable(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn fetch(&self, symbol: &str, url: &str) -> Result<YahooChartResponse, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| unavailable(format!("request for {} failed: {}", symbol, e)))?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited {
                provider: PROVIDER.to_string(),
                symbol: symbol.to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(unavailable(format!(
                "returned status {} for {}",
                response.status(),
                symbol
            )));
        }

        response
            .json()
            .await
            .map_err(|e| unavailable(format!("failed to parse response for {}: {}", symbol, e)))
    }
}

#[async_trait]
impl QuoteProvider for YahooProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn get_quote(&self, symbol: &str) -> Result<Quote, FetchError> {
        info!("Fetching current price for {} from {}", symbol, PROVIDER);
        let url = format!("{}/{}", self.base_url, symbol);
        parse_quote(symbol, self.fetch(symbol, &url).await?)
    }
}

#[async_trait]
impl HistoricalProvider for YahooProvider {
    async fn get_historical(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<HistoricalPrice>, FetchError> {
        info!(
            "Fetching historical prices for {} from {} to {}",
            symbol, from, to
        );
        let from_timestamp = from
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| unavailable("invalid from date"))?
            .and_utc()
            .timestamp();
        let to_timestamp = to
            .and_hms_opt(23, 59, 59)
            .ok_or_else(|| unavailable("invalid to date"))?
            .and_utc()
            .timestamp();

        let url = format!(
            "{}/{}?period1={}&period2={}&interval=1d",
            self.base_url, symbol, from_timestamp, to_timestamp
        );
        let prices = parse_history(self.fetch(symbol, &url).await?)?;
        debug!("Fetched {} historical prices for {}", prices.len(), symbol);
        Ok(prices)
    }
}

/// Yahoo lists currency pairs as `EURUSD=X`.
fn fx_symbol(from: Currency, to: Currency) -> String {
    format!("{}{}=X", from, to)
}

#[async_trait]
impl FxProvider for YahooProvider {
    async fn get_fx(&self, from: Currency, to: Currency) -> Result<Decimal, FetchError> {
        if from == to {
            return Ok(Decimal::ONE);
        }
        let symbol = fx_symbol(from, to);
        info!("Fetching exchange rate {} from {}", symbol, PROVIDER);
        let url = format!("{}/{}", self.base_url, symbol);
        Ok(parse_quote(&symbol, self.fetch(&symbol, &url).await?)?.price)
    }
}
