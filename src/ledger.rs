//! Owner-scoped facade over the core
//!
//! A `Ledger` binds a store, a caller identity, market-data providers and the
//! configuration. Operations that reach a provider are async and honour the
//! ledger's cancellation token; everything else goes straight to the store.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::corporate_actions::{self, Announcement};
use crate::db::{
    CorporateAction, Holding, PerformanceSnapshot, Portfolio, PortfolioAction,
    PortfolioActionStatus, RealizedGain, Store, TaxLot, Transaction, TransactionDraft,
};
use crate::engine::{self, portfolios};
use crate::engine::portfolios::{PortfolioDraft, PortfolioUpdate};
use crate::error::{Error, Result};
use crate::importers::{self, ImportReport, ParseError};
use crate::money::Currency;
use crate::pricing::yahoo::YahooProvider;
use crate::pricing::{
    fx_rate, CachedQuoteProvider, FxProvider, HistoricalProvider, QuoteCache, QuoteProvider,
};
use crate::reports::performance::{self, MwrResult, TwrReport};
use crate::reports::{snapshot, BenchmarkComparison, PortfolioMetrics};
use crate::tax::{self, TaxReport};
use crate::utils::cancel::CancellationToken;

/// Market-data capabilities used by the ledger
#[derive(Clone)]
pub struct Providers {
    pub quotes: Arc<dyn QuoteProvider>,
    pub history: Arc<dyn HistoricalProvider>,
    pub fx: Arc<dyn FxProvider>,
}

impl Providers {
    /// One provider serving all three capabilities.
    pub fn single<P>(provider: P) -> Self
    where
        P: QuoteProvider + HistoricalProvider + FxProvider + 'static,
    {
        let shared = Arc::new(provider);
        Self {
            quotes: shared.clone(),
            history: shared.clone(),
            fx: shared,
        }
    }

    /// Yahoo Finance, with quotes served through the process-wide cache.
    pub fn yahoo(config: &AppConfig) -> Result<Self> {
        let yahoo = YahooProvider::new()?;
        let cache = QuoteCache::shared();
        cache.set_ttl(config.quote_cache_ttl());
        let quotes = CachedQuoteProvider::with_cache(yahoo.clone(), cache)
            .with_backoff(config.rate_limit_backoff());
        let yahoo = Arc::new(yahoo);
        Ok(Self {
            quotes: Arc::new(quotes),
            history: yahoo.clone(),
            fx: yahoo,
        })
    }
}

pub struct Ledger<S: Store> {
    store: S,
    owner_id: Uuid,
    providers: Providers,
    config: AppConfig,
    cancel: CancellationToken,
}

impl<S: Store> Ledger<S> {
    pub fn new(store: S, config: AppConfig, providers: Providers) -> Self {
        Self {
            store,
            owner_id: config.owner_id,
            providers,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Act as a different caller.
    pub fn with_owner(mut self, owner_id: Uuid) -> Self {
        self.owner_id = owner_id;
        self
    }

    pub fn owner_id(&self) -> Uuid {
        self.owner_id
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Token observed by every provider call; cancel it to abandon pending fetches.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    // Portfolios

    pub fn create_portfolio(&self, draft: PortfolioDraft) -> Result<Portfolio> {
        portfolios::create_portfolio(&self.store, self.owner_id, draft)
    }

    pub fn portfolios(&self) -> Result<Vec<Portfolio>> {
        portfolios::list_portfolios(&self.store, self.owner_id)
    }

    /// Look a portfolio up by id or by name.
    pub fn portfolio(&self, id_or_name: &str) -> Result<Portfolio> {
        match Uuid::parse_str(id_or_name.trim()) {
            Ok(id) => portfolios::get_portfolio(&self.store, self.owner_id, id),
            Err(_) => portfolios::find_portfolio(&self.store, self.owner_id, id_or_name),
        }
    }

    pub fn update_portfolio(&self, portfolio_id: Uuid, update: PortfolioUpdate) -> Result<Portfolio> {
        portfolios::update_portfolio(&self.store, self.owner_id, portfolio_id, update)
    }

    pub fn delete_portfolio(&self, portfolio_id: Uuid) -> Result<()> {
        portfolios::delete_portfolio(&self.store, self.owner_id, portfolio_id)
    }

    // Transactions

    /// Fill in the exchange rate for a foreign-currency draft before it is recorded.
    async fn capture_fx(&self, base: Currency, draft: &mut TransactionDraft) -> Result<()> {
        let Some(currency) = draft.currency else {
            return Ok(());
        };
        if currency == base || draft.fx_rate.is_some() {
            return Ok(());
        }
        let rate = fx_rate(
            self.providers.fx.as_ref(),
            currency,
            base,
            self.config.quote_timeout(),
            &self.cancel,
        )
        .await?;
        draft.fx_rate = Some(rate);
        Ok(())
    }

    fn base_currency(&self, portfolio_id: Uuid) -> Result<Currency> {
        Ok(portfolios::get_portfolio(&self.store, self.owner_id, portfolio_id)?.base_currency)
    }

    pub async fn add_transaction(
        &self,
        portfolio_id: Uuid,
        mut draft: TransactionDraft,
    ) -> Result<Transaction> {
        let base = self.base_currency(portfolio_id)?;
        self.capture_fx(base, &mut draft).await?;
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        engine::apply_transaction(&self.store, self.owner_id, portfolio_id, draft)
    }

    pub async fn update_transaction(
        &self,
        portfolio_id: Uuid,
        transaction_id: Uuid,
        mut draft: TransactionDraft,
    ) -> Result<Transaction> {
        let base = self.base_currency(portfolio_id)?;
        self.capture_fx(base, &mut draft).await?;
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        engine::update_transaction(&self.store, self.owner_id, portfolio_id, transaction_id, draft)
    }

    pub fn revoke_transaction(&self, portfolio_id: Uuid, transaction_id: Uuid) -> Result<Transaction> {
        engine::revoke_transaction(&self.store, self.owner_id, portfolio_id, transaction_id)
    }

    pub fn recalculate(&self, portfolio_id: Uuid, symbol: &str) -> Result<Option<Holding>> {
        engine::recalculate(&self.store, self.owner_id, portfolio_id, symbol)
    }

    pub fn transactions(&self, portfolio_id: Uuid) -> Result<Vec<Transaction>> {
        engine::transactions(&self.store, self.owner_id, portfolio_id)
    }

    pub fn holdings(&self, portfolio_id: Uuid) -> Result<Vec<Holding>> {
        engine::holdings(&self.store, self.owner_id, portfolio_id)
    }

    pub fn lots(&self, portfolio_id: Uuid, symbol: &str) -> Result<Vec<TaxLot>> {
        engine::lots(&self.store, self.owner_id, portfolio_id, symbol)
    }

    pub fn realized_gains(
        &self,
        portfolio_id: Uuid,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<RealizedGain>> {
        engine::realized_gains(&self.store, self.owner_id, portfolio_id, from, to)
    }

    // Corporate actions

    pub fn split(&self, portfolio_id: Uuid, symbol: &str, date: NaiveDate, ratio: Decimal) -> Result<Transaction> {
        corporate_actions::apply_split(&self.store, self.owner_id, portfolio_id, symbol, date, ratio)
    }

    pub fn dividend(&self, portfolio_id: Uuid, symbol: &str, date: NaiveDate, cash: Decimal) -> Result<Transaction> {
        corporate_actions::record_dividend(&self.store, self.owner_id, portfolio_id, symbol, date, cash)
    }

    pub fn merger(
        &self,
        portfolio_id: Uuid,
        old: &str,
        new: &str,
        date: NaiveDate,
        ratio: Decimal,
    ) -> Result<Transaction> {
        corporate_actions::apply_merger(&self.store, self.owner_id, portfolio_id, old, new, date, ratio)
    }

    /// Spinoff; `allocation` falls back to the configured default.
    pub fn spinoff(
        &self,
        portfolio_id: Uuid,
        parent: &str,
        child: &str,
        date: NaiveDate,
        ratio: Decimal,
        allocation: Option<Decimal>,
    ) -> Result<Transaction> {
        corporate_actions::apply_spinoff(
            &self.store,
            self.owner_id,
            portfolio_id,
            parent,
            child,
            date,
            ratio,
            Some(allocation.unwrap_or(self.config.default_spinoff_allocation)),
        )
    }

    pub fn ticker_change(&self, portfolio_id: Uuid, old: &str, new: &str, date: NaiveDate) -> Result<Transaction> {
        corporate_actions::apply_ticker_change(&self.store, self.owner_id, portfolio_id, old, new, date)
    }

    pub fn announce(&self, announcement: Announcement) -> Result<CorporateAction> {
        corporate_actions::announce(&self.store, announcement)
    }

    pub fn unapplied_announcements(&self) -> Result<Vec<CorporateAction>> {
        corporate_actions::list_unapplied(&self.store)
    }

    pub fn distribute(&self, action_id: Uuid) -> Result<Vec<PortfolioAction>> {
        corporate_actions::distribute(&self.store, action_id)
    }

    pub fn apply_pending_actions(&self, portfolio_id: Uuid) -> Result<Vec<PortfolioAction>> {
        corporate_actions::apply_pending(
            &self.store,
            self.owner_id,
            portfolio_id,
            self.config.default_spinoff_allocation,
        )
    }

    pub fn portfolio_actions(
        &self,
        portfolio_id: Uuid,
        status: Option<PortfolioActionStatus>,
    ) -> Result<Vec<PortfolioAction>> {
        corporate_actions::list_actions(&self.store, self.owner_id, portfolio_id, status)
    }

    // Imports

    /// Import a canonical CSV file, capturing exchange rates for foreign rows.
    pub async fn import_csv(
        &self,
        portfolio_id: Uuid,
        path: &Path,
        dry_run: bool,
    ) -> Result<ImportReport> {
        let base = self.base_currency(portfolio_id)?;
        let mut parsed = importers::parse_csv_file(path)?;

        let mut rates: HashMap<Currency, Decimal> = HashMap::new();
        let mut priced = Vec::with_capacity(parsed.rows.len());
        for mut row in std::mem::take(&mut parsed.rows) {
            let currency = match row.draft.currency {
                Some(c) if c != base && row.draft.fx_rate.is_none() => c,
                _ => {
                    priced.push(row);
                    continue;
                }
            };
            let cached = rates.get(&currency).copied();
            let rate = match cached {
                Some(rate) => Ok(rate),
                None => fx_rate(
                    self.providers.fx.as_ref(),
                    currency,
                    base,
                    self.config.quote_timeout(),
                    &self.cancel,
                )
                .await
                .inspect(|rate| {
                    rates.insert(currency, *rate);
                }),
            };
            match rate {
                Ok(rate) => {
                    row.draft.fx_rate = Some(rate);
                    priced.push(row);
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(err) => {
                    warn!("No {}/{} rate for line {}: {}", currency, base, row.line_no, err);
                    parsed.errors.push(ParseError {
                        line_no: row.line_no,
                        message: err.to_string(),
                        raw: format!("{} {} {}", row.draft.trade_date, row.draft.symbol, currency),
                    });
                }
            }
        }
        parsed.rows = priced;

        importers::import_rows(&self.store, self.owner_id, portfolio_id, parsed, dry_run)
    }

    pub fn delete_import_batch(&self, portfolio_id: Uuid, batch_id: Uuid) -> Result<usize> {
        importers::delete_batch(&self.store, self.owner_id, portfolio_id, batch_id)
    }

    // Snapshots and analytics

    pub fn record_snapshot(
        &self,
        portfolio_id: Uuid,
        prices: &HashMap<String, Decimal>,
        date: NaiveDate,
    ) -> Result<PerformanceSnapshot> {
        snapshot::record(&self.store, self.owner_id, portfolio_id, prices, date)
    }

    /// Today's snapshot priced from live quotes.
    pub async fn snapshot_from_quotes(&self, portfolio_id: Uuid) -> Result<PerformanceSnapshot> {
        snapshot::record_from_quotes(
            &self.store,
            self.owner_id,
            portfolio_id,
            self.providers.quotes.as_ref(),
            self.config.batch_timeout(),
            &self.cancel,
        )
        .await
    }

    pub fn snapshots(&self, portfolio_id: Uuid, from: NaiveDate, to: NaiveDate) -> Result<Vec<PerformanceSnapshot>> {
        snapshot::in_range(&self.store, self.owner_id, portfolio_id, from, to)
    }

    pub fn twr(&self, portfolio_id: Uuid, from: NaiveDate, to: NaiveDate) -> Result<TwrReport> {
        performance::twr(&self.store, self.owner_id, portfolio_id, from, to)
    }

    pub fn mwr(&self, portfolio_id: Uuid, from: NaiveDate, to: NaiveDate) -> Result<MwrResult> {
        performance::mwr(&self.store, self.owner_id, portfolio_id, from, to)
    }

    pub fn metrics(&self, portfolio_id: Uuid, from: NaiveDate, to: NaiveDate) -> Result<PortfolioMetrics> {
        performance::portfolio_metrics(&self.store, self.owner_id, portfolio_id, from, to)
    }

    pub async fn compare_to_benchmark(
        &self,
        portfolio_id: Uuid,
        benchmark: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<BenchmarkComparison> {
        let comparison = performance::compare_to_benchmark(
            &self.store,
            self.owner_id,
            portfolio_id,
            self.providers.history.as_ref(),
            benchmark,
            from,
            to,
            self.config.batch_timeout(),
            &self.cancel,
        )
        .await?;
        info!(
            "Portfolio {} vs {}: alpha {:?}",
            portfolio_id, benchmark, comparison.alpha
        );
        Ok(comparison)
    }

    pub fn tax_report(&self, portfolio_id: Uuid, year: i32) -> Result<TaxReport> {
        tax::generate_report(&self.store, self.owner_id, portfolio_id, year)
    }
}
