//! Process-wide quote cache and rate-limit gate

use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{FetchError, Quote, QuoteProvider};

/// Default quote freshness
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);
/// Minimum spacing between requests for a symbol after a rate-limit response
pub const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(12);

/// Global shared cache, so every provider wrapper in the process sees the same entries.
static SHARED: Lazy<Arc<QuoteCache>> = Lazy::new(|| Arc::new(QuoteCache::new(DEFAULT_TTL)));

#[derive(Debug, Clone)]
struct CacheEntry {
    quote: Quote,
    stored_at: Instant,
}

#[derive(Debug, Default)]
struct CacheState {
    ttl: Duration,
    entries: HashMap<String, CacheEntry>,
    backoff_until: HashMap<String, Instant>,
}

/// TTL cache of recent quotes keyed by symbol
#[derive(Debug)]
pub struct QuoteCache {
    state: Mutex<CacheState>,
}

impl QuoteCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            state: Mutex::new(CacheState {
                ttl,
                ..Default::default()
            }),
        }
    }

    pub fn shared() -> Arc<QuoteCache> {
        SHARED.clone()
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // Entries are plain data; a panic mid-update cannot leave them inconsistent
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_ttl(&self, ttl: Duration) {
        self.lock().ttl = ttl;
    }

    pub fn ttl(&self) -> Duration {
        self.lock().ttl
    }

    /// Fresh quote for `symbol`; expired entries are dropped on read.
    pub fn get(&self, symbol: &str) -> Option<Quote> {
        let mut state = self.lock();
        let ttl = state.ttl;
        match state.entries.get(symbol) {
            Some(entry) if entry.stored_at.elapsed() < ttl => Some(entry.quote.clone()),
            Some(_) => {
                state.entries.remove(symbol);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, quote: Quote) {
        let mut state = self.lock();
        state.entries.insert(
            quote.symbol.clone(),
            CacheEntry {
                quote,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, symbol: &str) {
        let mut state = self.lock();
        state.entries.remove(symbol);
        state.backoff_until.remove(symbol);
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.backoff_until.clear();
        info!("Quote cache cleared");
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn back_off(&self, symbol: &str, period: Duration) {
        self.lock()
            .backoff_until
            .insert(symbol.to_string(), Instant::now() + period);
    }

    /// Time left before `symbol` may be requested again.
    fn backoff_remaining(&self, symbol: &str) -> Option<Duration> {
        let mut state = self.lock();
        let until = *state.backoff_until.get(symbol)?;
        let now = Instant::now();
        if until > now {
            Some(until - now)
        } else {
            state.backoff_until.remove(symbol);
            None
        }
    }
}

/// Serves quotes from a [`QuoteCache`] and stops hammering a provider that
/// reported a rate limit.
pub struct CachedQuoteProvider<P> {
    inner: P,
    cache: Arc<QuoteCache>,
    backoff: Duration,
}

impl<P: QuoteProvider> CachedQuoteProvider<P> {
    /// Wrap `inner` with the process-wide cache.
    pub fn new(inner: P) -> Self {
        Self::with_cache(inner, QuoteCache::shared())
    }

    pub fn with_cache(inner: P, cache: Arc<QuoteCache>) -> Self {
        Self {
            inner,
            cache,
            backoff: RATE_LIMIT_BACKOFF,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn cache(&self) -> &Arc<QuoteCache> {
        &self.cache
    }
}

#[async_trait]
impl<P: QuoteProvider> QuoteProvider for CachedQuoteProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn get_quote(&self, symbol: &str) -> Result<Quote, FetchError> {
        if let Some(quote) = self.cache.get(symbol) {
            debug!("Using cached quote for {}", symbol);
            return Ok(quote);
        }
        if let Some(remaining) = self.cache.backoff_remaining(symbol) {
            return Err(FetchError::BackedOff {
                symbol: symbol.to_string(),
                remaining_secs: remaining.as_secs().max(1),
            });
        }

        match self.inner.get_quote(symbol).await {
            Ok(quote) => {
                self.cache.put(Quote {
                    symbol: symbol.to_string(),
                    ..quote.clone()
                });
                Ok(quote)
            }
            Err(err @ FetchError::RateLimited { .. }) => {
                warn!(
                    "{} rate-limited {}; backing off for {}s",
                    self.inner.name(),
                    symbol,
                    self.backoff.as_secs()
                );
                self.cache.back_off(symbol, self.backoff);
                Err(err)
            }
            Err(err) => Err(err),
        }
    }
}
