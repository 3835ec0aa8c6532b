// =============================================================================
// Provider cache — TTL + request coalescing + stale-grace serving
// =============================================================================
//
// Wraps any `MarketDataProvider` and is itself one, so callers never know
// whether a value came from the wire or the cache.
//
// Semantics per key:
//   - values younger than `ttl` are served without a fetch;
//   - at most one fetch is in flight (concurrent callers await it);
//   - on fetch error, a value younger than `stale_grace` is served with a
//     warning instead of surfacing the error.
// =============================================================================

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::Result;
use crate::market_data::{
    GexBundle, MarketContext, MarketDataProvider, MtfTrend, OptionQuote, StockQuote, VixSnapshot,
};

/// Default freshness window for quotes and schedule data.
const DEFAULT_TTL: Duration = Duration::from_secs(60);
/// How long a stale value may still be served after a fetch failure.
const DEFAULT_STALE_GRACE: Duration = Duration::from_secs(300);
/// Opportunistic purge threshold.
const PURGE_THRESHOLD: usize = 512;

// ---------------------------------------------------------------------------
// Generic coalesced slot map
// ---------------------------------------------------------------------------

struct SlotInner<T> {
    value: Option<(T, Instant)>,
}

struct CoalescedCache<T> {
    slots: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<SlotInner<T>>>>>,
    ttl: Duration,
    stale_grace: Duration,
}

impl<T: Clone> CoalescedCache<T> {
    fn new(ttl: Duration, stale_grace: Duration) -> Self {
        Self {
            slots: parking_lot::Mutex::new(HashMap::new()),
            ttl,
            stale_grace,
        }
    }

    fn slot(&self, key: &str) -> Arc<tokio::sync::Mutex<SlotInner<T>>> {
        let mut slots = self.slots.lock();
        if slots.len() > PURGE_THRESHOLD {
            // Drop slots whose value is past the grace window and not in use.
            slots.retain(|_, slot| match slot.try_lock() {
                Ok(inner) => match &inner.value {
                    Some((_, at)) => at.elapsed() <= self.stale_grace,
                    None => false,
                },
                Err(_) => true,
            });
        }
        slots
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(tokio::sync::Mutex::new(SlotInner { value: None }))
            })
            .clone()
    }

    /// Return a fresh value, coalescing concurrent fetches per key.
    async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let slot = self.slot(key);
        // Holding the slot lock across the fetch is what coalesces callers:
        // the second caller blocks here and then finds a fresh value.
        let mut inner = slot.lock().await;

        if let Some((value, at)) = &inner.value {
            if at.elapsed() <= self.ttl {
                return Ok(value.clone());
            }
        }

        match fetch().await {
            Ok(value) => {
                inner.value = Some((value.clone(), Instant::now()));
                Ok(value)
            }
            Err(e) => {
                if let Some((value, at)) = &inner.value {
                    if at.elapsed() <= self.stale_grace {
                        warn!(
                            key,
                            age_secs = at.elapsed().as_secs(),
                            error = %e,
                            "provider fetch failed; serving stale cached value"
                        );
                        return Ok(value.clone());
                    }
                }
                Err(e)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ProviderCache
// ---------------------------------------------------------------------------

pub struct ProviderCache {
    inner: Arc<dyn MarketDataProvider>,
    stocks: CoalescedCache<StockQuote>,
    options: CoalescedCache<OptionQuote>,
    vix: CoalescedCache<VixSnapshot>,
    gex: CoalescedCache<GexBundle>,
    contexts: CoalescedCache<MarketContext>,
    mtf: CoalescedCache<MtfTrend>,
}

impl ProviderCache {
    pub fn new(inner: Arc<dyn MarketDataProvider>) -> Self {
        Self::with_ttl(inner, DEFAULT_TTL, DEFAULT_STALE_GRACE)
    }

    pub fn with_ttl(
        inner: Arc<dyn MarketDataProvider>,
        ttl: Duration,
        stale_grace: Duration,
    ) -> Self {
        debug!(
            provider = inner.name(),
            ttl_secs = ttl.as_secs(),
            grace_secs = stale_grace.as_secs(),
            "provider cache initialised"
        );
        Self {
            inner,
            stocks: CoalescedCache::new(ttl, stale_grace),
            options: CoalescedCache::new(ttl, stale_grace),
            vix: CoalescedCache::new(ttl, stale_grace),
            gex: CoalescedCache::new(ttl, stale_grace),
            contexts: CoalescedCache::new(ttl, stale_grace),
            mtf: CoalescedCache::new(ttl, stale_grace),
        }
    }
}

#[async_trait]
impl MarketDataProvider for ProviderCache {
    async fn stock_quote(&self, symbol: &str) -> Result<StockQuote> {
        let inner = self.inner.clone();
        let sym = symbol.to_string();
        self.stocks
            .get_or_fetch(symbol, move || async move { inner.stock_quote(&sym).await })
            .await
    }

    async fn option_quote(&self, occ_symbol: &str) -> Result<OptionQuote> {
        let inner = self.inner.clone();
        let sym = occ_symbol.to_string();
        self.options
            .get_or_fetch(occ_symbol, move || async move {
                inner.option_quote(&sym).await
            })
            .await
    }

    async fn vix(&self) -> Result<VixSnapshot> {
        let inner = self.inner.clone();
        self.vix
            .get_or_fetch("vix", move || async move { inner.vix().await })
            .await
    }

    async fn gex_bundle(&self, underlying: &str) -> Result<GexBundle> {
        let inner = self.inner.clone();
        let sym = underlying.to_string();
        self.gex
            .get_or_fetch(underlying, move || async move {
                inner.gex_bundle(&sym).await
            })
            .await
    }

    async fn market_context(&self, symbol: &str) -> Result<MarketContext> {
        let inner = self.inner.clone();
        let sym = symbol.to_string();
        self.contexts
            .get_or_fetch(symbol, move || async move {
                inner.market_context(&sym).await
            })
            .await
    }

    async fn mtf_trend(&self, symbol: &str) -> Result<MtfTrend> {
        let inner = self.inner.clone();
        let sym = symbol.to_string();
        self.mtf
            .get_or_fetch(symbol, move || async move { inner.mtf_trend(&sym).await })
            .await
    }

    fn name(&self) -> &'static str {
        "cached"
    }
}
