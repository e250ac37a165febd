//! Market quote sources and the caching provider handed to the engine
//!
//! A cached quote is served while younger than `ttl`. After that a refetch
//! is attempted; if it fails the old quote is still served while younger
//! than `max_stale`, and past that every field becomes unknown.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use hashwatt_core::{MarketQuote, MarketQuoteProvider, NetworkStats};

use crate::config::MarketConfig;
use crate::metrics;

/// Longest TTL or staleness window honoured, one week
pub const MAX_QUOTE_AGE_SECS: u64 = 7 * 24 * 3600;

pub trait QuoteSource: Send + Sync {
    fn fetch(&self) -> Result<MarketQuote>;

    fn name(&self) -> &str;
}

/// Fixed quote from configuration and the dataset
#[derive(Debug, Clone)]
pub struct StaticQuoteSource {
    quote: MarketQuote,
}

impl StaticQuoteSource {
    pub fn new(quote: MarketQuote) -> Self {
        Self { quote }
    }

    /// Configured fields win; anything left unset falls back to `fallback`
    pub fn from_config(market: &MarketConfig, fallback: Option<&MarketQuote>) -> Self {
        let fallback_network = fallback.and_then(|q| q.network.clone()).unwrap_or_default();
        let network = NetworkStats {
            block_reward: market.block_reward.or(fallback_network.block_reward),
            network_difficulty: market.network_difficulty.or(fallback_network.network_difficulty),
        };
        let has_network = network.block_reward.is_some() || network.network_difficulty.is_some();

        Self {
            quote: MarketQuote {
                price_per_coin: market.price_per_coin.or(fallback.and_then(|q| q.price_per_coin)),
                reward_rate_per_th_per_day: market
                    .reward_rate_per_th_per_day
                    .or(fallback.and_then(|q| q.reward_rate_per_th_per_day)),
                network: has_network.then_some(network),
            },
        }
    }
}

impl QuoteSource for StaticQuoteSource {
    fn fetch(&self) -> Result<MarketQuote> {
        Ok(self.quote.clone())
    }

    fn name(&self) -> &str {
        "static"
    }
}

struct CachedQuote {
    quote: MarketQuote,
    fetched_at: DateTime<Utc>,
}

pub struct CachedQuoteProvider<S: QuoteSource> {
    source: S,
    ttl: Duration,
    max_stale: Duration,
    cache: Mutex<Option<CachedQuote>>,
}

impl<S: QuoteSource> CachedQuoteProvider<S> {
    /// Both windows are capped at [`MAX_QUOTE_AGE_SECS`]
    pub fn new(source: S, ttl_secs: u64, max_stale_secs: u64) -> Self {
        let ttl_secs = ttl_secs.min(MAX_QUOTE_AGE_SECS);
        let max_stale_secs = max_stale_secs.clamp(ttl_secs, MAX_QUOTE_AGE_SECS);
        Self {
            source,
            ttl: Duration::seconds(ttl_secs as i64),
            max_stale: Duration::seconds(max_stale_secs as i64),
            cache: Mutex::new(None),
        }
    }

    pub fn from_config(source: S, market: &MarketConfig) -> Self {
        Self::new(source, market.quote_ttl_secs, market.quote_max_stale_secs)
    }

    /// Quote as seen at `now`
    pub fn quote_at(&self, now: DateTime<Utc>) -> MarketQuote {
        // held across the fetch so concurrent callers share one refresh
        let mut cache = self.cache.lock();

        if let Some(cached) = cache.as_ref() {
            if now - cached.fetched_at < self.ttl {
                metrics::inc_quote_cache_hits();
                return cached.quote.clone();
            }
        }

        metrics::inc_quote_cache_misses();
        match self.source.fetch() {
            Ok(quote) => {
                debug!("Fetched market quote from {}", self.source.name());
                *cache = Some(CachedQuote {
                    quote: quote.clone(),
                    fetched_at: now,
                });
                quote
            }
            Err(e) => {
                metrics::inc_quote_fetch_errors();
                match cache.as_ref() {
                    Some(cached) if now - cached.fetched_at < self.max_stale => {
                        warn!(
                            "Quote fetch from {} failed ({}), serving quote from {}",
                            self.source.name(),
                            e,
                            cached.fetched_at
                        );
                        cached.quote.clone()
                    }
                    _ => {
                        warn!("Quote fetch from {} failed ({}), market data unknown", self.source.name(), e);
                        MarketQuote::unknown()
                    }
                }
            }
        }
    }
}

impl<S: QuoteSource> MarketQuoteProvider for CachedQuoteProvider<S> {
    fn latest_quote(&self) -> MarketQuote {
        self.quote_at(Utc::now())
    }
}
