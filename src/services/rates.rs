use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::exchange::{ExchangeApi, ExchangeError, MarketRate};

const RATE_KEY_PREFIX: &str = "rate:";

/// Short-lived store for market snapshots, keyed by currency pair.
#[async_trait]
pub trait RateCache: Send + Sync {
    async fn get(&self, pair: &str) -> anyhow::Result<Option<MarketRate>>;
    async fn put(&self, rate: &MarketRate, ttl: Duration) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct RedisRateCache {
    redis_client: redis::Client,
}

impl RedisRateCache {
    pub fn new(redis_url: &str) -> anyhow::Result<Self> {
        let redis_client = redis::Client::open(redis_url)?;
        Ok(Self { redis_client })
    }
}

#[async_trait]
impl RateCache for RedisRateCache {
    async fn get(&self, pair: &str) -> anyhow::Result<Option<MarketRate>> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let key = format!("{}{}", RATE_KEY_PREFIX, pair);

        let cached: Option<String> = conn.get(&key).await?;
        match cached {
            Some(value) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, rate: &MarketRate, ttl: Duration) -> anyhow::Result<()> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let key = format!("{}{}", RATE_KEY_PREFIX, rate.pair);
        let serialized = serde_json::to_string(rate)?;

        let _: () = conn.set_ex(&key, serialized, ttl.as_secs().max(1)).await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct CachedRate {
    rate: MarketRate,
    expires_at: DateTime<Utc>,
}

/// In-process cache used when no Redis is configured. Readers never block:
/// each write swaps in a fresh snapshot of the map.
pub struct MemoryRateCache {
    inner: ArcSwap<HashMap<String, CachedRate>>,
    clock: Arc<dyn Clock>,
}

impl MemoryRateCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: ArcSwap::from_pointee(HashMap::new()),
            clock,
        }
    }
}

#[async_trait]
impl RateCache for MemoryRateCache {
    async fn get(&self, pair: &str) -> anyhow::Result<Option<MarketRate>> {
        let now = self.clock.now();
        let snapshot = self.inner.load();
        Ok(snapshot
            .get(pair)
            .filter(|cached| cached.expires_at > now)
            .map(|cached| cached.rate.clone()))
    }

    async fn put(&self, rate: &MarketRate, ttl: Duration) -> anyhow::Result<()> {
        let expires_at = self.clock.now() + chrono::Duration::from_std(ttl)?;
        self.inner.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(
                rate.pair.clone(),
                CachedRate {
                    rate: rate.clone(),
                    expires_at,
                },
            );
            next
        });
        Ok(())
    }
}

/// Market rates with a short cache in front of the exchange. Cache trouble
/// never fails a lookup; it only costs a live fetch.
pub struct RateProvider {
    exchange: Arc<dyn ExchangeApi>,
    cache: Arc<dyn RateCache>,
    ttl: Duration,
}

impl RateProvider {
    pub fn new(exchange: Arc<dyn ExchangeApi>, cache: Arc<dyn RateCache>, ttl: Duration) -> Self {
        Self {
            exchange,
            cache,
            ttl,
        }
    }

    pub async fn get_rate(&self, pair: &str) -> Result<MarketRate, ExchangeError> {
        match self.cache.get(pair).await {
            Ok(Some(rate)) => {
                tracing::debug!(pair, "Rate cache hit");
                return Ok(rate);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(pair, error = %e, "Rate cache read failed"),
        }
        self.refresh(pair).await
    }

    /// Fetches a live rate and repopulates the cache.
    pub async fn refresh(&self, pair: &str) -> Result<MarketRate, ExchangeError> {
        let rate = self.exchange.get_market_rate(pair).await?;
        tracing::info!(
            pair,
            ask = %rate.ask_price,
            bid = %rate.bid_price,
            "Fetched market rate"
        );
        if let Err(e) = self.cache.put(&rate, self.ttl).await {
            tracing::warn!(pair, error = %e, "Rate cache write failed");
        }
        Ok(rate)
    }
}
