//! Composition root: builds every service from configuration.

use anyhow::{Context, Result};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::adapters::PostgresStore;
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, ExchangeConfig};
use crate::exchange::{ApiCredentials, CircuitBreaker, ExchangeApi, ExchangeClient};
use crate::health::{DependencyChecker, ExchangeChecker, HealthChecks, PostgresChecker, RedisChecker};
use crate::ports::{Repositories, Store};
use crate::services::{
    AuditQueue, AuditSink, ConfirmationPoller, MemoryRateCache, OrchestratorSettings,
    PostgresAuditWriter, RateCache, RateProvider, RedisRateCache, SettlementService,
    TransactionOrchestrator,
};
use crate::AppState;

/// A fully wired service, ready to serve or poll.
pub struct Application {
    pub state: AppState,
    pub poller: Arc<ConfirmationPoller>,
    /// Resolves once every audit producer is dropped and the queue drained.
    pub audit_worker: JoinHandle<u64>,
}

pub fn exchange_client(config: &ExchangeConfig, clock: Arc<dyn Clock>) -> ExchangeClient {
    let breaker = Arc::new(CircuitBreaker::new(config.breaker_config(), clock.clone()));
    let credentials = match (&config.api_key, &config.api_secret) {
        (Some(api_key), Some(api_secret)) => Some(ApiCredentials {
            api_key: api_key.clone(),
            api_secret: api_secret.clone(),
        }),
        _ => None,
    };

    ExchangeClient::with_timeout(
        config.base_url.clone(),
        breaker,
        clock,
        Duration::from_secs(config.timeout_secs),
    )
    .with_credentials(credentials)
    .with_market(config.market())
    .with_retry_policy(config.retry_policy())
}

/// Wires the services over any store. Used by `build` and by tests running
/// against the in-memory store.
#[allow(clippy::too_many_arguments)]
pub fn assemble<S: Store + 'static>(
    store: Arc<S>,
    exchange: Arc<dyn ExchangeApi>,
    rate_cache: Arc<dyn RateCache>,
    audit: Arc<dyn AuditSink>,
    checkers: Vec<Arc<dyn DependencyChecker>>,
    config: &Config,
    clock: Arc<dyn Clock>,
) -> (AppState, Arc<ConfirmationPoller>) {
    let repos = Repositories::from_store(store);
    let rates = Arc::new(RateProvider::new(
        exchange.clone(),
        rate_cache,
        Duration::from_secs(config.exchange.rate_cache_ttl_secs),
    ));

    let orchestrator = Arc::new(TransactionOrchestrator::new(
        repos.clone(),
        exchange.clone(),
        rates,
        audit.clone(),
        OrchestratorSettings {
            market: config.exchange.market(),
            fees: config.fees.clone(),
            limits: config.limits.clone(),
            compliance: config.compliance.clone(),
            send: config.send.clone(),
        },
        clock.clone(),
    ));
    let settlement = Arc::new(SettlementService::new(
        repos.transactions.clone(),
        audit,
        clock.clone(),
    ));
    let poller = Arc::new(ConfirmationPoller::new(
        repos.transactions.clone(),
        exchange.clone(),
        settlement.clone(),
        config.poll_batch_size,
    ));

    let state = AppState {
        orchestrator,
        settlement,
        health: Arc::new(HealthChecks::new(checkers, ExchangeChecker::new(exchange))),
        webhook_secret: Arc::from(config.exchange.webhook_secret.as_str()),
        clock,
    };
    (state, poller)
}

/// Production wiring: Postgres store and audit log, Redis rate cache when
/// `REDIS_URL` is set.
pub async fn build(config: &Config, pool: PgPool) -> Result<Application> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let client = exchange_client(&config.exchange, clock.clone());
    if !client.is_configured() {
        tracing::warn!("Exchange API credentials missing, sends will be rejected");
    }
    let exchange: Arc<dyn ExchangeApi> = Arc::new(client);

    let mut checkers: Vec<Arc<dyn DependencyChecker>> =
        vec![Arc::new(PostgresChecker::new(pool.clone()))];
    let rate_cache: Arc<dyn RateCache> = match &config.redis_url {
        Some(url) => {
            checkers.push(Arc::new(RedisChecker::new(url.clone())));
            Arc::new(RedisRateCache::new(url).context("invalid REDIS_URL")?)
        }
        None => Arc::new(MemoryRateCache::new(clock.clone())),
    };

    let (audit, audit_worker) = AuditQueue::start(
        Arc::new(PostgresAuditWriter::new(pool.clone())),
        config.audit_queue_capacity,
    );

    let (state, poller) = assemble(
        Arc::new(PostgresStore::new(pool)),
        exchange,
        rate_cache,
        Arc::new(audit),
        checkers,
        config,
        clock,
    );

    Ok(Application {
        state,
        poller,
        audit_worker,
    })
}
