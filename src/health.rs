use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

use crate::exchange::{ExchangeApi, ExchangeHealth};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: HashMap<String, DependencyStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange: Option<ExchangeHealth>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum DependencyStatus {
    Healthy { status: String, latency_ms: u64 },
    Unhealthy { status: String, error: String },
}

impl DependencyStatus {
    fn healthy(start: Instant) -> Self {
        DependencyStatus::Healthy {
            status: "healthy".to_string(),
            latency_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn unhealthy(error: impl ToString) -> Self {
        DependencyStatus::Unhealthy {
            status: "unhealthy".to_string(),
            error: error.to_string(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, DependencyStatus::Healthy { .. })
    }
}

#[async_trait]
pub trait DependencyChecker: Send + Sync {
    fn name(&self) -> &'static str;

    /// A failing critical dependency makes the whole service unhealthy.
    fn critical(&self) -> bool {
        false
    }

    async fn check(&self) -> DependencyStatus;
}

pub struct PostgresChecker {
    pool: sqlx::PgPool,
}

impl PostgresChecker {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DependencyChecker for PostgresChecker {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn critical(&self) -> bool {
        true
    }

    async fn check(&self) -> DependencyStatus {
        let start = Instant::now();
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => DependencyStatus::healthy(start),
            Err(e) => DependencyStatus::unhealthy(e),
        }
    }
}

pub struct RedisChecker {
    url: String,
}

impl RedisChecker {
    pub fn new(url: String) -> Self {
        Self { url }
    }
}

#[async_trait]
impl DependencyChecker for RedisChecker {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn check(&self) -> DependencyStatus {
        let start = Instant::now();
        let client = match redis::Client::open(self.url.as_str()) {
            Ok(client) => client,
            Err(e) => return DependencyStatus::unhealthy(e),
        };
        let mut conn = match client.get_multiplexed_async_connection().await {
            Ok(conn) => conn,
            Err(e) => return DependencyStatus::unhealthy(e),
        };
        match redis::cmd("PING").query_async::<_, String>(&mut conn).await {
            Ok(_) => DependencyStatus::healthy(start),
            Err(e) => DependencyStatus::unhealthy(e),
        }
    }
}

/// Reports the exchange through its own health check, which never trips the
/// circuit breaker. A failing exchange degrades the service but never makes
/// it unhealthy.
pub struct ExchangeChecker {
    exchange: Arc<dyn ExchangeApi>,
}

impl ExchangeChecker {
    pub fn new(exchange: Arc<dyn ExchangeApi>) -> Self {
        Self { exchange }
    }

    pub async fn report(&self) -> ExchangeHealth {
        self.exchange.health_check().await
    }
}

fn exchange_status(health: &ExchangeHealth, start: Instant) -> DependencyStatus {
    if !health.exchange_configured {
        DependencyStatus::unhealthy("exchange credentials not configured")
    } else if health.circuit_breaker_open {
        DependencyStatus::unhealthy(format!(
            "circuit breaker open after {} failures",
            health.failure_count
        ))
    } else if !health.exchange_healthy {
        DependencyStatus::unhealthy("exchange did not respond")
    } else {
        DependencyStatus::healthy(start)
    }
}

/// Runs every checker concurrently, each bounded by a 5 second timeout.
pub async fn check_health(
    checkers: &[Arc<dyn DependencyChecker>],
    exchange: Option<&ExchangeChecker>,
    start_time: Instant,
) -> HealthResponse {
    let timeout_duration = Duration::from_secs(5);

    let checks = checkers.iter().map(|checker| async move {
        let status = timeout(timeout_duration, checker.check())
            .await
            .unwrap_or_else(|_| DependencyStatus::unhealthy("timeout"));
        (checker.name(), checker.critical(), status)
    });
    let exchange_check = async {
        match exchange {
            Some(checker) => timeout(timeout_duration, checker.report()).await.ok(),
            None => None,
        }
    };
    let (results, exchange_health) = tokio::join!(join_all(checks), exchange_check);

    let mut critical_failure = false;
    let mut non_critical_failure = false;
    let mut dependencies = HashMap::new();
    for (name, critical, status) in results {
        if !status.is_healthy() {
            if critical {
                critical_failure = true;
            } else {
                non_critical_failure = true;
            }
        }
        dependencies.insert(name.to_string(), status);
    }

    if exchange.is_some() {
        let status = match &exchange_health {
            Some(health) => exchange_status(health, Instant::now()),
            None => DependencyStatus::unhealthy("timeout"),
        };
        non_critical_failure |= !status.is_healthy();
        dependencies.insert("exchange".to_string(), status);
    }

    HealthResponse {
        status: overall_status(critical_failure, non_critical_failure).to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: start_time.elapsed().as_secs(),
        dependencies,
        exchange: exchange_health,
    }
}

/// Everything `GET /health` reports on.
pub struct HealthChecks {
    checkers: Vec<Arc<dyn DependencyChecker>>,
    exchange: ExchangeChecker,
    started: Instant,
}

impl HealthChecks {
    pub fn new(checkers: Vec<Arc<dyn DependencyChecker>>, exchange: ExchangeChecker) -> Self {
        Self {
            checkers,
            exchange,
            started: Instant::now(),
        }
    }

    pub async fn run(&self) -> HealthResponse {
        check_health(&self.checkers, Some(&self.exchange), self.started).await
    }
}

fn overall_status(critical_failure: bool, non_critical_failure: bool) -> &'static str {
    if critical_failure {
        "unhealthy"
    } else if non_critical_failure {
        "degraded"
    } else {
        "healthy"
    }
}
