//! Fire-and-forget audit trail. Callers enqueue onto a bounded channel and a
//! single worker task persists events, so a slow audit store never holds up a
//! money movement.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub action: String,
    pub actor_id: Option<Uuid>,
    pub resource: String,
    pub details: Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        action: impl Into<String>,
        actor_id: Option<Uuid>,
        resource: impl Into<String>,
        details: Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            action: action.into(),
            actor_id,
            resource: resource.into(),
            details,
            created_at: now,
        }
    }
}

/// Never blocks and never fails the caller.
pub trait AuditSink: Send + Sync {
    fn log(&self, event: AuditEvent);
}

#[async_trait]
pub trait AuditWriter: Send + Sync {
    async fn write(&self, event: &AuditEvent) -> anyhow::Result<()>;
}

/// Emits audit events as structured log lines.
pub struct TracingAuditWriter;

#[async_trait]
impl AuditWriter for TracingAuditWriter {
    async fn write(&self, event: &AuditEvent) -> anyhow::Result<()> {
        tracing::info!(
            target: "audit",
            event_id = %event.id,
            action = %event.action,
            resource = %event.resource,
            details = %event.details,
            "audit"
        );
        Ok(())
    }
}

pub struct PostgresAuditWriter {
    pool: PgPool,
}

impl PostgresAuditWriter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditWriter for PostgresAuditWriter {
    async fn write(&self, event: &AuditEvent) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (id, action, actor_id, resource, details, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.id)
        .bind(&event.action)
        .bind(event.actor_id)
        .bind(&event.resource)
        .bind(&event.details)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Producer side of the audit channel. Cheap to clone.
#[derive(Clone)]
pub struct AuditQueue {
    sender: mpsc::Sender<AuditEvent>,
    dropped: Arc<AtomicU64>,
}

impl AuditQueue {
    /// Spawns the worker. The handle resolves to the number of events written
    /// once every `AuditQueue` clone has been dropped and the backlog drained.
    pub fn start(writer: Arc<dyn AuditWriter>, capacity: usize) -> (Self, JoinHandle<u64>) {
        let (sender, mut receiver) = mpsc::channel::<AuditEvent>(capacity.max(1));

        let handle = tokio::spawn(async move {
            let mut written = 0u64;
            while let Some(event) = receiver.recv().await {
                match writer.write(&event).await {
                    Ok(()) => written += 1,
                    Err(e) => tracing::error!(
                        event_id = %event.id,
                        action = %event.action,
                        error = %e,
                        "Failed to write audit event"
                    ),
                }
            }
            tracing::info!(written, "Audit worker stopped");
            written
        });

        (
            Self {
                sender,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            handle,
        )
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl AuditSink for AuditQueue {
    fn log(&self, event: AuditEvent) {
        if let Err(e) = self.sender.try_send(event) {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "queue full",
                mpsc::error::TrySendError::Closed(_) => "worker stopped",
            };
            tracing::warn!(reason, dropped, "Dropped audit event");
        }
    }
}
