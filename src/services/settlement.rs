use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use crate::clock::Clock;
use crate::domain::{OnchainStatus, Transaction, TransactionStatus};
use crate::error::AppError;
use crate::ports::TransactionRepository;
use crate::services::audit::{AuditEvent, AuditSink};
use crate::webhook::{SettlementEvent, WebhookError};

/// Latest on-chain facts about a withdrawal, from polling or a callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementUpdate {
    pub status: OnchainStatus,
    pub tx_hash: Option<String>,
    pub confirmations: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementOutcome {
    Confirmed,
    Failed,
    StillProcessing,
    /// The transaction had already reached a final on-chain state.
    AlreadyFinal,
}

/// Applies on-chain settlement to stored sends. Shared by the poller and the
/// webhook so both paths move a transaction the same way.
pub struct SettlementService {
    transactions: Arc<dyn TransactionRepository>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl SettlementService {
    pub fn new(
        transactions: Arc<dyn TransactionRepository>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            transactions,
            audit,
            clock,
        }
    }

    /// Idempotent: a final on-chain state is never revisited.
    pub async fn apply(
        &self,
        tx: &Transaction,
        update: SettlementUpdate,
    ) -> Result<SettlementOutcome, AppError> {
        let mut metadata = tx.metadata.clone();
        let meta = metadata.as_asset_send_mut().ok_or_else(|| {
            AppError::Internal(format!(
                "transaction {} is not an asset send",
                tx.transaction_id
            ))
        })?;

        if meta.onchain.status.is_final() {
            return Ok(SettlementOutcome::AlreadyFinal);
        }

        let now = self.clock.now();
        let tx_hash = update.tx_hash.or_else(|| meta.onchain.tx_hash.clone());
        let (status, outcome) = match update.status {
            OnchainStatus::Confirmed => (TransactionStatus::Completed, SettlementOutcome::Confirmed),
            OnchainStatus::Failed => (TransactionStatus::Failed, SettlementOutcome::Failed),
            OnchainStatus::Processing | OnchainStatus::NotSubmitted => {
                let unchanged = tx_hash == meta.onchain.tx_hash
                    && update.confirmations == meta.onchain.confirmations
                    && meta.onchain.status == OnchainStatus::Processing;
                if unchanged {
                    return Ok(SettlementOutcome::StillProcessing);
                }
                (tx.status, SettlementOutcome::StillProcessing)
            }
        };

        meta.onchain.status = match update.status {
            OnchainStatus::NotSubmitted => OnchainStatus::Processing,
            other => other,
        };
        meta.onchain.tx_hash = tx_hash;
        meta.onchain.confirmations = update.confirmations;
        meta.onchain.updated_at = now;
        let withdrawal_id = meta.withdrawal_id.clone();

        self.transactions
            .update_settlement(&tx.transaction_id, status, &metadata, now)
            .await?;

        match outcome {
            SettlementOutcome::Confirmed => tracing::info!(
                transaction_id = %tx.transaction_id,
                withdrawal_id = ?withdrawal_id,
                confirmations = update.confirmations,
                "Withdrawal confirmed on-chain"
            ),
            SettlementOutcome::Failed => tracing::error!(
                transaction_id = %tx.transaction_id,
                withdrawal_id = ?withdrawal_id,
                amount = tx.amount,
                "Withdrawal failed on-chain, wallet debit needs manual reversal"
            ),
            _ => tracing::debug!(
                transaction_id = %tx.transaction_id,
                confirmations = update.confirmations,
                "Withdrawal still processing"
            ),
        }

        if outcome != SettlementOutcome::StillProcessing {
            self.audit.log(AuditEvent::new(
                "asset_send.settled",
                Some(tx.user_id),
                tx.transaction_id.clone(),
                json!({ "outcome": outcome, "withdrawal_id": withdrawal_id }),
                now,
            ));
        }

        Ok(outcome)
    }

    /// Applies a verified exchange callback to the send it references.
    pub async fn apply_event(&self, event: &SettlementEvent) -> Result<SettlementOutcome, AppError> {
        let tx = self
            .transactions
            .find_by_transaction_id(&event.reference)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("transaction {}", event.reference)))?;

        let known_withdrawal = tx.asset_send().and_then(|m| m.withdrawal_id.as_deref());
        if known_withdrawal != Some(event.withdrawal_id.as_str()) {
            tracing::warn!(
                transaction_id = %event.reference,
                withdrawal_id = %event.withdrawal_id,
                "Webhook withdrawal does not match stored transaction"
            );
            return Err(WebhookError::InvalidPayload(
                "withdrawal id does not match the referenced transaction".to_string(),
            )
            .into());
        }

        self.apply(
            &tx,
            SettlementUpdate {
                status: event.status,
                tx_hash: event.tx_hash.clone(),
                confirmations: event.confirmations,
            },
        )
        .await
    }
}
