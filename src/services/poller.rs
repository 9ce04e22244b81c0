use serde::Serialize;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info};

use crate::error::AppError;
use crate::exchange::ExchangeApi;
use crate::ports::TransactionRepository;
use crate::services::settlement::{SettlementOutcome, SettlementService, SettlementUpdate};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PollSummary {
    pub checked: usize,
    pub confirmed: usize,
    pub failed: usize,
    pub pending: usize,
    pub errors: usize,
}

/// Reconciles sends whose withdrawal has not reached a final on-chain state.
pub struct ConfirmationPoller {
    transactions: Arc<dyn TransactionRepository>,
    exchange: Arc<dyn ExchangeApi>,
    settlement: Arc<SettlementService>,
    batch_size: i64,
}

impl ConfirmationPoller {
    pub fn new(
        transactions: Arc<dyn TransactionRepository>,
        exchange: Arc<dyn ExchangeApi>,
        settlement: Arc<SettlementService>,
        batch_size: i64,
    ) -> Self {
        Self {
            transactions,
            exchange,
            settlement,
            batch_size,
        }
    }

    /// One pass over the unsettled sends. A failure on one transaction is
    /// logged and counted; the rest of the batch still runs.
    pub async fn poll_once(&self) -> Result<PollSummary, AppError> {
        let unsettled = self.transactions.list_unsettled(self.batch_size).await?;
        let mut summary = PollSummary::default();

        if unsettled.is_empty() {
            return Ok(summary);
        }

        debug!("Polling {} unsettled withdrawal(s)", unsettled.len());

        for tx in unsettled {
            summary.checked += 1;
            let Some(withdrawal_id) = tx.asset_send().and_then(|m| m.withdrawal_id.clone()) else {
                continue;
            };

            let status = match self.exchange.get_withdrawal_status(&withdrawal_id).await {
                Ok(status) => status,
                Err(e) => {
                    error!(
                        transaction_id = %tx.transaction_id,
                        %withdrawal_id,
                        error = %e,
                        "Failed to fetch withdrawal status"
                    );
                    summary.errors += 1;
                    continue;
                }
            };

            let update = SettlementUpdate {
                status: status.onchain_status(),
                tx_hash: status.transaction_hash.clone(),
                confirmations: status.confirmations,
            };
            match self.settlement.apply(&tx, update).await {
                Ok(SettlementOutcome::Confirmed) => summary.confirmed += 1,
                Ok(SettlementOutcome::Failed) => summary.failed += 1,
                Ok(_) => summary.pending += 1,
                Err(e) => {
                    error!(
                        transaction_id = %tx.transaction_id,
                        error = %e,
                        "Failed to record settlement"
                    );
                    summary.errors += 1;
                }
            }
        }

        Ok(summary)
    }
}

/// Runs the confirmation poller loop until the task is dropped.
pub async fn run_confirmation_poller(poller: Arc<ConfirmationPoller>, interval: Duration) {
    info!(interval_secs = interval.as_secs(), "Confirmation poller started");

    loop {
        match poller.poll_once().await {
            Ok(summary) if summary.checked > 0 => info!(
                checked = summary.checked,
                confirmed = summary.confirmed,
                failed = summary.failed,
                errors = summary.errors,
                "Confirmation poll complete"
            ),
            Ok(_) => {}
            Err(e) => error!("Confirmation poll error: {}", e),
        }

        sleep(interval).await;
    }
}
