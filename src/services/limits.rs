use chrono::Duration;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::LimitConfig;
use crate::domain::money::format_minor;
use crate::domain::{DestinationAccount, TransactionKind};
use crate::error::AppError;
use crate::ports::{RepositoryResult, TransactionRepository};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    PerTransaction,
    Daily,
    Monthly,
    NewBeneficiaryDaily,
}

impl LimitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitKind::PerTransaction => "per_transaction",
            LimitKind::Daily => "daily",
            LimitKind::Monthly => "monthly",
            LimitKind::NewBeneficiaryDaily => "new_beneficiary_daily",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LimitCheck {
    pub ok: bool,
    pub violated_limit: Option<LimitKind>,
    pub detail: Option<String>,
}

impl LimitCheck {
    fn pass() -> Self {
        Self {
            ok: true,
            violated_limit: None,
            detail: None,
        }
    }

    fn violated(limit: LimitKind, used: i64, amount: i64, ceiling: i64) -> Self {
        let detail = if used == 0 {
            format!(
                "{} exceeds the {} limit of {}",
                format_minor(amount),
                limit.as_str().replace('_', " "),
                format_minor(ceiling)
            )
        } else {
            format!(
                "{} already sent plus {} exceeds the {} limit of {}",
                format_minor(used),
                format_minor(amount),
                limit.as_str().replace('_', " "),
                format_minor(ceiling)
            )
        };
        Self {
            ok: false,
            violated_limit: Some(limit),
            detail: Some(detail),
        }
    }

    pub fn into_result(self) -> Result<(), AppError> {
        match self.violated_limit {
            Some(limit) if !self.ok => Err(AppError::LimitExceeded {
                limit: limit.as_str(),
                detail: self.detail.unwrap_or_default(),
            }),
            _ => Ok(()),
        }
    }
}

/// Rolling-window spend ceilings. Windows are summed by the store on every
/// call, never cached here.
pub struct LimitValidator {
    transactions: Arc<dyn TransactionRepository>,
    config: LimitConfig,
    clock: Arc<dyn Clock>,
}

impl LimitValidator {
    pub fn new(
        transactions: Arc<dyn TransactionRepository>,
        config: LimitConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            transactions,
            config,
            clock,
        }
    }

    pub fn config(&self) -> &LimitConfig {
        &self.config
    }

    /// Checks are ordered and stop at the first breach.
    pub async fn validate(
        &self,
        user_id: Uuid,
        amount: i64,
        destination: &DestinationAccount,
    ) -> RepositoryResult<LimitCheck> {
        let now = self.clock.now();

        if amount > self.config.per_transaction {
            return Ok(LimitCheck::violated(
                LimitKind::PerTransaction,
                0,
                amount,
                self.config.per_transaction,
            ));
        }

        let daily = self
            .transactions
            .aggregate_sum(user_id, TransactionKind::AssetSend, now - Duration::hours(24))
            .await?;
        if daily + amount > self.config.daily {
            return Ok(LimitCheck::violated(
                LimitKind::Daily,
                daily,
                amount,
                self.config.daily,
            ));
        }

        let monthly = self
            .transactions
            .aggregate_sum(user_id, TransactionKind::AssetSend, now - Duration::days(30))
            .await?;
        if monthly + amount > self.config.monthly {
            return Ok(LimitCheck::violated(
                LimitKind::Monthly,
                monthly,
                amount,
                self.config.monthly,
            ));
        }

        if destination.is_new(now, Duration::days(self.config.new_beneficiary_days)) {
            let sent = self
                .transactions
                .aggregate_destination_sum(destination.id, now - Duration::hours(24))
                .await?;
            if sent + amount > self.config.new_beneficiary_daily {
                return Ok(LimitCheck::violated(
                    LimitKind::NewBeneficiaryDaily,
                    sent,
                    amount,
                    self.config.new_beneficiary_daily,
                ));
            }
        }

        tracing::debug!(%user_id, amount, "Limits passed");
        Ok(LimitCheck::pass())
    }
}
