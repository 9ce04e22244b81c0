//! Transaction domain entity.
//! Append-only record of one logical money movement, keyed by its
//! idempotency key.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::compliance::ComplianceResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(TransactionStatus::Pending),
            "completed" => Some(TransactionStatus::Completed),
            "failed" => Some(TransactionStatus::Failed),
            _ => None,
        }
    }
}

/// Category used by rolling-window aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    AssetSend,
    Deposit,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::AssetSend => "asset_send",
            TransactionKind::Deposit => "deposit",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "asset_send" => Some(TransactionKind::AssetSend),
            "deposit" => Some(TransactionKind::Deposit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnchainStatus {
    /// Not yet submitted to the exchange (compliance holds stay here).
    NotSubmitted,
    Processing,
    Confirmed,
    Failed,
}

impl OnchainStatus {
    pub fn is_final(&self) -> bool {
        matches!(self, OnchainStatus::Confirmed | OnchainStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnchainState {
    pub status: OnchainStatus,
    pub tx_hash: Option<String>,
    pub confirmations: u32,
    pub updated_at: DateTime<Utc>,
}

/// Originator and beneficiary identity captured for every transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TravelRuleInfo {
    pub originator_id: Uuid,
    pub originator_name: String,
    pub originator_country: String,
    pub beneficiary_name: String,
    pub beneficiary_country: String,
    pub beneficiary_address: String,
    pub purpose: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetSendMetadata {
    pub beneficiary_id: Uuid,
    pub destination_id: Uuid,
    pub asset: String,
    pub network: String,
    pub destination_address: String,
    pub face_value: i64,
    pub fee_amount: i64,
    pub vat_portion: i64,
    pub fee_ex_vat: i64,
    pub net_to_exchange: i64,
    pub total_charge: i64,
    pub asset_amount: Option<BigDecimal>,
    pub exchange_rate: Option<BigDecimal>,
    pub travel_rule: TravelRuleInfo,
    pub compliance: ComplianceResult,
    pub exchange_order_id: Option<String>,
    pub withdrawal_id: Option<String>,
    pub onchain: OnchainState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositMetadata {
    pub reference: Option<String>,
}

/// Typed settlement detail, persisted as JSONB. The `schema` tag carries the
/// version so old rows keep decoding after the shape evolves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "schema")]
pub enum TransactionMetadata {
    #[serde(rename = "asset_send.v1")]
    AssetSend(AssetSendMetadata),
    #[serde(rename = "deposit.v1")]
    Deposit(DepositMetadata),
}

impl TransactionMetadata {
    pub fn as_asset_send(&self) -> Option<&AssetSendMetadata> {
        match self {
            TransactionMetadata::AssetSend(meta) => Some(meta),
            TransactionMetadata::Deposit(_) => None,
        }
    }

    pub fn as_asset_send_mut(&mut self) -> Option<&mut AssetSendMetadata> {
        match self {
            TransactionMetadata::AssetSend(meta) => Some(meta),
            TransactionMetadata::Deposit(_) => None,
        }
    }
}

/// Domain entity representing a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    /// Idempotency key; unique across all transactions.
    pub transaction_id: String,
    pub user_id: Uuid,
    pub wallet_id: Option<Uuid>,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    /// Signed minor units, negative for debits.
    pub amount: i64,
    /// Face value in minor units; what the rolling limits sum.
    pub face_value: i64,
    pub destination_id: Option<Uuid>,
    pub metadata: TransactionMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transaction_id: String,
        user_id: Uuid,
        wallet_id: Option<Uuid>,
        kind: TransactionKind,
        status: TransactionStatus,
        amount: i64,
        face_value: i64,
        destination_id: Option<Uuid>,
        metadata: TransactionMetadata,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            transaction_id,
            user_id,
            wallet_id,
            kind,
            status,
            amount,
            face_value,
            destination_id,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn asset_send(&self) -> Option<&AssetSendMetadata> {
        self.metadata.as_asset_send()
    }

    pub fn is_compliance_hold(&self) -> bool {
        self.status == TransactionStatus::Pending
            && self.asset_send().map_or(false, |m| m.compliance.hold)
    }
}
