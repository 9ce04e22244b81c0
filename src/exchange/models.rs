use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::OnchainStatus;

/// Response from the public `/marketsummary` endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSummary {
    #[serde(default)]
    pub currency_pair: Option<String>,
    pub ask_price: BigDecimal,
    pub bid_price: BigDecimal,
    pub last_traded_price: BigDecimal,
}

/// A normalized price snapshot for one currency pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketRate {
    pub pair: String,
    pub bid_price: BigDecimal,
    pub ask_price: BigDecimal,
    pub mid_price: BigDecimal,
    pub last_trade: BigDecimal,
    pub timestamp: DateTime<Utc>,
}

impl MarketRate {
    pub fn from_summary(pair: &str, summary: MarketSummary, timestamp: DateTime<Utc>) -> Self {
        let mid_price = (&summary.bid_price + &summary.ask_price) / BigDecimal::from(2);
        Self {
            pair: summary.currency_pair.unwrap_or_else(|| pair.to_string()),
            bid_price: summary.bid_price,
            ask_price: summary.ask_price,
            mid_price,
            last_trade: summary.last_traded_price,
            timestamp,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstantQuote {
    pub id: String,
    #[serde(default)]
    pub currency_pair: Option<String>,
    pub pay_amount: BigDecimal,
    pub receive_amount: BigDecimal,
    #[serde(default)]
    pub fee: Option<BigDecimal>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResult {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WithdrawalRequest {
    pub amount: BigDecimal,
    pub address: String,
    pub network: String,
    pub reference: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalReceipt {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalStatus {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub confirmations: u32,
}

impl WithdrawalStatus {
    pub fn onchain_status(&self) -> OnchainStatus {
        onchain_status_from(&self.status)
    }
}

/// Maps an exchange withdrawal status string onto our on-chain states.
pub fn onchain_status_from(status: &str) -> OnchainStatus {
    let status = status.to_ascii_lowercase();
    if status.contains("confirmed") || status.contains("complete") {
        OnchainStatus::Confirmed
    } else if status.contains("fail") || status.contains("cancel") {
        OnchainStatus::Failed
    } else {
        OnchainStatus::Processing
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeHealth {
    pub exchange_configured: bool,
    pub exchange_healthy: bool,
    pub circuit_breaker_open: bool,
    pub failure_count: u32,
}
