//! Exchange settlement callbacks: signature verification, replay window and
//! event-to-status mapping.

use axum::http::HeaderMap;
use chrono::{DateTime, Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

use crate::domain::OnchainStatus;

type HmacSha256 = Hmac<Sha256>;

pub const TIMESTAMP_HEADER: &str = "x-webhook-timestamp";
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Callbacks further than this from our clock, in either direction, are
/// rejected as replays.
pub fn max_event_age() -> Duration {
    Duration::minutes(5)
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WebhookError {
    #[error("Missing or malformed webhook signature headers")]
    MissingHeaders,

    #[error("Webhook timestamp is outside the accepted window")]
    Expired,

    #[error("Webhook signature does not match")]
    InvalidSignature,

    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),
}

impl WebhookError {
    pub fn code(&self) -> &'static str {
        match self {
            WebhookError::MissingHeaders => "WEBHOOK_MISSING_HEADERS",
            WebhookError::Expired => "WEBHOOK_EXPIRED",
            WebhookError::InvalidSignature => "WEBHOOK_INVALID_SIGNATURE",
            WebhookError::InvalidPayload(_) => "WEBHOOK_INVALID_PAYLOAD",
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: RawWithdrawal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawWithdrawal {
    withdrawal_id: String,
    customer_reference: String,
    #[serde(default)]
    transaction_hash: Option<String>,
    #[serde(default)]
    confirmations: u32,
}

/// A verified withdrawal status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementEvent {
    pub event_type: String,
    pub withdrawal_id: String,
    /// Our transaction id, echoed back by the exchange.
    pub reference: String,
    pub status: OnchainStatus,
    pub tx_hash: Option<String>,
    pub confirmations: u32,
    pub sent_at: DateTime<Utc>,
}

pub fn status_for_event(event_type: &str) -> OnchainStatus {
    match event_type {
        "withdrawal.completed" => OnchainStatus::Confirmed,
        "withdrawal.failed" => OnchainStatus::Failed,
        _ => OnchainStatus::Processing,
    }
}

/// Hex HMAC-SHA256 over `timestamp || body`, as the exchange signs callbacks.
pub fn sign_payload(secret: &str, timestamp_ms: i64, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(timestamp_ms.to_string().as_bytes());
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

pub fn parse_settlement_event(
    headers: &HeaderMap,
    body: &[u8],
    secret: &str,
    now: DateTime<Utc>,
) -> Result<SettlementEvent, WebhookError> {
    let (Some(timestamp_raw), Some(signature)) =
        (header(headers, TIMESTAMP_HEADER), header(headers, SIGNATURE_HEADER))
    else {
        return Err(WebhookError::MissingHeaders);
    };

    let timestamp_ms: i64 = timestamp_raw
        .parse()
        .map_err(|_| WebhookError::MissingHeaders)?;
    let sent_at = Utc
        .timestamp_millis_opt(timestamp_ms)
        .single()
        .ok_or(WebhookError::MissingHeaders)?;

    if (now - sent_at).num_milliseconds().abs() > max_event_age().num_milliseconds() {
        tracing::warn!(%sent_at, "Rejected webhook outside replay window");
        return Err(WebhookError::Expired);
    }

    let signature = hex::decode(signature).map_err(|_| WebhookError::InvalidSignature)?;
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| WebhookError::InvalidSignature)?;
    mac.update(timestamp_ms.to_string().as_bytes());
    mac.update(body);
    if mac.verify_slice(&signature).is_err() {
        tracing::warn!("Rejected webhook with invalid signature");
        return Err(WebhookError::InvalidSignature);
    }

    let raw: RawEvent =
        serde_json::from_slice(body).map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;

    Ok(SettlementEvent {
        status: status_for_event(&raw.event_type),
        event_type: raw.event_type,
        withdrawal_id: raw.data.withdrawal_id,
        reference: raw.data.customer_reference,
        tx_hash: raw.data.transaction_hash,
        confirmations: raw.data.confirmations,
        sent_at,
    })
}
