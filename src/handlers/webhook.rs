use axum::{body::Bytes, extract::State, http::HeaderMap, response::IntoResponse, Json};
use serde_json::json;

use crate::error::AppError;
use crate::webhook::{parse_settlement_event, WebhookError};
use crate::AppState;

/// Exchange withdrawal callbacks. The raw body is verified before it is
/// parsed, so the signature covers exactly the bytes received.
pub async fn exchange_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    if state.webhook_secret.is_empty() {
        tracing::warn!("Webhook received but no webhook secret is configured");
        return Err(WebhookError::InvalidSignature.into());
    }

    let event = parse_settlement_event(&headers, &body, &state.webhook_secret, state.clock.now())?;
    tracing::info!(
        event_type = %event.event_type,
        withdrawal_id = %event.withdrawal_id,
        transaction_id = %event.reference,
        "Received exchange webhook"
    );

    let outcome = state.settlement.apply_event(&event).await?;
    Ok(Json(json!({
        "transaction_id": event.reference,
        "outcome": outcome,
    })))
}
