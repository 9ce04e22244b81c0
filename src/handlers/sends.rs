use axum::{extract::State, http::HeaderMap, http::StatusCode, response::IntoResponse, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::money::parse_major;
use crate::error::AppError;
use crate::services::{SendOutcome, SendRequest};
use crate::AppState;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Amounts arrive as major-unit decimal strings (`"1000.00"`).
#[derive(Debug, Deserialize)]
pub struct QuoteBody {
    pub user_id: Uuid,
    pub amount: String,
}

#[derive(Debug, Deserialize)]
pub struct SendBody {
    pub user_id: Uuid,
    pub wallet_id: Uuid,
    pub amount: String,
    pub beneficiary_id: Uuid,
    #[serde(default)]
    pub destination_id: Option<Uuid>,
    pub purpose: String,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

fn minor_units(amount: &str) -> Result<i64, AppError> {
    parse_major(amount).ok_or_else(|| {
        AppError::InvalidAmount(format!("{:?} is not an amount with at most two decimals", amount))
    })
}

pub async fn create_quote(
    State(state): State<AppState>,
    Json(body): Json<QuoteBody>,
) -> Result<impl IntoResponse, AppError> {
    let amount = minor_units(&body.amount)?;
    let quote = state.orchestrator.quote(body.user_id, amount).await?;
    Ok(Json(quote))
}

/// The `Idempotency-Key` header is used when the body carries no key.
pub async fn create_send(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SendBody>,
) -> Result<impl IntoResponse, AppError> {
    let face_value = minor_units(&body.amount)?;
    let idempotency_key = body.idempotency_key.or_else(|| {
        headers
            .get(IDEMPOTENCY_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    });

    let result = state
        .orchestrator
        .execute(
            body.user_id,
            body.wallet_id,
            SendRequest {
                face_value,
                beneficiary_id: body.beneficiary_id,
                destination_id: body.destination_id,
                purpose: body.purpose,
                idempotency_key,
            },
        )
        .await?;

    let status = match (result.replayed, result.outcome) {
        (true, _) => StatusCode::OK,
        (false, SendOutcome::ComplianceHold | SendOutcome::Processing) => StatusCode::ACCEPTED,
        (false, _) => StatusCode::CREATED,
    };
    Ok((status, Json(result)))
}
