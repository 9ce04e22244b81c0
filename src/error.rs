use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::money::format_minor;
use crate::exchange::ExchangeError;
use crate::ports::RepositoryError;
use crate::validation::ValidationError;
use crate::webhook::WebhookError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("User is not active")]
    UserNotActive,

    #[error("KYC tier {actual} is below the required tier {required}")]
    KycTierInsufficient { required: i32, actual: i32 },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Beneficiary {0} not found")]
    BeneficiaryNotFound(Uuid),

    #[error("Beneficiary {0} has no active destination account")]
    NoDestinationAccount(Uuid),

    #[error("Invalid destination: {0}")]
    InvalidDestination(String),

    #[error("Beneficiary is in cooldown until {until}")]
    BeneficiaryCooldown { until: DateTime<Utc> },

    #[error("Country {0} is blocked")]
    CountryBlocked(String),

    #[error("{limit} limit exceeded: {detail}")]
    LimitExceeded { limit: &'static str, detail: String },

    #[error("Idempotency key {0} was already used for a different send")]
    IdempotencyConflict(String),

    #[error("Insufficient balance: {} available, {} required", rands(.available), rands(.required))]
    InsufficientBalance { available: i64, required: i64 },

    #[error("Circuit breaker open: {0}")]
    CircuitBreakerOpen(String),

    #[error("Exchange error: {0}")]
    ExternalApi(String),

    #[error(transparent)]
    Webhook(#[from] WebhookError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

fn rands(amount: &i64) -> String {
    format_minor(*amount)
}

impl AppError {
    /// Stable machine-readable code carried in every error response.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::UserNotActive => "USER_NOT_ACTIVE",
            AppError::KycTierInsufficient { .. } => "KYC_TIER_INSUFFICIENT",
            AppError::InvalidAmount(_) => "INVALID_AMOUNT",
            AppError::BeneficiaryNotFound(_) => "BENEFICIARY_NOT_FOUND",
            AppError::NoDestinationAccount(_) => "NO_DESTINATION_ACCOUNT",
            AppError::InvalidDestination(_) => "INVALID_DESTINATION",
            AppError::BeneficiaryCooldown { .. } => "BENEFICIARY_COOLDOWN",
            AppError::CountryBlocked(_) => "COUNTRY_BLOCKED",
            AppError::LimitExceeded { .. } => "LIMIT_EXCEEDED",
            AppError::IdempotencyConflict(_) => "IDEMPOTENCY_CONFLICT",
            AppError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            AppError::CircuitBreakerOpen(_) => "CIRCUIT_BREAKER_OPEN",
            AppError::ExternalApi(_) => "EXTERNAL_API_ERROR",
            AppError::Webhook(e) => e.code(),
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Database(_) | AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::UserNotActive
            | AppError::KycTierInsufficient { .. }
            | AppError::CountryBlocked(_) => StatusCode::FORBIDDEN,
            AppError::InvalidAmount(_)
            | AppError::InvalidDestination(_)
            | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::BeneficiaryNotFound(_) | AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::NoDestinationAccount(_)
            | AppError::LimitExceeded { .. }
            | AppError::InsufficientBalance { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::BeneficiaryCooldown { .. } | AppError::IdempotencyConflict(_) => {
                StatusCode::CONFLICT
            }
            AppError::CircuitBreakerOpen(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::ExternalApi(_) => StatusCode::BAD_GATEWAY,
            AppError::Webhook(WebhookError::InvalidPayload(_)) => StatusCode::BAD_REQUEST,
            AppError::Webhook(_) => StatusCode::UNAUTHORIZED,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ExchangeError> for AppError {
    fn from(e: ExchangeError) -> Self {
        match e {
            ExchangeError::CircuitBreakerOpen(msg) => AppError::CircuitBreakerOpen(msg),
            rejected @ ExchangeError::UnsupportedNetwork { .. } => {
                AppError::InvalidDestination(rejected.to_string())
            }
            other => AppError::ExternalApi(other.to_string()),
        }
    }
}

impl From<RepositoryError> for AppError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::NotFound(what) => AppError::NotFound(what),
            other => AppError::Database(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Request failed");
        }
        let body = Json(json!({
            "error": self.to_string(),
            "code": self.code(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
