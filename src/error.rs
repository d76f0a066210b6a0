use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum DepositError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Unsupported currency: {0}. Must be ETH or SOL")]
    UnsupportedCurrency(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Payment not found: {0}")]
    PaymentNotFound(String),

    #[error("Balance source {source_name} failed: {reason}")]
    SourceError { source_name: String, reason: String },

    #[error("Exchange rate unavailable: {0}")]
    RateUnavailable(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("RPC error: {0}")]
    RpcError(#[from] ethers::providers::ProviderError),

    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Corrupt record: {0}")]
    CorruptRecord(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl DepositError {
    pub fn source_failure(source_name: &str, reason: impl ToString) -> Self {
        DepositError::SourceError {
            source_name: source_name.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub error_code: String,
    pub timestamp: chrono::DateTime<Utc>,
    pub request_id: String,
}

impl IntoResponse for DepositError {
    fn into_response(self) -> Response {
        let request_id = Uuid::new_v4().to_string();

        let (status, error_code) = match &self {
            DepositError::InvalidAmount(_) => (StatusCode::BAD_REQUEST, "INVALID_AMOUNT"),
            DepositError::UnsupportedCurrency(_) => {
                (StatusCode::BAD_REQUEST, "UNSUPPORTED_CURRENCY")
            }
            DepositError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            DepositError::PaymentNotFound(_) => (StatusCode::NOT_FOUND, "PAYMENT_NOT_FOUND"),
            DepositError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            DepositError::SourceError { .. }
            | DepositError::RateUnavailable(_)
            | DepositError::HttpError(_)
            | DepositError::RpcError(_) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR"),
            DepositError::RedisError(_)
            | DepositError::CorruptRecord(_)
            | DepositError::StoreError(_) => (StatusCode::SERVICE_UNAVAILABLE, "STORE_ERROR"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let body = ErrorResponse {
            success: false,
            error: self.to_string(),
            error_code: error_code.to_string(),
            timestamp: Utc::now(),
            request_id,
        };

        if status.is_server_error() {
            tracing::error!(error = ?self, error_code = error_code, "Request failed");
        } else {
            tracing::debug!(error = %self, error_code = error_code, "Request rejected");
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_map_to_4xx() {
        let response = DepositError::InvalidAmount("-1".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = DepositError::PaymentNotFound("x".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = DepositError::Unauthorized.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn store_errors_map_to_503() {
        let response = DepositError::StoreError("down".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
