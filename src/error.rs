use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Disbursement error: {0}")]
    Disburse(#[from] DisburseError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("External error: {0}")]
    External(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Disbursement-domain errors. Every variant maps to a stable HTTP status:
/// 400 for caller mistakes with no side effect, 202 for outcomes the caller
/// (or the sweeper) should retry, 500 for provider declines and surprises.
#[derive(Error, Debug)]
pub enum DisburseError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Duplicate order id: {0}")]
    DuplicateOrder(String),

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: String, available: String },

    #[error("Concurrent balance update, resubmit the request")]
    RetryableConflict,

    #[error("Provider declined order {order_id} [{code}]: {message}")]
    ProviderDeclined {
        order_id: String,
        code: String,
        message: String,
    },

    #[error("Order {order_id} pending, provider unreachable or inconclusive: {detail}")]
    ProviderUnreachable { order_id: String, detail: String },
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
}

impl AppError {
    /// Whether the caller may safely resubmit the same logical disbursement.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Disburse(DisburseError::RetryableConflict)
                | AppError::Disburse(DisburseError::ProviderUnreachable { .. })
        )
    }

    /// Order id associated with the failure, when the variant carries one.
    pub fn order_id(&self) -> Option<&str> {
        match self {
            AppError::Disburse(DisburseError::DuplicateOrder(order_id))
            | AppError::Disburse(DisburseError::ProviderDeclined { order_id, .. })
            | AppError::Disburse(DisburseError::ProviderUnreachable { order_id, .. }) => {
                Some(order_id)
            }
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            AppError::Disburse(DisburseError::Validation(msg)) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }
            AppError::Disburse(DisburseError::DuplicateOrder(order_id)) => (
                StatusCode::BAD_REQUEST,
                "DUPLICATE_ORDER",
                format!("Order id already used: {}", order_id),
            ),
            AppError::Disburse(DisburseError::InsufficientBalance { required, available }) => (
                StatusCode::BAD_REQUEST,
                "INSUFFICIENT_BALANCE",
                format!(
                    "Insufficient balance: required {}, available {}",
                    required, available
                ),
            ),
            AppError::Disburse(DisburseError::RetryableConflict) => (
                StatusCode::ACCEPTED,
                "RETRYABLE_CONFLICT",
                "Transaction pending, please retry".to_string(),
            ),
            AppError::Disburse(DisburseError::ProviderUnreachable { detail, .. }) => (
                StatusCode::ACCEPTED,
                "PENDING_RETRY",
                format!("Transaction pending: {}", detail),
            ),
            AppError::Disburse(DisburseError::ProviderDeclined { code, message, .. }) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "PROVIDER_DECLINED",
                format!("Provider declined [{}]: {}", code, message),
            ),
            AppError::NotFound(what) => (StatusCode::BAD_REQUEST, "NOT_FOUND", what.clone()),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            order_id: self.order_id().map(str::to_string),
        });

        (status, body).into_response()
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        AppError::External(format!("HTTP request error: {:?}", error))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        AppError::Internal(format!("Serialization error: {:?}", error))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(format!("{:?}", error))
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

impl From<rust_decimal::Error> for AppError {
    fn from(error: rust_decimal::Error) -> Self {
        AppError::Disburse(DisburseError::Validation(format!(
            "Decimal conversion error: {:?}",
            error
        )))
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_id_surfaces_on_traceable_variants() {
        let duplicate: AppError = DisburseError::DuplicateOrder("ORD-9".to_string()).into();
        assert_eq!(duplicate.order_id(), Some("ORD-9"));

        let declined: AppError = DisburseError::ProviderDeclined {
            order_id: "ORD-10".to_string(),
            code: "E042".to_string(),
            message: "wallet blocked".to_string(),
        }
        .into();
        assert_eq!(declined.order_id(), Some("ORD-10"));

        let pending: AppError = DisburseError::ProviderUnreachable {
            order_id: "ORD-11".to_string(),
            detail: "timed out".to_string(),
        }
        .into();
        assert_eq!(pending.order_id(), Some("ORD-11"));
        assert!(pending.is_retryable());

        let validation: AppError =
            DisburseError::Validation("bad destination".to_string()).into();
        assert_eq!(validation.order_id(), None);
    }
}
