use crate::db::errors::DbError;
use crate::discounts::DiscountRejection;
use crate::payment_providers::PaymentError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error as ThisError;
use utoipa::ToSchema;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Authentication required but not provided
    #[error("Not authenticated")]
    Unauthenticated { message: Option<String> },

    /// Authenticated, but the caller's role does not allow the operation
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    /// Invalid request data
    #[error("{message}")]
    BadRequest { message: String },

    /// Requested resource not found
    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    /// A discount code failed validation
    #[error("Discount code rejected: {0}")]
    DiscountRejected(DiscountRejection),

    /// The payment could not be confirmed (unpaid session, bad webhook signature)
    #[error("Payment verification failed: {message}")]
    PaymentVerification { message: String },

    /// Identifiers supplied by the caller or the payment provider disagree with stored state
    #[error("Integrity check failed: {message}")]
    Integrity { message: String },

    /// The payment provider timed out or could not be reached
    #[error("Payment gateway unavailable: {message}")]
    GatewayUnavailable { message: String },

    /// No payment provider is configured on this instance
    #[error("Payment processing is not configured")]
    PaymentNotConfigured,

    /// Conflict error, e.g., for duplicate discount codes
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Database operation error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// JSON body returned for every error response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Stable machine-readable error code, e.g. `DISCOUNT_REJECTED`
    pub error: String,
    pub message: String,
    /// Present for `DISCOUNT_REJECTED`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DiscountRejection>,
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Error::Forbidden { .. } => StatusCode::FORBIDDEN,
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::DiscountRejected(_) => StatusCode::BAD_REQUEST,
            Error::PaymentVerification { .. } => StatusCode::BAD_REQUEST,
            Error::Integrity { .. } => StatusCode::BAD_REQUEST,
            Error::GatewayUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Error::PaymentNotConfigured => StatusCode::NOT_IMPLEMENTED,
            Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Database(db_err) => match db_err {
                DbError::NotFound => StatusCode::NOT_FOUND,
                DbError::UniqueViolation { .. } => StatusCode::CONFLICT,
                DbError::ForeignKeyViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::CheckViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable error code carried in the `error` field of the response body
    pub fn code(&self) -> &'static str {
        match self {
            Error::Unauthenticated { .. } => "UNAUTHENTICATED",
            Error::Forbidden { .. } => "FORBIDDEN",
            Error::BadRequest { .. } => "VALIDATION_ERROR",
            Error::NotFound { .. } => "NOT_FOUND",
            Error::DiscountRejected(_) => "DISCOUNT_REJECTED",
            Error::PaymentVerification { .. } => "AUTH_FAILED",
            Error::Integrity { .. } => "INTEGRITY_ERROR",
            Error::GatewayUnavailable { .. } => "GATEWAY_UNAVAILABLE",
            Error::PaymentNotConfigured => "PAYMENT_NOT_CONFIGURED",
            Error::Conflict { .. } => "CONFLICT",
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "NOT_FOUND",
                DbError::UniqueViolation { .. } => "CONFLICT",
                DbError::ForeignKeyViolation { .. } | DbError::CheckViolation { .. } => "VALIDATION_ERROR",
                DbError::Other(_) => "INTERNAL_ERROR",
            },
            Error::Internal { .. } | Error::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Unauthenticated { message } => message.clone().unwrap_or_else(|| "Authentication required".to_string()),
            Error::Forbidden { message } => message.clone(),
            Error::BadRequest { message } => message.clone(),
            Error::NotFound { resource, id } => format!("{resource} with ID {id} not found"),
            Error::DiscountRejected(reason) => reason.describe().to_string(),
            Error::PaymentVerification { message } => message.clone(),
            Error::Integrity { .. } => "Payment details do not match this purchase".to_string(),
            Error::GatewayUnavailable { .. } => "Payment provider is temporarily unavailable, please retry".to_string(),
            Error::PaymentNotConfigured => "Payment processing is not configured".to_string(),
            Error::Conflict { message } => message.clone(),
            Error::Internal { .. } => "Internal server error".to_string(),
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "Resource not found".to_string(),
                DbError::UniqueViolation { constraint, .. } => match constraint.as_deref() {
                    Some("discount_codes_code_unique") => "A discount code with this code already exists".to_string(),
                    Some("enrollments_user_course_unique") => "Already enrolled in this course".to_string(),
                    _ => "Resource already exists".to_string(),
                },
                DbError::ForeignKeyViolation { .. } => "Invalid reference to related resource".to_string(),
                DbError::CheckViolation { .. } => "Invalid data provided".to_string(),
                DbError::Other(_) => "Database error occurred".to_string(),
            },
            Error::Other(_) => "Internal server error".to_string(),
        }
    }

    /// Whether a retry of the same request could succeed. Used by the webhook to decide between
    /// acknowledging a delivery and asking the provider to redeliver it.
    pub fn is_retryable(&self) -> bool {
        self.status_code().is_server_error() && !matches!(self, Error::PaymentNotConfigured)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Database(DbError::Other(_)) | Error::Internal { .. } | Error::Other(_) | Error::Integrity { .. } => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Database(_) | Error::Conflict { .. } => {
                tracing::warn!("Database constraint error: {}", self);
            }
            Error::GatewayUnavailable { .. } | Error::PaymentNotConfigured => {
                tracing::warn!("Payment gateway error: {}", self);
            }
            Error::Unauthenticated { .. } | Error::Forbidden { .. } | Error::PaymentVerification { .. } => {
                tracing::info!("Authorization error: {}", self);
            }
            Error::BadRequest { .. } | Error::NotFound { .. } | Error::DiscountRejected(_) => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();
        let body = ErrorBody {
            error: self.code().to_string(),
            message: self.user_message(),
            reason: match &self {
                Error::DiscountRejected(reason) => Some(*reason),
                _ => None,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<PaymentError> for Error {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::Transient(message) => Error::GatewayUnavailable { message },
            PaymentError::SessionNotFound(id) => Error::NotFound {
                resource: "Checkout session".to_string(),
                id,
            },
            PaymentError::PaymentNotCompleted(message) => Error::PaymentVerification { message },
            PaymentError::InvalidSignature(message) => Error::PaymentVerification { message },
            PaymentError::InvalidData(message) => Error::BadRequest { message },
            PaymentError::ProviderApi(message) => Error::Internal {
                operation: format!("call payment provider: {message}"),
            },
        }
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
