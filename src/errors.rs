use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(ConflictKind),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("invalid payment signature: {0}")]
    InvalidSignature(String),

    #[error("payment amount mismatch: expected {expected}, got {actual}")]
    AmountMismatch { expected: String, actual: String },

    #[error("upstream timeout: {0}")]
    UpstreamTimeout(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    Overlap,
    StaleWrite,
    ActiveBookings,
    AlreadyPaid,
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictKind::Overlap => write!(f, "overlapping booking window"),
            ConflictKind::StaleWrite => write!(f, "concurrent update"),
            ConflictKind::ActiveBookings => write!(f, "bike has active bookings"),
            ConflictKind::AlreadyPaid => write!(f, "booking already paid"),
        }
    }
}

impl AppError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Conflict(_) | AppError::UpstreamTimeout(_))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::InvalidTransition(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::InvalidSignature(_) => StatusCode::BAD_REQUEST,
            AppError::AmountMismatch { .. } => StatusCode::BAD_REQUEST,
            AppError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn public_message(&self) -> String {
        match self {
            AppError::NotFound(what) => format!("{what} not found"),
            AppError::Validation(msg) => msg.clone(),
            AppError::Conflict(ConflictKind::Overlap) => "dates unavailable".to_string(),
            AppError::Conflict(ConflictKind::StaleWrite) => {
                "booking was modified concurrently, please retry".to_string()
            }
            AppError::Conflict(ConflictKind::ActiveBookings) => {
                "bike has active bookings".to_string()
            }
            AppError::Conflict(ConflictKind::AlreadyPaid) => {
                "booking is already paid".to_string()
            }
            AppError::Forbidden(_) => "not allowed".to_string(),
            AppError::InvalidTransition(_) => {
                "booking cannot be changed to that status now".to_string()
            }
            AppError::InvalidSignature(_) | AppError::AmountMismatch { .. } => {
                "payment could not be verified".to_string()
            }
            AppError::UpstreamTimeout(_) | AppError::Upstream(_) => {
                "payment service unavailable, please retry".to_string()
            }
            AppError::Unauthorized => "unauthorized".to_string(),
            AppError::Database(_) | AppError::Internal(_) => "internal error".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }

        let body = serde_json::json!({
            "error": self.public_message(),
            "retryable": self.is_retryable(),
        });
        (status, axum::Json(body)).into_response()
    }
}
