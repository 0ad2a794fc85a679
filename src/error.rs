use axum::{
    http::{StatusCode, header::HeaderValue},
    response::{IntoResponse, Json, Response},
};
use sqlx::migrate::MigrateError;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Clone, Copy)]
pub struct ErrorId(pub Uuid);

impl Default for ErrorId {
    fn default() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ErrorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wire envelope for every error response: `{"code": <status>, "details": <text>}`.
#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct ApiError {
    pub code: u16,
    pub details: String,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrationError(#[from] MigrateError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unexpected request data: {0}")]
    UnexpectedData(String),

    #[error("Required field missing or zero: {0}")]
    FieldRequired(&'static str),

    #[error("Not enough space: requested {requested}, available {available}")]
    NotEnoughSpace { requested: i64, available: i64 },

    #[error("Distribution row missing for storage {storage_id}, product {product_id}")]
    DistributionMissing {
        storage_id: Uuid,
        product_id: Uuid,
    },

    #[error("Validation failed")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Invalid transaction state: {0}")]
    TransactionState(&'static str),

    #[error("Context: {context}")]
    WithContext {
        #[source]
        source: Box<AppError>,
        context: String,
        error_id: ErrorId,
    },

    #[error("{source}; rollback also failed: {rollback}")]
    RollbackFailed {
        #[source]
        source: Box<AppError>,
        rollback: Box<AppError>,
    },
}

impl AppError {
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            source: Box::new(self),
            context: context.into(),
            error_id: ErrorId::default(),
        }
    }

    pub fn error_id(&self) -> ErrorId {
        match self {
            Self::WithContext { error_id, .. } => *error_id,
            _ => ErrorId::default(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::UnexpectedData(_) => StatusCode::BAD_REQUEST,
            Self::FieldRequired(_) => StatusCode::BAD_REQUEST,
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::NotEnoughSpace { .. } => StatusCode::INSUFFICIENT_STORAGE,
            Self::WithContext { source, .. } => source.status_code(),
            Self::RollbackFailed { source, .. } => source.status_code(),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Human-readable `details` string for the wire envelope. Internals are
    /// never exposed here.
    pub fn details(&self) -> String {
        match self {
            Self::BadRequest(_) => "Bad Request!".to_string(),
            Self::UnexpectedData(_) | Self::ValidationError(_) => {
                "Invalid Or Unexpected Request Data!".to_string()
            }
            Self::FieldRequired(field) => format!("Missing Required Field: {field}!"),
            Self::NotEnoughSpace { .. } => "Not Enough Space In Storage(s)!".to_string(),
            Self::WithContext { source, .. } => source.details(),
            Self::RollbackFailed { source, .. } => source.details(),
            _ => "Internal Server Error!".to_string(),
        }
    }

    pub fn api_error(&self) -> ApiError {
        ApiError {
            code: self.status_code().as_u16(),
            details: self.details(),
        }
    }

    pub fn log_error(&self, error_id: ErrorId) {
        let chain = self.format_error_chain();

        if self.status_code().is_server_error() {
            error!(
                error_id = %error_id,
                error_chain = %chain,
                "Server error occurred"
            );
        } else {
            warn!(
                error_id = %error_id,
                error_chain = %chain,
                "Client error occurred"
            );
        }
    }

    fn format_error_chain(&self) -> String {
        let mut parts = vec![];
        let mut current: &AppError = self;

        loop {
            match current {
                AppError::WithContext {
                    source, context, ..
                } => {
                    parts.push(format!("[Context: {}]", context));
                    current = source;
                }
                other => {
                    parts.push(format!("[Root: {}]", other));
                    break;
                }
            }
        }

        parts.reverse();
        parts.join(" -> ")
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let error_id = self.error_id();
        let status = self.status_code();

        self.log_error(error_id);

        let mut response = (status, Json(self.api_error())).into_response();

        let error_id_header = HeaderValue::from_str(&error_id.to_string()).unwrap_or_else(|_| {
            tracing::warn!("Failed to format error_id as header value");
            HeaderValue::from_static("invalid-error-id")
        });
        response.headers_mut().insert("X-Error-Id", error_id_header);

        response
    }
}
