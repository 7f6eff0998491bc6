//! API Error Types
//!
//! Maps every domain error onto an HTTP status, a stable code and the
//! message a user should see.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::attendance::AttendanceError;
use crate::backend::{StoreError, UploadError};
use crate::baths::BathError;
use crate::forms::{FieldError, ValidationErrors};
use crate::geocoding::GeocodeError;
use crate::session::SessionError;

/// API error types
#[derive(Error, Debug)]
pub enum ApiError {
    /// Form validation failed
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationErrors),

    /// Missing or unknown bearer token
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Bath(#[from] BathError),

    #[error(transparent)]
    Attendance(#[from] AttendanceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Geocode(#[from] GeocodeError),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
    pub request_id: String,
}

/// Error details
#[derive(Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldError>,
}

struct Parts {
    status: StatusCode,
    code: String,
    message: String,
    fields: Vec<FieldError>,
}

impl Parts {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.into(),
            fields: Vec::new(),
        }
    }
}

fn validation_parts(errors: &ValidationErrors) -> Parts {
    Parts {
        fields: errors.errors.clone(),
        ..Parts::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            errors.first_message(),
        )
    }
}

fn store_parts(err: &StoreError) -> Parts {
    let status = match err {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::AlreadyExists(_) | StoreError::TransactionAborted(_) => StatusCode::CONFLICT,
        StoreError::InvalidField(_) | StoreError::Validation(_) => StatusCode::BAD_REQUEST,
        StoreError::Unauthorized(_) => StatusCode::FORBIDDEN,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let code = match err {
        StoreError::NotFound(_) => "NOT_FOUND",
        StoreError::AlreadyExists(_) => "ALREADY_EXISTS",
        StoreError::TransactionAborted(_) => "TRANSACTION_ABORTED",
        StoreError::InvalidField(_) | StoreError::Validation(_) => "INVALID_REQUEST",
        StoreError::Unauthorized(_) => "FORBIDDEN",
        _ => "STORE_ERROR",
    };
    Parts::new(status, code, err.to_string())
}

fn upload_parts(err: &UploadError) -> Parts {
    match err {
        UploadError::TooLarge { .. } => {
            Parts::new(StatusCode::PAYLOAD_TOO_LARGE, "UPLOAD_TOO_LARGE", err.to_string())
        }
        UploadError::Io(_) => {
            Parts::new(StatusCode::INTERNAL_SERVER_ERROR, "UPLOAD_ERROR", err.to_string())
        }
        _ => Parts::new(StatusCode::BAD_REQUEST, "UPLOAD_ERROR", err.to_string()),
    }
}

fn geocode_parts(err: &GeocodeError) -> Parts {
    let status = match err {
        GeocodeError::EmptyAddress => StatusCode::BAD_REQUEST,
        GeocodeError::NoResults(_) => StatusCode::NOT_FOUND,
        GeocodeError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    };
    Parts::new(status, "GEOCODE_ERROR", err.to_string())
}

fn session_parts(err: &SessionError) -> Parts {
    let message = err.user_message();
    match err {
        SessionError::Validation(errors) => validation_parts(errors),
        SessionError::Auth(auth) => Parts::new(StatusCode::UNAUTHORIZED, auth.code.as_str(), message),
        SessionError::NotSignedIn => Parts::new(StatusCode::UNAUTHORIZED, err.code(), message),
        SessionError::ProfileMissing | SessionError::UsernameTaken => {
            Parts::new(StatusCode::CONFLICT, err.code(), message)
        }
        SessionError::UsernameNotFound => Parts::new(StatusCode::NOT_FOUND, err.code(), message),
        SessionError::Upload(_) => Parts::new(StatusCode::BAD_REQUEST, err.code(), message),
        SessionError::ProfileUnavailable(_) => {
            Parts::new(StatusCode::SERVICE_UNAVAILABLE, err.code(), message)
        }
        SessionError::AccountIncomplete
        | SessionError::Store(_)
        | SessionError::LocalStorage(_) => {
            Parts::new(StatusCode::INTERNAL_SERVER_ERROR, err.code(), message)
        }
    }
}

fn bath_parts(err: &BathError) -> Parts {
    let message = err.user_message();
    match err {
        BathError::Validation(errors) => validation_parts(errors),
        BathError::Session(inner) => session_parts(inner),
        BathError::Geocode(inner) => geocode_parts(inner),
        BathError::Upload(inner) => Parts {
            message,
            ..upload_parts(inner)
        },
        BathError::Store(inner) => Parts {
            message,
            ..store_parts(inner)
        },
        BathError::NotSignedIn => Parts::new(StatusCode::UNAUTHORIZED, "NOT_SIGNED_IN", message),
        BathError::ProfileMissing => Parts::new(StatusCode::CONFLICT, "PROFILE_MISSING", message),
        BathError::NotFound(_) => Parts::new(StatusCode::NOT_FOUND, "BATH_NOT_FOUND", message),
        BathError::NotLogged => Parts::new(StatusCode::BAD_REQUEST, "NOT_A_LOGGED_BATH", message),
    }
}

fn attendance_parts(err: &AttendanceError) -> Parts {
    match err {
        AttendanceError::Unauthorized => Parts::new(
            StatusCode::FORBIDDEN,
            "FORBIDDEN",
            "Du kan bare melde deg selv på eller av.",
        ),
        AttendanceError::NotFound(_) => {
            Parts::new(StatusCode::NOT_FOUND, "BATH_NOT_FOUND", "Badet finnes ikke.")
        }
        AttendanceError::Validation(msg) => {
            Parts::new(StatusCode::BAD_REQUEST, "NOT_A_PLANNED_BATH", msg.clone())
        }
        AttendanceError::Store(inner) => store_parts(inner),
    }
}

impl ApiError {
    fn parts(&self) -> Parts {
        match self {
            ApiError::Validation(errors) => validation_parts(errors),
            ApiError::Unauthorized(msg) => {
                Parts::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone())
            }
            ApiError::BadRequest(msg) => {
                Parts::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone())
            }
            ApiError::NotFound(msg) => Parts::new(StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            ApiError::Session(err) => session_parts(err),
            ApiError::Bath(err) => bath_parts(err),
            ApiError::Attendance(err) => attendance_parts(err),
            ApiError::Store(err) => store_parts(err),
            ApiError::Upload(err) => upload_parts(err),
            ApiError::Geocode(err) => geocode_parts(err),
            ApiError::Internal(msg) => {
                Parts::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg.clone())
            }
            ApiError::Io(err) => {
                Parts::new(StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR", err.to_string())
            }
        }
    }

    pub fn status(&self) -> StatusCode {
        self.parts().status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let parts = self.parts();
        let request_id = uuid::Uuid::new_v4().to_string();

        if parts.status.is_server_error() {
            tracing::error!(
                request_id = %request_id,
                error_code = %parts.code,
                error_message = %self,
                "API error occurred"
            );
        } else {
            tracing::debug!(
                request_id = %request_id,
                error_code = %parts.code,
                error_message = %self,
                "Request rejected"
            );
        }

        let body = ErrorResponse {
            error: ErrorBody {
                code: parts.code,
                message: parts.message,
                fields: parts.fields,
            },
            request_id,
        };

        (parts.status, Json(body)).into_response()
    }
}

/// Result type for API operations
pub type ApiResult<T> = Result<T, ApiError>;
