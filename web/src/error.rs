//! HTTP error responses.
//!
//! [`AppError`] bridges [`AllocationError`] and HTTP: each error kind maps to
//! one status code and the body is always `{ "code", "message" }`.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use circulation_core::{AllocationError, ErrorKind};
use serde::Serialize;
use std::fmt;

/// Seconds a client should wait before retrying after a 503.
pub const RETRY_AFTER_SECS: u64 = 1;

/// Error returned by every handler.
///
/// Handlers return `Result<_, AppError>` and use `?` on engine calls.
///
/// # Examples
///
/// ```
/// use circulation_web::AppError;
///
/// let err = AppError::bad_request("copy_id or loan_id is required");
/// assert_eq!(err.to_string(), "[BAD_REQUEST] copy_id or loan_id is required");
/// ```
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
    /// Logged on 5xx, never sent to the client.
    cause: Option<anyhow::Error>,
}

impl AppError {
    /// An error with an explicit status and machine-readable code.
    #[must_use]
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            cause: None,
        }
    }

    /// Attaches the underlying failure for the server log.
    #[must_use]
    pub fn caused_by(mut self, cause: anyhow::Error) -> Self {
        self.cause = Some(cause);
        self
    }

    /// HTTP status of this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }

    /// 400 for a malformed request body.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    /// 404 for something the engine knows nothing about.
    #[must_use]
    pub fn not_found(what: impl fmt::Display, id: impl fmt::Display) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", format!("{what} {id} not found"))
    }

    /// 500 with a generic message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    const fn allocation_code(err: &AllocationError) -> &'static str {
        match err {
            AllocationError::NotFound { .. } => "NOT_FOUND",
            AllocationError::Conflict(_) => "CONFLICT",
            AllocationError::DuplicateReservation { .. } => "DUPLICATE_RESERVATION",
            AllocationError::InvalidState { .. } => "INVALID_STATE",
            AllocationError::NotReservable(_) => "NOT_RESERVABLE",
            AllocationError::ReservationLimitReached { .. } => "RESERVATION_LIMIT_REACHED",
            AllocationError::InvalidHoldWindow { .. } => "INVALID_HOLD_WINDOW",
            AllocationError::TransientInfra(_) => "SERVICE_UNAVAILABLE",
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| cause.as_ref() as &(dyn std::error::Error + 'static))
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    message: &'a str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            let cause = self.cause.as_ref().map(|cause| format!("{cause:#}"));
            tracing::error!(
                status = self.status.as_u16(),
                code = self.code,
                message = %self.message,
                cause = cause.as_deref(),
                "request failed"
            );
        }

        let mut response = (
            self.status,
            Json(ErrorBody {
                code: self.code,
                message: &self.message,
            }),
        )
            .into_response();
        if self.status == StatusCode::SERVICE_UNAVAILABLE {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(RETRY_AFTER_SECS));
        }
        response
    }
}

/// NotFound → 404, Conflict → 409, State → 422, TransientInfra → 503.
impl From<AllocationError> for AppError {
    fn from(err: AllocationError) -> Self {
        let status = match err.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::State => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::TransientInfra => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self::new(status, Self::allocation_code(&err), err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("internal error").caused_by(err)
    }
}
