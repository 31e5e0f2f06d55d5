use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use log::error;
use serde::Serialize;

use crate::error::{ErrorKind, TenancyError};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: &'static str,
}

impl ErrorResponse {
    pub fn new(err: &TenancyError) -> Self {
        Self {
            error: err.to_string(),
            kind: err.kind().as_str(),
        }
    }
}

/// Client-facing status for each error kind. A missing tenant schema is
/// the client's problem, an exhausted pool is transient.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidTenant | ErrorKind::TenantNotResolved => StatusCode::BAD_REQUEST,
        ErrorKind::UnknownTenantSchema => StatusCode::NOT_FOUND,
        ErrorKind::PoolExhausted | ErrorKind::MigrationLockTimeout => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ErrorKind::SchemaCreation
        | ErrorKind::ChangesetFailed
        | ErrorKind::InvalidPlan
        | ErrorKind::ChangesetSource
        | ErrorKind::Config
        | ErrorKind::Database => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for TenancyError {
    fn into_response(self) -> Response {
        let status = status_for(self.kind());
        if status.is_server_error() && !self.is_retryable() {
            error!("request failed: {self}");
        }

        let mut response = (status, Json(ErrorResponse::new(&self))).into_response();
        if self.is_retryable() {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
        }
        response
    }
}
