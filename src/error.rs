use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// The five classified error kinds. Inner layers raise these; only the
/// `IntoResponse` impl below ever builds an HTTP response from one.
#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ResolverError {
    fn status(&self) -> StatusCode {
        match self {
            ResolverError::Validation(_) => StatusCode::BAD_REQUEST,
            ResolverError::NotFound(_) => StatusCode::NOT_FOUND,
            ResolverError::Conflict(_) => StatusCode::CONFLICT,
            ResolverError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ResolverError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn title(&self) -> &'static str {
        match self {
            ResolverError::Validation(_) => "Invalid request",
            ResolverError::NotFound(_) => "Not found",
            ResolverError::Conflict(_) => "Conflict",
            ResolverError::StoreUnavailable(_) => "Store unavailable",
            ResolverError::Internal(_) => "Internal error",
        }
    }
}

#[derive(Serialize)]
struct ProblemDetails {
    #[serde(rename = "type")]
    kind: &'static str,
    title: &'static str,
    status: u16,
    detail: String,
}

impl IntoResponse for ResolverError {
    fn into_response(self) -> Response {
        let status = self.status();
        if matches!(self, ResolverError::Internal(_)) {
            tracing::error!(error = %self, "internal error");
        }
        let body = ProblemDetails {
            kind: "about:blank",
            title: self.title(),
            status: status.as_u16(),
            detail: self.to_string(),
        };
        (status, axum::Json(body)).into_response()
    }
}

pub type ResolverResult<T> = Result<T, ResolverError>;
