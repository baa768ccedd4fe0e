use std::error::Error as StdError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    application::sync::SyncError, cache::CacheError, config::LoadError, infra::error::InfraError,
};

/// Diagnostic chain attached to error responses for the logging middleware.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    fn new(source: &'static str, status: StatusCode, messages: Vec<String>) -> Self {
        Self {
            source,
            status,
            messages,
        }
    }
}

/// Walk `error` and its sources, outermost first.
pub fn error_chain(error: &dyn StdError) -> Vec<String> {
    let mut chain = vec![error.to_string()];
    let mut next = error.source();
    while let Some(inner) = next {
        chain.push(inner.to_string());
        next = inner.source();
    }
    chain
}

/// A handler failure: the client sees `public_message`, the logs see the rest.
#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    public_message: &'static str,
    report: ErrorReport,
}

impl HttpError {
    pub fn new(source: &'static str, status: StatusCode, public_message: &'static str) -> Self {
        Self {
            status,
            public_message,
            report: ErrorReport::new(source, status, Vec::new()),
        }
    }

    pub fn not_found(source: &'static str, detail: impl Into<String>) -> Self {
        Self::new(source, StatusCode::NOT_FOUND, "Not found").detail(detail)
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.report.messages.push(detail.into());
        self
    }

    pub fn caused_by(mut self, error: &dyn StdError) -> Self {
        self.report.messages.extend(error_chain(error));
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.public_message).into_response();
        response.extensions_mut().insert(self.report);
        response
    }
}

impl From<CacheError> for HttpError {
    fn from(error: CacheError) -> Self {
        const SOURCE: &str = "infra::http::proxy";
        let base = match &error {
            CacheError::Network { .. } => HttpError::new(
                SOURCE,
                StatusCode::GATEWAY_TIMEOUT,
                "Resource unavailable offline",
            ),
            CacheError::Storage(_) | CacheError::QuotaExceeded { .. } | CacheError::Install(_) => {
                HttpError::new(
                    SOURCE,
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error",
                )
            }
        };
        base.caused_by(&error)
    }
}

/// Anything that stops `serve` or `client` from starting or running.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration: {0}")]
    Config(#[from] LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl AppError {
    /// Process exit status: 2 for operator mistakes, 1 for runtime failures.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Config(_) | AppError::Infra(InfraError::Bind { .. }) => 2,
            _ => 1,
        }
    }
}
