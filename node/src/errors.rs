// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::ingest::IngestError;
use crate::store::StoreError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use exposure_kernel::error::KernelError;
use exposure_persistence::PersistenceError;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Errors worth retrying after a pause: storage hiccups, not bad input.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::Io(_)
                | EngineError::Persistence(PersistenceError::IoError(_))
                | EngineError::Store(StoreError::Io(_))
                | EngineError::Ingest(IngestError::Io(_))
        )
    }

    fn status(&self) -> StatusCode {
        match self {
            EngineError::Store(StoreError::Cancelled) | EngineError::Cancelled => StatusCode::REQUEST_TIMEOUT,
            EngineError::Store(StoreError::InvalidRecord(_)) => StatusCode::BAD_REQUEST,
            EngineError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Ingest(e) if e.is_noop() => StatusCode::CONFLICT,
            EngineError::Ingest(IngestError::Persistence(_) | IngestError::Io(_)) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Ingest(_) => StatusCode::BAD_REQUEST,
            EngineError::Persistence(_) | EngineError::Io(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        let body = Json(json!({
            "error": self.to_string()
        }));
        (status, body).into_response()
    }
}

impl From<KernelError> for EngineError {
    fn from(e: KernelError) -> Self {
        EngineError::InvalidInput(e.to_string())
    }
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(e: tokio::task::JoinError) -> Self {
        EngineError::Internal(e.to_string())
    }
}
