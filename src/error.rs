use serde::Serialize;
use thiserror::Error;

use crate::http::TransportError;
use crate::state::StoreError;

/// Coarse failure classes the UI branches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Authorization,
    SessionExpired,
    Validation,
    Forbidden,
    NotFound,
    Transient,
    Client,
    Internal,
}

pub fn classify_status(status: u16) -> ErrorKind {
    match status {
        401 => ErrorKind::Authorization,
        400 | 422 => ErrorKind::Validation,
        403 => ErrorKind::Forbidden,
        404 => ErrorKind::NotFound,
        408 | 429 | 500..=599 => ErrorKind::Transient,
        200..=299 => ErrorKind::Validation,
        _ => ErrorKind::Client,
    }
}

#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("{message}")]
    Unauthorized { message: String },
    #[error("session expired: {message}")]
    SessionExpired { message: String },
    #[error("{message}")]
    Validation { message: String },
    /// The server answered 2xx but the envelope said `success: false`.
    #[error("{message}")]
    Rejected { status: u16, message: String },
    #[error("{message}")]
    Http { status: u16, message: String },
    #[error("network error: {0}")]
    Network(#[from] TransportError),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("token storage failed: {0}")]
    Storage(#[from] StoreError),
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthorized { .. } => ErrorKind::Authorization,
            Self::SessionExpired { .. } => ErrorKind::SessionExpired,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Rejected { status, .. } | Self::Http { status, .. } => classify_status(*status),
            Self::Network(_) | Self::Malformed(_) => ErrorKind::Transient,
            Self::Storage(_) => ErrorKind::Internal,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    pub(crate) fn session_expired(message: impl Into<String>) -> Self {
        Self::SessionExpired {
            message: message.into(),
        }
    }
}
