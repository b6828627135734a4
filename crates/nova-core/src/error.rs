use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

/// Error classes every connector and the workflow engine are allowed to see.
///
/// Provider responses are mapped onto these at the request/refresh boundary;
/// nothing above that boundary handles raw provider bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    RateLimited,
    Timeout,
    Cancelled,
    Network,
    Transient,
    TokenMissing,
    AccountNotFound,
    NotConnected,
    ReconnectRequired,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Network => "network",
            ErrorKind::Transient => "transient",
            ErrorKind::TokenMissing => "token_missing",
            ErrorKind::AccountNotFound => "account_not_found",
            ErrorKind::NotConnected => "not_connected",
            ErrorKind::ReconnectRequired => "reconnect_required",
            ErrorKind::Internal => "internal",
        }
    }

    /// Whether a scheduler may requeue the operation.
    ///
    /// `Cancelled` is deliberately excluded: the caller asked for the abort.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited | ErrorKind::Timeout | ErrorKind::Network | ErrorKind::Transient
        )
    }

    /// Whether the user has to go through the OAuth flow again.
    pub fn requires_reconnect(&self) -> bool {
        matches!(
            self,
            ErrorKind::TokenMissing
                | ErrorKind::AccountNotFound
                | ErrorKind::NotConnected
                | ErrorKind::ReconnectRequired
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("cancelled: {0}")]
    Cancelled(String),
    #[error("network: {0}")]
    Network(String),
    #[error("transient: {0}")]
    Transient(String),
    #[error("token missing: {0}")]
    TokenMissing(String),
    #[error("account not found: {0}")]
    AccountNotFound(String),
    #[error("not connected: {0}")]
    NotConnected(String),
    #[error("reconnect required: {0}")]
    ReconnectRequired(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::InvalidRequest => CoreError::InvalidRequest(message),
            ErrorKind::Unauthorized => CoreError::Unauthorized(message),
            ErrorKind::Forbidden => CoreError::Forbidden(message),
            ErrorKind::NotFound => CoreError::NotFound(message),
            ErrorKind::RateLimited => CoreError::RateLimited(message),
            ErrorKind::Timeout => CoreError::Timeout(message),
            ErrorKind::Cancelled => CoreError::Cancelled(message),
            ErrorKind::Network => CoreError::Network(message),
            ErrorKind::Transient => CoreError::Transient(message),
            ErrorKind::TokenMissing => CoreError::TokenMissing(message),
            ErrorKind::AccountNotFound => CoreError::AccountNotFound(message),
            ErrorKind::NotConnected => CoreError::NotConnected(message),
            ErrorKind::ReconnectRequired => CoreError::ReconnectRequired(message),
            ErrorKind::Internal => CoreError::Internal(message),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            CoreError::Unauthorized(_) => ErrorKind::Unauthorized,
            CoreError::Forbidden(_) => ErrorKind::Forbidden,
            CoreError::NotFound(_) => ErrorKind::NotFound,
            CoreError::RateLimited(_) => ErrorKind::RateLimited,
            CoreError::Timeout(_) => ErrorKind::Timeout,
            CoreError::Cancelled(_) => ErrorKind::Cancelled,
            CoreError::Network(_) => ErrorKind::Network,
            CoreError::Transient(_) => ErrorKind::Transient,
            CoreError::TokenMissing(_) => ErrorKind::TokenMissing,
            CoreError::AccountNotFound(_) => ErrorKind::AccountNotFound,
            CoreError::NotConnected(_) => ErrorKind::NotConnected,
            CoreError::ReconnectRequired(_) => ErrorKind::ReconnectRequired,
            CoreError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            CoreError::InvalidRequest(m)
            | CoreError::Unauthorized(m)
            | CoreError::Forbidden(m)
            | CoreError::NotFound(m)
            | CoreError::RateLimited(m)
            | CoreError::Timeout(m)
            | CoreError::Cancelled(m)
            | CoreError::Network(m)
            | CoreError::Transient(m)
            | CoreError::TokenMissing(m)
            | CoreError::AccountNotFound(m)
            | CoreError::NotConnected(m)
            | CoreError::ReconnectRequired(m)
            | CoreError::Internal(m) => m,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    pub fn requires_reconnect(&self) -> bool {
        self.kind().requires_reconnect()
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Internal(format!("serde: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_roundtrips_through_constructor() {
        let kinds = [
            ErrorKind::InvalidRequest,
            ErrorKind::RateLimited,
            ErrorKind::Cancelled,
            ErrorKind::ReconnectRequired,
            ErrorKind::Internal,
        ];
        for kind in kinds {
            let err = CoreError::new(kind, "boom");
            assert_eq!(err.kind(), kind);
            assert_eq!(err.message(), "boom");
        }
    }

    #[test]
    fn retryable_and_reconnect_classes_do_not_overlap() {
        assert!(ErrorKind::Transient.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(!ErrorKind::Cancelled.is_retryable());
        assert!(!ErrorKind::Unauthorized.is_retryable());
        assert!(ErrorKind::TokenMissing.requires_reconnect());
        assert!(!ErrorKind::RateLimited.requires_reconnect());
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::AccountNotFound).unwrap();
        assert_eq!(json, "\"account_not_found\"");
    }
}
