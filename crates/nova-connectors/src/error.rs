use nova_core::{CoreError, ErrorKind};

#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid OAuth state: {0}")]
    InvalidState(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Connection error: {0}")]
    Connection(String),

    /// A non-success status the caller chose to surface. The body is never included.
    #[error("{operation} failed with HTTP {status}")]
    Status { operation: String, status: u16 },

    #[error("{operation} gave up after {attempts} attempt(s), last failure: {last_failure}")]
    Exhausted {
        operation: String,
        attempts: u32,
        last_failure: String,
    },
}

/// Taxonomy class for an HTTP status that was not retried away.
pub fn kind_for_status(status: u16) -> ErrorKind {
    match status {
        400 | 422 => ErrorKind::InvalidRequest,
        401 => ErrorKind::Unauthorized,
        403 => ErrorKind::Forbidden,
        404 => ErrorKind::NotFound,
        429 => ErrorKind::RateLimited,
        _ => ErrorKind::Internal,
    }
}

impl ConnectorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConnectorError::Serialization(_) => ErrorKind::Internal,
            ConnectorError::Core(e) => e.kind(),
            ConnectorError::Http(e) if e.is_builder() => ErrorKind::Internal,
            ConnectorError::Http(e) if e.is_timeout() => ErrorKind::Timeout,
            ConnectorError::Http(_) => ErrorKind::Network,
            ConnectorError::Url(_) => ErrorKind::InvalidRequest,
            ConnectorError::InvalidConfig(_) => ErrorKind::InvalidRequest,
            ConnectorError::InvalidState(_) => ErrorKind::InvalidRequest,
            ConnectorError::Timeout(_) => ErrorKind::Timeout,
            ConnectorError::Cancelled(_) => ErrorKind::Cancelled,
            ConnectorError::Connection(_) => ErrorKind::Network,
            ConnectorError::Status { status, .. } => kind_for_status(*status),
            ConnectorError::Exhausted { .. } => ErrorKind::Transient,
        }
    }

    /// Short failure class used in retry logs and `Exhausted` reports.
    pub fn failure_class(&self) -> String {
        match self {
            ConnectorError::Status { status, .. } => format!("http_{}", status),
            other => other.kind().as_str().to_string(),
        }
    }
}

impl From<ConnectorError> for CoreError {
    fn from(err: ConnectorError) -> Self {
        match err {
            ConnectorError::Core(e) => e,
            other => CoreError::new(other.kind(), other.to_string()),
        }
    }
}

pub type ConnectorResult<T> = Result<T, ConnectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_errors_map_onto_taxonomy() {
        let cases = [
            (400, ErrorKind::InvalidRequest),
            (422, ErrorKind::InvalidRequest),
            (401, ErrorKind::Unauthorized),
            (403, ErrorKind::Forbidden),
            (404, ErrorKind::NotFound),
            (429, ErrorKind::RateLimited),
            (418, ErrorKind::Internal),
        ];
        for (status, kind) in cases {
            let err = ConnectorError::Status {
                operation: "gmail.send".to_string(),
                status,
            };
            assert_eq!(CoreError::from(err).kind(), kind, "status {}", status);
        }
    }

    #[test]
    fn exhausted_is_retryable_and_cancelled_is_not() {
        let exhausted = CoreError::from(ConnectorError::Exhausted {
            operation: "op".to_string(),
            attempts: 3,
            last_failure: "http_503".to_string(),
        });
        assert!(exhausted.is_retryable());
        assert!(exhausted.message().contains("3 attempt"));

        let cancelled = CoreError::from(ConnectorError::Cancelled("op".to_string()));
        assert_eq!(cancelled.kind(), ErrorKind::Cancelled);
        assert!(!cancelled.is_retryable());
    }

    #[test]
    fn core_errors_pass_through_unchanged() {
        let original = CoreError::ReconnectRequired("grant revoked".to_string());
        let back = CoreError::from(ConnectorError::Core(original.clone()));
        assert_eq!(back, original);
    }
}
