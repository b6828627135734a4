pub mod error;
pub mod sanitization;
pub mod scope;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use error::{CoreError, CoreResult, ErrorKind};
pub use sanitization::{is_sensitive_field, sanitize_json_value, sanitize_string, secret_fingerprint};
pub use scope::{ConfigScope, ServiceReason};
pub use store::{ConfigBackend, ScopeVerifier, StoredDocument};
pub use types::{
    account_id_for, now_ms, AccountRecord, ConnectorConfig, ConnectorKind, UserConfigDocument,
};
