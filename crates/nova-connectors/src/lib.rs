pub mod accounts;
pub mod error;
pub mod gateway;
pub mod http;
pub mod idempotency;
pub mod oauth;

use std::sync::{Mutex, MutexGuard, PoisonError};

// Re-export commonly used types
pub use accounts::{AccountManager, AccountSummary, DEFAULT_REVOKE_TIMEOUT};
pub use error::{ConnectorError, ConnectorResult};
pub use gateway::{ApiRequest, ApiResponse, ConnectorGateway};
pub use http::{ProviderResponse, RequestOptions, ResilientExecutor, RetryPolicy};
pub use idempotency::{DispatchCache, DispatchOutcome, DEFAULT_DISPATCH_TTL};
pub use oauth::{
    AuthorizationUrl, ProviderRegistry, StateSigner, TokenCoordinator, TokenEndpointClient,
    TokenResponse,
};

/// In-process maps are only held for short synchronous sections; a panic
/// inside one leaves the data usable.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
