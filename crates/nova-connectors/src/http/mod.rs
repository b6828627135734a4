pub mod executor;
pub mod retry_manager;
pub mod timeout_manager;

pub use executor::{ProviderResponse, RequestOptions, ResilientExecutor};
pub use retry_manager::{
    classify_error, classify_status_code, ErrorClassification, RetryDecision, RetryPolicy,
    DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, MAX_ATTEMPTS_CAP,
};
pub use timeout_manager::TimeoutManager;
