pub mod authorize;
pub mod coordinator;
pub mod providers;
pub mod state;
pub mod token;

pub use authorize::AuthorizationUrl;
pub use coordinator::{TokenCoordinator, DEFAULT_CACHE_SOFT_LIMIT, STALE_MARGIN_MS};
pub use providers::{OAuthClient, ProviderEndpoints, ProviderRegistry, ResolvedProvider};
pub use state::{StatePayload, StateSigner, STATE_FUTURE_SKEW_MS, STATE_MAX_AGE_MS};
pub use token::{TokenEndpointClient, TokenResponse, DEFAULT_EXPIRES_IN_SECS, EXPIRY_SAFETY_SECS};
