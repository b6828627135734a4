pub mod env_resolver;
pub mod error;
pub mod settings;

// Re-export commonly used types
pub use env_resolver::{EnvResolver, EnvResolverError};
pub use error::{ConfigError, ConfigResult};
pub use settings::{
    EncryptionSettings, HttpSettings, ProviderSettings, Settings, ENV_PREFIX, MAX_ATTEMPTS_CAP,
};
