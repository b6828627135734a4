use crate::env_resolver::EnvResolverError;
use nova_core::CoreError;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Environment resolution error: {0}")]
    Env(#[from] EnvResolverError),

    #[error("Missing required setting: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<ConfigError> for CoreError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Io(e) => CoreError::Internal(format!("config io: {}", e)),
            ConfigError::Yaml(e) => CoreError::InvalidRequest(format!("config yaml: {}", e)),
            ConfigError::Json(e) => CoreError::InvalidRequest(format!("config json: {}", e)),
            ConfigError::Env(e) => CoreError::InvalidRequest(e.to_string()),
            ConfigError::MissingField(field) => {
                CoreError::InvalidRequest(format!("missing setting {}", field))
            }
            ConfigError::InvalidValue { field, message } => {
                CoreError::InvalidRequest(format!("{}: {}", field, message))
            }
            ConfigError::Validation(msg) => CoreError::InvalidRequest(msg),
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
