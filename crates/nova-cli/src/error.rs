//! Error types for the CLI

use thiserror::Error;

/// CLI-specific errors
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(#[from] nova_config::ConfigError),

    #[error("{0}")]
    Core(#[from] nova_core::CoreError),

    #[error("Store error: {0}")]
    Store(#[from] nova_store::StoreError),

    #[error("Encryption key error: {0}")]
    Codec(#[from] nova_store::CodecError),

    #[error("Connector error: {0}")]
    Connector(#[from] nova_connectors::ConnectorError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("General error: {0}")]
    General(String),
}

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        Self::General(format!("{:#}", err))
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;
