use crate::encryption::CodecError;
use nova_core::CoreError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Encryption error: {0}")]
    Codec(#[from] CodecError),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            #[cfg(feature = "sqlite")]
            StoreError::Database(e) => match e {
                sqlx::Error::Database(db_err) => {
                    let code = db_err.code().unwrap_or_default();
                    // SQLite error codes: https://www.sqlite.org/rescode.html
                    match code.as_ref() {
                        "5" | "517" => {
                            CoreError::Transient(format!("database is busy: {}", db_err.message()))
                        }
                        _ => CoreError::Internal(format!(
                            "database error ({}): {}",
                            code,
                            db_err.message()
                        )),
                    }
                }
                sqlx::Error::PoolTimedOut => CoreError::Transient("database pool timed out".to_string()),
                other => CoreError::Internal(format!("database error: {}", other)),
            },
            StoreError::Serialization(e) => CoreError::Internal(format!("serde: {}", e)),
            StoreError::Codec(e) => CoreError::Internal(e.to_string()),
            StoreError::Core(e) => e,
            StoreError::Unauthorized(msg) => CoreError::Unauthorized(msg),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
