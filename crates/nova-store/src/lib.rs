pub mod config_store;
pub mod encryption;
pub mod error;
pub mod lock;
pub mod memory;
pub mod merge;

#[cfg(feature = "sqlite")]
pub mod sql_store;

// Re-export commonly used types
pub use config_store::{LoadReport, ScopedConfigStore};
pub use encryption::{
    CodecError, Decrypted, EncryptionKey, KeyUsed, SecretCodec, SecretState, StoredSecret,
};
pub use error::{StoreError, StoreResult};
pub use lock::{KeyedGuard, KeyedLock};
pub use memory::MemoryConfigBackend;
pub use merge::merge_json;

#[cfg(feature = "sqlite")]
pub use sql_store::SqlConfigBackend;
