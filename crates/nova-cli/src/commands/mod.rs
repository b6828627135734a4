pub mod authorize_url;
pub mod inspect;
pub mod keygen;
pub mod migrate;
pub mod rotate_keys;

// Re-export command handlers
pub use authorize_url::AuthorizeUrlCommand;
pub use inspect::InspectCommand;
pub use keygen::KeygenCommand;
pub use migrate::MigrateCommand;
pub use rotate_keys::RotateKeysCommand;
