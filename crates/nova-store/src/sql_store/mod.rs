pub mod migrations;
pub mod store;

pub use migrations::MigrationRunner;
pub use store::SqlConfigBackend;
