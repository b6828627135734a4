//! Database migration command

use crate::{error::CliResult, utils::ColoredOutput};
use nova_core::ConfigBackend;
use nova_store::SqlConfigBackend;
use tracing::info;

pub struct MigrateCommand;

impl MigrateCommand {
    /// Returns the number of stored user documents.
    pub async fn run(database_url: &str) -> CliResult<usize> {
        info!("Initializing database at: {}", database_url);

        // Connecting applies pending migrations.
        let backend = SqlConfigBackend::new(database_url).await?;
        let users = backend.list_user_ids().await?.len();

        println!("{}", ColoredOutput::success("✓ Database initialized successfully"));
        println!("Database: {}", ColoredOutput::highlight(database_url));
        println!("User documents: {}", users);
        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_migrate_new_and_existing_database() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("nova.db");
        let url = format!("sqlite://{}", db_path.display());

        assert_eq!(MigrateCommand::run(&url).await.unwrap(), 0);
        assert!(db_path.exists());

        // Idempotent
        assert_eq!(MigrateCommand::run(&url).await.unwrap(), 0);
    }
}
