use crate::error::StoreResult;
use sqlx::SqlitePool;
use tracing::info;

const MIGRATIONS: &[(i64, &str, &str)] = &[(
    1,
    "001_user_configs",
    include_str!("../../migrations/001_user_configs.sql"),
)];

/// Database migration manager
pub struct MigrationRunner {
    pool: SqlitePool,
}

impl MigrationRunner {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Run all pending migrations, returns how many were applied
    pub async fn migrate(&self) -> StoreResult<usize> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        let applied_versions: Vec<i64> =
            sqlx::query_scalar("SELECT version FROM _migrations ORDER BY version")
                .fetch_all(&self.pool)
                .await?;

        let mut applied = 0;
        for &(version, name, sql) in MIGRATIONS {
            if applied_versions.contains(&version) {
                continue;
            }
            let mut tx = self.pool.begin().await?;
            for statement in split_statements(sql) {
                sqlx::query(&statement).execute(&mut *tx).await?;
            }
            sqlx::query("INSERT INTO _migrations (version, name) VALUES (?, ?)")
                .bind(version)
                .bind(name)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            info!(target: "nova::store", version, name, "applied migration");
            applied += 1;
        }

        Ok(applied)
    }
}

/// Split a script on `;`, skipping blank and comment-only statements.
fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut buffer = String::new();
    for line in sql.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("--") {
            continue;
        }
        buffer.push_str(line);
        buffer.push('\n');
        if trimmed.ends_with(';') {
            statements.push(buffer.trim().to_string());
            buffer.clear();
        }
    }
    if !buffer.trim().is_empty() {
        statements.push(buffer.trim().to_string());
    }
    statements
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_script_into_statements() {
        let sql = "-- header\nCREATE TABLE a (x INT);\n\nCREATE INDEX i ON a (x);\nSELECT 1";
        assert_eq!(
            split_statements(sql),
            vec!["CREATE TABLE a (x INT);", "CREATE INDEX i ON a (x);", "SELECT 1"]
        );
    }
}
