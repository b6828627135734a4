//! Key rotation: re-seal every stored secret under the primary key

use crate::{context::NovaContext, error::CliResult, utils::ColoredOutput};
use nova_core::{ConfigBackend, ConfigScope, ServiceReason};
use nova_store::{KeyUsed, SecretState};
use tracing::warn;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RotationSummary {
    pub users: usize,
    /// Fields re-sealed (or, for a dry run, that would be)
    pub resealed: usize,
    /// Fields no configured key can open; left untouched
    pub corrupted: usize,
    pub failed: usize,
}

pub struct RotateKeysCommand;

impl RotateKeysCommand {
    pub async fn run(ctx: &NovaContext, dry_run: bool) -> CliResult<RotationSummary> {
        let mut summary = RotationSummary::default();

        for user_id in ctx.backend.list_user_ids().await? {
            summary.users += 1;
            let scope = ConfigScope::service(user_id.clone(), ServiceReason::KeyRotation);

            let counts = if dry_run {
                ctx.store.secret_states(&scope).await.map(|states| {
                    let stale = states
                        .iter()
                        .filter(|(_, state)| {
                            matches!(
                                state,
                                SecretState::Plain
                                    | SecretState::Envelope {
                                        decryptable_with: KeyUsed::Fallback(_)
                                    }
                            )
                        })
                        .count();
                    let corrupted = states
                        .iter()
                        .filter(|(_, state)| *state == SecretState::Corrupted)
                        .count();
                    (stale, corrupted)
                })
            } else {
                ctx.store
                    .rekey(&scope)
                    .await
                    .map(|report| (report.stale.len(), report.corrupted.len()))
            };

            match counts {
                Ok((stale, corrupted)) => {
                    summary.resealed += stale;
                    summary.corrupted += corrupted;
                    if stale > 0 || corrupted > 0 {
                        println!(
                            "{} resealed={} corrupted={}",
                            ColoredOutput::highlight(&user_id),
                            stale,
                            corrupted
                        );
                    }
                }
                Err(e) => {
                    summary.failed += 1;
                    warn!(user_id = %user_id, error = %e, "key rotation failed for user");
                    eprintln!("{} {}: {}", ColoredOutput::error("failed"), user_id, e);
                }
            }
        }

        let verb = if dry_run { "would reseal" } else { "resealed" };
        println!(
            "{} users={} {}={} corrupted={} failed={}",
            ColoredOutput::success("✓ Key rotation finished"),
            summary.users,
            verb,
            summary.resealed,
            summary.corrupted,
            summary.failed
        );
        if summary.corrupted > 0 {
            println!(
                "{}",
                ColoredOutput::warning("Corrupted fields need the account to be reconnected.")
            );
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nova_config::Settings;
    use nova_store::{EncryptionKey, ScopedConfigStore, SecretCodec, SqlConfigBackend};
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_rotation_moves_secrets_to_new_primary() {
        let dir = tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("nova.db").display());
        let old_key = EncryptionKey::generate();
        let new_key = EncryptionKey::generate();

        {
            let backend = Arc::new(SqlConfigBackend::new(&url).await.unwrap());
            let store = ScopedConfigStore::new(
                backend,
                Arc::new(SecretCodec::new(old_key.clone(), vec![])),
            );
            let scope = ConfigScope::service("u1", ServiceReason::Scheduler);
            store
                .update(&json!({"providerKeys": {"openai": "sk-1", "groq": "gk-1"}}), &scope)
                .await
                .unwrap();
        }

        let mut settings = Settings::default();
        settings.database_url = url;
        settings.encryption.primary_key = new_key.to_base64();
        settings.encryption.fallback_keys = vec![old_key.to_base64()];
        settings.ratchet_on_read = false;
        let ctx = NovaContext::open(settings).await.unwrap();

        let preview = RotateKeysCommand::run(&ctx, true).await.unwrap();
        assert_eq!(preview.users, 1);
        assert_eq!(preview.resealed, 2);

        let summary = RotateKeysCommand::run(&ctx, false).await.unwrap();
        assert_eq!(summary.resealed, 2);
        assert_eq!(summary.failed, 0);

        let again = RotateKeysCommand::run(&ctx, false).await.unwrap();
        assert_eq!(again.resealed, 0);

        // Readable with the new key alone.
        let store = ScopedConfigStore::new(
            ctx.backend.clone(),
            Arc::new(SecretCodec::new(new_key, vec![])),
        );
        let doc = store
            .load(&ConfigScope::service("u1", ServiceReason::Scheduler))
            .await
            .unwrap();
        assert_eq!(doc.provider_keys["openai"], "sk-1");
    }
}
