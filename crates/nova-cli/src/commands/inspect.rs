//! Redacted view of one user's configuration

use crate::{context::NovaContext, error::CliResult};
use nova_core::{sanitize_json_value, secret_fingerprint, ConfigScope, ServiceReason};
use nova_store::{KeyUsed, SecretState};
use serde_json::{json, Value as JsonValue};
use std::collections::BTreeMap;

fn describe_state(state: &SecretState) -> String {
    match state {
        SecretState::Empty => "empty".to_string(),
        SecretState::Plain => "plaintext".to_string(),
        SecretState::Envelope {
            decryptable_with: KeyUsed::Primary,
        } => "primary".to_string(),
        SecretState::Envelope {
            decryptable_with: KeyUsed::Fallback(i),
        } => format!("fallback#{}", i),
        SecretState::Envelope {
            decryptable_with: KeyUsed::Legacy,
        } => "legacy".to_string(),
        SecretState::Corrupted => "corrupted".to_string(),
    }
}

pub struct InspectCommand;

impl InspectCommand {
    /// Prints and returns `{document, secrets}`. Secret values are replaced by
    /// their redaction marker; `secrets` lists each stored field's key state and fingerprint.
    pub async fn run(ctx: &NovaContext, user_id: &str) -> CliResult<JsonValue> {
        let scope = ConfigScope::service(user_id, ServiceReason::KeyRotation);
        let document = ctx.store.load(&scope).await?;
        let states = ctx.store.secret_states(&scope).await?;

        let mut fingerprints = BTreeMap::new();
        let mut opened = document.clone();
        opened.visit_secrets_mut(|path, value| {
            if !value.is_empty() {
                fingerprints.insert(path.to_string(), secret_fingerprint(value));
            }
        });

        let secrets: Vec<JsonValue> = states
            .iter()
            .map(|(path, state)| {
                json!({
                    "path": path,
                    "state": describe_state(state),
                    "fingerprint": fingerprints.get(path),
                })
            })
            .collect();

        let output = json!({
            "document": sanitize_json_value(&serde_json::to_value(&document)?),
            "secrets": secrets,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nova_config::Settings;
    use nova_core::{AccountRecord, ConnectorKind};
    use nova_store::EncryptionKey;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_inspect_redacts_secrets() {
        let dir = tempdir().unwrap();
        let mut settings = Settings::default();
        settings.database_url = format!("sqlite://{}", dir.path().join("nova.db").display());
        settings.encryption.primary_key = EncryptionKey::generate().to_base64();
        let ctx = NovaContext::open(settings).await.unwrap();

        ctx.store
            .update_with(&ConfigScope::service("u1", ServiceReason::OAuthCallback), |doc| {
                let mut account = AccountRecord::new("a@example.com", vec![]);
                account.refresh_token = "rt-secret".to_string();
                doc.connector_mut(&ConnectorKind::mail()).upsert_account(account)?;
                doc.llm_provider = "openai".to_string();
                Ok(())
            })
            .await
            .unwrap();

        let output = InspectCommand::run(&ctx, "u1").await.unwrap();
        let rendered = output.to_string();
        assert!(!rendered.contains("rt-secret"));
        assert_eq!(output["document"]["llmProvider"], "openai");

        let secrets = output["secrets"].as_array().unwrap();
        assert_eq!(secrets.len(), 1);
        assert_eq!(secrets[0]["state"], "primary");
        assert!(secrets[0]["path"].as_str().unwrap().ends_with("refreshToken"));
        assert!(secrets[0]["fingerprint"].is_string());
    }
}
