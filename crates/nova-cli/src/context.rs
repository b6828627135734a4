//! Settings and store wiring shared by the commands

use crate::cli::Cli;
use crate::error::CliResult;
use anyhow::Context;
use nova_config::Settings;
use nova_store::{ScopedConfigStore, SecretCodec, SqlConfigBackend};
use std::sync::Arc;
use tracing::debug;

pub struct NovaContext {
    pub settings: Settings,
    pub backend: Arc<SqlConfigBackend>,
    pub store: Arc<ScopedConfigStore>,
}

/// Settings from the file or environment, with CLI overrides applied.
pub fn load_settings(cli: &Cli) -> CliResult<Settings> {
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(url) = &cli.database_url {
        settings.database_url = url.clone();
    }
    settings.validate()?;
    Ok(settings)
}

impl NovaContext {
    /// Connect (running pending migrations) and build the scoped store.
    pub async fn open(settings: Settings) -> CliResult<Self> {
        let codec = SecretCodec::from_materials(
            settings.require_primary_key()?,
            &settings.encryption.fallback_keys,
        )?;
        debug!(
            primary = %codec.primary().fingerprint(),
            fallbacks = codec.fallbacks().len(),
            "encryption keys loaded"
        );

        let backend = Arc::new(
            SqlConfigBackend::new(&settings.database_url)
                .await
                .with_context(|| format!("opening database {}", settings.database_url))?,
        );
        let store = Arc::new(
            ScopedConfigStore::new(backend.clone(), Arc::new(codec))
                .with_ratchet_on_read(settings.ratchet_on_read),
        );
        Ok(Self {
            settings,
            backend,
            store,
        })
    }
}
