//! Authorization URL for linking an account from the command line

use crate::{context::NovaContext, error::CliResult};
use nova_connectors::{AccountManager, StateSigner, TokenCoordinator};
use nova_core::{ConfigScope, ConnectorKind, ServiceReason};
use std::sync::Arc;

pub struct AuthorizeUrlCommand;

impl AuthorizeUrlCommand {
    pub async fn run(
        ctx: &NovaContext,
        user_id: &str,
        connector: &str,
        return_to: &str,
    ) -> CliResult<String> {
        let signer = StateSigner::new(ctx.settings.require_state_secret()?)?;
        let coordinator = TokenCoordinator::from_settings(&ctx.settings, ctx.store.clone())?;
        let manager = AccountManager::new(Arc::new(coordinator)).with_state_signer(signer);

        let scope = ConfigScope::service(user_id, ServiceReason::OAuthCallback);
        let url = manager
            .authorization_url(&scope, &ConnectorKind::new(connector.trim()), return_to)
            .await?;
        println!("{}", url);
        Ok(url)
    }
}
