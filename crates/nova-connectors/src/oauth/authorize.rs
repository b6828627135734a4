use super::providers::{OAuthClient, ProviderEndpoints};
use crate::error::ConnectorResult;
use url::Url;

/// Provider authorization URL for the code flow with offline access.
#[derive(Debug, Clone)]
pub struct AuthorizationUrl<'a> {
    endpoints: &'a ProviderEndpoints,
    client: &'a OAuthClient,
    scopes: Vec<String>,
}

impl<'a> AuthorizationUrl<'a> {
    pub fn new(endpoints: &'a ProviderEndpoints, client: &'a OAuthClient) -> Self {
        Self {
            endpoints,
            client,
            scopes: Vec::new(),
        }
    }

    /// Add scopes, keeping first-seen order and dropping duplicates.
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for scope in scopes {
            let scope = scope.as_ref().trim();
            if !scope.is_empty() && !self.scopes.iter().any(|s| s == scope) {
                self.scopes.push(scope.to_string());
            }
        }
        self
    }

    pub fn scope_param(&self) -> String {
        self.scopes.join(" ")
    }

    pub fn build(&self, state: &str) -> ConnectorResult<Url> {
        let mut url = Url::parse(&self.endpoints.authorize_url)?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client.client_id)
            .append_pair("redirect_uri", &self.client.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent")
            .append_pair("scope", &self.scope_param())
            .append_pair("state", state);
        Ok(url)
    }
}
