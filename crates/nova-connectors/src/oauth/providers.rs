//! OAuth endpoint sets per connector kind

use nova_config::{ProviderSettings, Settings};
use nova_core::{ConnectorConfig, ConnectorKind, CoreError, CoreResult};
use std::collections::BTreeMap;

pub const GOOGLE_AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const GOOGLE_REVOKE_URL: &str = "https://oauth2.googleapis.com/revoke";
pub const SPOTIFY_AUTHORIZE_URL: &str = "https://accounts.spotify.com/authorize";
pub const SPOTIFY_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoints {
    pub authorize_url: String,
    pub token_url: String,
    pub revoke_url: Option<String>,
    pub api_base: String,
    /// Scopes requested on every authorization for this connector.
    pub default_scopes: Vec<String>,
}

/// OAuth application credentials used against a token endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

impl std::fmt::Debug for OAuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClient")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("redirect_uri", &self.redirect_uri)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedProvider {
    pub endpoints: ProviderEndpoints,
    pub client: OAuthClient,
}

#[derive(Debug, Clone, Default)]
struct ProviderEntry {
    endpoints: Option<ProviderEndpoints>,
    client: Option<OAuthClient>,
}

fn scopes(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn builtin_endpoints(kind: &str) -> Option<ProviderEndpoints> {
    let google = |api_base: &str, default_scopes: Vec<String>| ProviderEndpoints {
        authorize_url: GOOGLE_AUTHORIZE_URL.to_string(),
        token_url: GOOGLE_TOKEN_URL.to_string(),
        revoke_url: Some(GOOGLE_REVOKE_URL.to_string()),
        api_base: api_base.to_string(),
        default_scopes,
    };
    match kind {
        "mail" => Some(google(
            "https://gmail.googleapis.com",
            scopes(&[
                "openid",
                "email",
                "https://www.googleapis.com/auth/gmail.modify",
            ]),
        )),
        "calendar" => Some(google(
            "https://www.googleapis.com/calendar/v3",
            scopes(&[
                "openid",
                "email",
                "https://www.googleapis.com/auth/calendar",
            ]),
        )),
        "music" => Some(ProviderEndpoints {
            authorize_url: SPOTIFY_AUTHORIZE_URL.to_string(),
            token_url: SPOTIFY_TOKEN_URL.to_string(),
            revoke_url: None,
            api_base: "https://api.spotify.com/v1".to_string(),
            default_scopes: scopes(&[
                "user-read-email",
                "user-read-playback-state",
                "user-modify-playback-state",
            ]),
        }),
        _ => None,
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Endpoint and client registry. Built-in endpoints for mail and calendar
/// (Google) and music (Spotify); settings override any field.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    entries: BTreeMap<String, ProviderEntry>,
}

impl ProviderRegistry {
    /// Built-in endpoints only, no OAuth clients.
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        for kind in ["mail", "calendar", "music"] {
            registry.entries.insert(
                kind.to_string(),
                ProviderEntry {
                    endpoints: builtin_endpoints(kind),
                    client: None,
                },
            );
        }
        registry
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let mut registry = Self::builtin();
        for (kind, provider) in &settings.providers {
            registry.apply(kind, provider);
        }
        registry
    }

    /// Overlay one settings block onto the registry.
    pub fn apply(&mut self, kind: &str, settings: &ProviderSettings) {
        let entry = self.entries.entry(kind.to_string()).or_default();

        let base = entry.endpoints.clone().or_else(|| builtin_endpoints(kind));
        let merged = match (base, settings.authorize_url.as_deref(), settings.token_url.as_deref()) {
            (Some(mut endpoints), authorize, token) => {
                if let Some(url) = authorize.and_then(non_empty) {
                    endpoints.authorize_url = url;
                }
                if let Some(url) = token.and_then(non_empty) {
                    endpoints.token_url = url;
                }
                Some(endpoints)
            }
            (None, Some(authorize), Some(token)) => Some(ProviderEndpoints {
                authorize_url: authorize.to_string(),
                token_url: token.to_string(),
                revoke_url: None,
                api_base: String::new(),
                default_scopes: Vec::new(),
            }),
            (None, _, _) => None,
        };
        entry.endpoints = merged.map(|mut endpoints| {
            if let Some(url) = settings.revoke_url.as_deref() {
                endpoints.revoke_url = non_empty(url);
            }
            if let Some(url) = settings.api_base.as_deref().and_then(non_empty) {
                endpoints.api_base = url;
            }
            endpoints
        });

        if let Some(client_id) = non_empty(&settings.client_id) {
            entry.client = Some(OAuthClient {
                client_id,
                client_secret: settings.client_secret.clone(),
                redirect_uri: settings.redirect_uri.clone(),
            });
        }
    }

    pub fn endpoints(&self, kind: &ConnectorKind) -> CoreResult<&ProviderEndpoints> {
        self.entries
            .get(kind.as_str())
            .and_then(|e| e.endpoints.as_ref())
            .ok_or_else(|| {
                CoreError::InvalidRequest(format!("no OAuth provider configured for '{}'", kind))
            })
    }

    /// Endpoints plus the effective client: per-user block values win over settings.
    pub fn resolve(
        &self,
        kind: &ConnectorKind,
        block: Option<&ConnectorConfig>,
    ) -> CoreResult<ResolvedProvider> {
        let endpoints = self.endpoints(kind)?.clone();
        let configured = self.entries.get(kind.as_str()).and_then(|e| e.client.clone());

        let client_id = block
            .and_then(|b| non_empty(&b.oauth_client_id))
            .or_else(|| configured.as_ref().map(|c| c.client_id.clone()))
            .ok_or_else(|| {
                CoreError::InvalidRequest(format!("no OAuth client id configured for '{}'", kind))
            })?;
        let client_secret = block
            .and_then(|b| non_empty(&b.oauth_client_secret))
            .or_else(|| configured.as_ref().map(|c| c.client_secret.clone()))
            .unwrap_or_default();
        let redirect_uri = block
            .and_then(|b| non_empty(&b.redirect_uri))
            .or_else(|| configured.as_ref().map(|c| c.redirect_uri.clone()))
            .unwrap_or_default();

        Ok(ResolvedProvider {
            endpoints,
            client: OAuthClient {
                client_id,
                client_secret,
                redirect_uri,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_for(kind: &str, provider: ProviderSettings) -> Settings {
        let mut settings = Settings::default();
        settings.providers.insert(kind.to_string(), provider);
        settings
    }

    #[test]
    fn test_builtin_endpoints() {
        let registry = ProviderRegistry::builtin();
        let mail = registry.endpoints(&ConnectorKind::mail()).unwrap();
        assert_eq!(mail.token_url, GOOGLE_TOKEN_URL);
        assert!(mail.revoke_url.is_some());
        let music = registry.endpoints(&ConnectorKind::music()).unwrap();
        assert_eq!(music.token_url, SPOTIFY_TOKEN_URL);
        assert!(music.revoke_url.is_none());
        assert!(registry.endpoints(&ConnectorKind::new("telegram")).is_err());
    }

    #[test]
    fn test_settings_override_endpoints_and_client() {
        let settings = settings_for(
            "mail",
            ProviderSettings {
                client_id: "cid".into(),
                client_secret: "csecret".into(),
                redirect_uri: "https://nova.local/cb".into(),
                token_url: Some("http://127.0.0.1:9/token".into()),
                ..Default::default()
            },
        );
        let registry = ProviderRegistry::from_settings(&settings);
        let resolved = registry.resolve(&ConnectorKind::mail(), None).unwrap();
        assert_eq!(resolved.endpoints.token_url, "http://127.0.0.1:9/token");
        assert_eq!(resolved.endpoints.authorize_url, GOOGLE_AUTHORIZE_URL);
        assert_eq!(resolved.client.client_id, "cid");
        assert!(!format!("{:?}", resolved.client).contains("csecret"));
    }

    #[test]
    fn test_block_client_wins_over_settings() {
        let settings = settings_for(
            "calendar",
            ProviderSettings {
                client_id: "global".into(),
                client_secret: "global-secret".into(),
                ..Default::default()
            },
        );
        let registry = ProviderRegistry::from_settings(&settings);
        let block = ConnectorConfig {
            oauth_client_id: "per-user".into(),
            oauth_client_secret: "per-user-secret".into(),
            ..Default::default()
        };
        let resolved = registry
            .resolve(&ConnectorKind::calendar(), Some(&block))
            .unwrap();
        assert_eq!(resolved.client.client_id, "per-user");
        assert_eq!(resolved.client.client_secret, "per-user-secret");
    }

    #[test]
    fn test_missing_client_is_invalid_request() {
        let registry = ProviderRegistry::builtin();
        let err = registry.resolve(&ConnectorKind::music(), None).unwrap_err();
        assert_eq!(err.kind(), nova_core::ErrorKind::InvalidRequest);
    }

    #[test]
    fn test_custom_provider_needs_both_urls() {
        let mut registry = ProviderRegistry::builtin();
        registry.apply(
            "telegram",
            &ProviderSettings {
                authorize_url: Some("https://t.example/auth".into()),
                token_url: Some("https://t.example/token".into()),
                ..Default::default()
            },
        );
        assert!(registry.endpoints(&ConnectorKind::new("telegram")).is_ok());
    }
}
