//! Runtime settings for the credential subsystem

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::env_resolver::EnvResolver;
use crate::error::{ConfigError, ConfigResult};

pub const ENV_PREFIX: &str = "NOVA_";
pub const MAX_ATTEMPTS_CAP: u32 = 4;

/// Connector kinds whose provider block can be filled from plain env vars.
const ENV_PROVIDER_KINDS: &[&str] = &["mail", "calendar", "music"];

/// Accepts strings, numbers and booleans; templated secrets may have been
/// coerced to a scalar during `${VAR}` expansion.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match JsonValue::deserialize(deserializer)? {
        JsonValue::Null => Ok(String::new()),
        JsonValue::String(s) => Ok(s),
        JsonValue::Number(n) => Ok(n.to_string()),
        JsonValue::Bool(b) => Ok(b.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string, got {}",
            other
        ))),
    }
}

fn lenient_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match JsonValue::deserialize(deserializer)? {
        JsonValue::Null => Ok(Vec::new()),
        JsonValue::String(s) => Ok(split_list(&s)),
        JsonValue::Array(items) => Ok(items
            .into_iter()
            .filter_map(|v| match v {
                JsonValue::String(s) => Some(s),
                JsonValue::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|s| !s.trim().is_empty())
            .collect()),
        other => Err(serde::de::Error::custom(format!(
            "expected a list of strings, got {}",
            other
        ))),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionSettings {
    /// Key material for new envelopes (base64 32-byte key or passphrase)
    #[serde(deserialize_with = "lenient_string")]
    pub primary_key: String,
    /// Older keys still accepted for reads, tried in order
    #[serde(deserialize_with = "lenient_strings")]
    pub fallback_keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_ms: u64,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            max_attempts: 3,
            retry_delay_ms: 250,
        }
    }
}

impl HttpSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// OAuth application and endpoint overrides for one connector kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    #[serde(deserialize_with = "lenient_string")]
    pub client_id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub client_secret: String,
    #[serde(deserialize_with = "lenient_string")]
    pub redirect_uri: String,
    pub authorize_url: Option<String>,
    pub token_url: Option<String>,
    pub revoke_url: Option<String>,
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database_url: String,
    pub encryption: EncryptionSettings,
    #[serde(deserialize_with = "lenient_string")]
    pub state_secret: String,
    pub http: HttpSettings,
    pub token_cache_soft_limit: usize,
    pub idempotency_ttl_secs: u64,
    pub ratchet_on_read: bool,
    pub providers: BTreeMap<String, ProviderSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "sqlite:nova.db".to_string(),
            encryption: EncryptionSettings::default(),
            state_secret: String::new(),
            http: HttpSettings::default(),
            token_cache_soft_limit: 512,
            idempotency_ttl_secs: 300,
            ratchet_on_read: true,
            providers: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Load from the process environment (`NOVA_*`).
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable lookup; used by `from_env` and tests.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<Self> {
        let var = |suffix: &str| {
            lookup(&format!("{}{}", ENV_PREFIX, suffix)).filter(|v| !v.trim().is_empty())
        };
        let mut settings = Settings::default();

        if let Some(v) = var("DATABASE_URL") {
            settings.database_url = v;
        }
        if let Some(v) = var("ENCRYPTION_KEY") {
            settings.encryption.primary_key = v;
        }
        if let Some(v) = var("ENCRYPTION_FALLBACK_KEYS") {
            settings.encryption.fallback_keys = split_list(&v);
        }
        if let Some(v) = var("STATE_SECRET") {
            settings.state_secret = v;
        }
        if let Some(v) = var("HTTP_TIMEOUT_MS") {
            settings.http.timeout_ms = parse_number("NOVA_HTTP_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = var("HTTP_MAX_ATTEMPTS") {
            settings.http.max_attempts = parse_number("NOVA_HTTP_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = var("HTTP_RETRY_DELAY_MS") {
            settings.http.retry_delay_ms = parse_number("NOVA_HTTP_RETRY_DELAY_MS", &v)?;
        }
        if let Some(v) = var("TOKEN_CACHE_SOFT_LIMIT") {
            settings.token_cache_soft_limit = parse_number("NOVA_TOKEN_CACHE_SOFT_LIMIT", &v)?;
        }
        if let Some(v) = var("IDEMPOTENCY_TTL_SECS") {
            settings.idempotency_ttl_secs = parse_number("NOVA_IDEMPOTENCY_TTL_SECS", &v)?;
        }
        if let Some(v) = var("RATCHET_ON_READ") {
            settings.ratchet_on_read = parse_bool("NOVA_RATCHET_ON_READ", &v)?;
        }

        for kind in ENV_PROVIDER_KINDS {
            let upper = kind.to_uppercase();
            let field = |name: &str| var(&format!("{}_{}", upper, name));
            let provider = ProviderSettings {
                client_id: field("CLIENT_ID").unwrap_or_default(),
                client_secret: field("CLIENT_SECRET").unwrap_or_default(),
                redirect_uri: field("REDIRECT_URI").unwrap_or_default(),
                authorize_url: field("AUTHORIZE_URL"),
                token_url: field("TOKEN_URL"),
                revoke_url: field("REVOKE_URL"),
                api_base: field("API_BASE"),
            };
            if provider != ProviderSettings::default() {
                settings.providers.insert(kind.to_string(), provider);
            }
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Load a YAML (or JSON) file, expanding `${NOVA_*}` references.
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&raw, &EnvResolver::default(), |name| std::env::var(name).ok())
    }

    pub fn from_yaml_str(
        raw: &str,
        resolver: &EnvResolver,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> ConfigResult<Self> {
        let value: JsonValue = if raw.trim().is_empty() {
            JsonValue::Null
        } else {
            serde_yaml::from_str(raw)?
        };
        let value = if value.is_null() {
            JsonValue::Object(Default::default())
        } else {
            value
        };
        let resolved = resolver.resolve_with(&value, &lookup)?;
        let settings: Settings = serde_json::from_value(resolved)?;
        settings.validate()?;
        tracing::debug!(
            target: "nova::config",
            providers = settings.providers.len(),
            fallback_keys = settings.encryption.fallback_keys.len(),
            "settings loaded from file"
        );
        Ok(settings)
    }

    /// File when given, environment otherwise.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => Self::from_env(),
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.http.max_attempts == 0 || self.http.max_attempts > MAX_ATTEMPTS_CAP {
            return Err(ConfigError::InvalidValue {
                field: "http.max_attempts".to_string(),
                message: format!("must be between 1 and {}", MAX_ATTEMPTS_CAP),
            });
        }
        if self.http.timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "http.timeout_ms".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.encryption.primary_key.is_empty() && !self.encryption.fallback_keys.is_empty() {
            return Err(ConfigError::Validation(
                "fallback keys configured without a primary key".to_string(),
            ));
        }
        Ok(())
    }

    /// Fails unless a primary encryption key is configured.
    pub fn require_primary_key(&self) -> ConfigResult<&str> {
        if self.encryption.primary_key.is_empty() {
            return Err(ConfigError::MissingField("encryption.primary_key".to_string()));
        }
        Ok(&self.encryption.primary_key)
    }

    /// Fails unless a state signing secret is configured.
    pub fn require_state_secret(&self) -> ConfigResult<&str> {
        if self.state_secret.is_empty() {
            return Err(ConfigError::MissingField("state_secret".to_string()));
        }
        Ok(&self.state_secret)
    }

    pub fn provider(&self, kind: &str) -> Option<&ProviderSettings> {
        self.providers.get(kind)
    }

    pub fn idempotency_ttl(&self) -> Duration {
        Duration::from_secs(self.idempotency_ttl_secs)
    }
}

fn parse_number<T: std::str::FromStr>(field: &str, raw: &str) -> ConfigResult<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
        field: field.to_string(),
        message: e.to_string(),
    })
}

fn parse_bool(field: &str, raw: &str) -> ConfigResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            message: format!("'{}' is not a boolean", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_without_env() {
        let settings = Settings::from_lookup(|_| None).unwrap();
        assert_eq!(settings.http.max_attempts, 3);
        assert_eq!(settings.http.retry_delay_ms, 250);
        assert_eq!(settings.token_cache_soft_limit, 512);
        assert_eq!(settings.idempotency_ttl(), Duration::from_secs(300));
        assert!(settings.ratchet_on_read);
        assert!(settings.providers.is_empty());
    }

    #[test]
    fn env_overrides_and_provider_blocks() {
        let settings = Settings::from_lookup(lookup_from(&[
            ("NOVA_ENCRYPTION_KEY", "primary"),
            ("NOVA_ENCRYPTION_FALLBACK_KEYS", "old-1, old-2,"),
            ("NOVA_HTTP_MAX_ATTEMPTS", "4"),
            ("NOVA_RATCHET_ON_READ", "off"),
            ("NOVA_MAIL_CLIENT_ID", "cid"),
            ("NOVA_MAIL_TOKEN_URL", "http://localhost/token"),
        ]))
        .unwrap();

        assert_eq!(settings.encryption.primary_key, "primary");
        assert_eq!(settings.encryption.fallback_keys, vec!["old-1", "old-2"]);
        assert_eq!(settings.http.max_attempts, 4);
        assert!(!settings.ratchet_on_read);
        let mail = settings.provider("mail").unwrap();
        assert_eq!(mail.client_id, "cid");
        assert_eq!(mail.token_url.as_deref(), Some("http://localhost/token"));
        assert!(settings.provider("music").is_none());
    }

    #[test]
    fn attempts_above_cap_are_rejected() {
        let err = Settings::from_lookup(lookup_from(&[("NOVA_HTTP_MAX_ATTEMPTS", "9")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn non_numeric_value_is_rejected() {
        let err = Settings::from_lookup(lookup_from(&[("NOVA_HTTP_TIMEOUT_MS", "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn yaml_with_references() {
        let raw = r#"
encryption:
  primary_key: "${NOVA_KEY}"
  fallback_keys: ["${NOVA_OLD_KEY:legacy}"]
state_secret: "${NOVA_STATE:12345}"
http:
  timeout_ms: "${NOVA_TIMEOUT:2500}"
providers:
  music:
    client_id: spotify-client
    api_base: http://localhost:9999
"#;
        let settings = Settings::from_yaml_str(
            raw,
            &EnvResolver::default(),
            lookup_from(&[("NOVA_KEY", "k1")]),
        )
        .unwrap();

        assert_eq!(settings.encryption.primary_key, "k1");
        assert_eq!(settings.encryption.fallback_keys, vec!["legacy"]);
        // Numeric-looking secrets stay strings.
        assert_eq!(settings.state_secret, "12345");
        assert_eq!(settings.http.timeout(), Duration::from_millis(2500));
        assert_eq!(
            settings.provider("music").unwrap().api_base.as_deref(),
            Some("http://localhost:9999")
        );
    }

    #[test]
    fn missing_required_secrets_are_reported() {
        let settings = Settings::default();
        assert!(matches!(
            settings.require_primary_key(),
            Err(ConfigError::MissingField(_))
        ));
        assert!(matches!(
            settings.require_state_secret(),
            Err(ConfigError::MissingField(_))
        ));
    }
}
