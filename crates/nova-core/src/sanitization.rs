//! Utilities for redacting credentials before documents reach logs or operators

use serde_json::{Map, Value as JsonValue};

/// Normalized field names (lower-case, no separators) that always hold secrets
const SENSITIVE_FIELDS: &[&str] = &[
    "password",
    "token",
    "accesstoken",
    "refreshtoken",
    "idtoken",
    "clientsecret",
    "oauthclientsecret",
    "apikey",
    "authorization",
    "secret",
    "privatekey",
    "credential",
    "credentials",
];

/// Suffixes that mark a field as sensitive after normalization
const SENSITIVE_SUFFIXES: &[&str] = &["token", "secret", "password", "apikey"];

/// Objects whose every leaf is a secret, whatever the key
const SECRET_MAPS: &[&str] = &["providerkeys"];

pub const REDACTED: &str = "***REDACTED***";

fn normalize_field(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Check if a field name indicates sensitive data (`refreshToken`, `client_secret`, ...)
pub fn is_sensitive_field(field_name: &str) -> bool {
    let field = normalize_field(field_name);
    if SENSITIVE_FIELDS.iter().any(|s| field == *s) {
        return true;
    }
    SENSITIVE_SUFFIXES.iter().any(|s| field.ends_with(s))
}

fn redact_leaves(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => JsonValue::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), redact_leaves(v)))
                .collect(),
        ),
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(redact_leaves).collect()),
        JsonValue::Null => JsonValue::Null,
        JsonValue::String(s) if s.is_empty() => JsonValue::String(String::new()),
        _ => JsonValue::String(REDACTED.to_string()),
    }
}

/// Sanitize a JSON value by replacing sensitive fields with placeholders.
///
/// Empty strings stay empty so operators can still tell "missing" from "set".
pub fn sanitize_json_value(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => {
            let sanitized: Map<String, JsonValue> = map
                .iter()
                .map(|(key, val)| {
                    let normalized = normalize_field(key);
                    let out = if SECRET_MAPS.contains(&normalized.as_str()) {
                        redact_leaves(val)
                    } else if is_sensitive_field(key) {
                        match val {
                            JsonValue::String(s) if s.is_empty() => val.clone(),
                            JsonValue::String(_) | JsonValue::Number(_) | JsonValue::Bool(_) => {
                                JsonValue::String(REDACTED.to_string())
                            }
                            other => sanitize_json_value(other),
                        }
                    } else {
                        sanitize_json_value(val)
                    };
                    (key.clone(), out)
                })
                .collect();
            JsonValue::Object(sanitized)
        }
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(sanitize_json_value).collect()),
        other => other.clone(),
    }
}

/// Sanitize free text such as a provider error body.
pub fn sanitize_string(input: &str) -> String {
    if let Ok(json_val) = serde_json::from_str::<JsonValue>(input) {
        let sanitized = sanitize_json_value(&json_val);
        return serde_json::to_string(&sanitized).unwrap_or_else(|_| REDACTED.to_string());
    }

    // form-encoded or query-string style: key=value&key=value
    input
        .split('&')
        .map(|pair| match pair.split_once('=') {
            Some((k, _)) if is_sensitive_field(k.trim()) => format!("{}={}", k, REDACTED),
            _ => pair.to_string(),
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Short fingerprint of a secret for log correlation; never reveals the value.
pub fn secret_fingerprint(secret: &str) -> String {
    if secret.is_empty() {
        return "<empty>".to_string();
    }
    format!("<{} chars>", secret.chars().count())
}
