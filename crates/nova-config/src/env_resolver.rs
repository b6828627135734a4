//! `${VAR}` / `${VAR:default}` expansion for settings files, restricted to allowed prefixes

use regex::Regex;
use serde_json::Value as JsonValue;
use thiserror::Error;

const VAR_PATTERN: &str = r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::([^}]*))?\}";

#[derive(Debug, Error)]
pub enum EnvResolverError {
    #[error("Environment variable '{0}' not found and no default provided")]
    VarNotFound(String),
    #[error("Environment variable '{0}' is not allowed. Allowed prefixes: {1:?}")]
    VarNotAllowed(String, Vec<String>),
    #[error("Invalid variable syntax: {0}")]
    InvalidSyntax(String),
}

/// Expands variable references inside string leaves of a JSON tree.
#[derive(Debug, Clone)]
pub struct EnvResolver {
    /// Empty means every variable may be referenced
    allowed_prefixes: Vec<String>,
}

impl Default for EnvResolver {
    fn default() -> Self {
        Self::new(vec!["NOVA_".to_string()])
    }
}

impl EnvResolver {
    pub fn new(allowed_prefixes: Vec<String>) -> Self {
        Self { allowed_prefixes }
    }

    pub fn unrestricted() -> Self {
        Self::new(Vec::new())
    }

    /// Resolve against the process environment
    pub fn resolve(&self, value: &JsonValue) -> Result<JsonValue, EnvResolverError> {
        self.resolve_with(value, &|name| std::env::var(name).ok())
    }

    /// Resolve against an arbitrary lookup
    pub fn resolve_with(
        &self,
        value: &JsonValue,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<JsonValue, EnvResolverError> {
        let pattern =
            Regex::new(VAR_PATTERN).map_err(|e| EnvResolverError::InvalidSyntax(e.to_string()))?;
        self.walk(value, &pattern, lookup)
    }

    fn walk(
        &self,
        value: &JsonValue,
        pattern: &Regex,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<JsonValue, EnvResolverError> {
        match value {
            JsonValue::String(s) => self.expand(s, pattern, lookup),
            JsonValue::Object(obj) => {
                let mut out = serde_json::Map::with_capacity(obj.len());
                for (key, val) in obj {
                    out.insert(key.clone(), self.walk(val, pattern, lookup)?);
                }
                Ok(JsonValue::Object(out))
            }
            JsonValue::Array(items) => items
                .iter()
                .map(|item| self.walk(item, pattern, lookup))
                .collect::<Result<Vec<_>, _>>()
                .map(JsonValue::Array),
            other => Ok(other.clone()),
        }
    }

    fn expand(
        &self,
        input: &str,
        pattern: &Regex,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<JsonValue, EnvResolverError> {
        if !input.contains("${") {
            return Ok(JsonValue::String(input.to_string()));
        }

        // Single pass: substituted values are never re-expanded.
        let mut result = String::with_capacity(input.len());
        let mut last = 0;
        for caps in pattern.captures_iter(input) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            self.check_allowed(name.as_str())?;
            let value = match lookup(name.as_str()) {
                Some(v) => v,
                None => match caps.get(2) {
                    Some(default) => default.as_str().to_string(),
                    None => return Err(EnvResolverError::VarNotFound(name.as_str().to_string())),
                },
            };
            result.push_str(&input[last..whole.start()]);
            result.push_str(&value);
            last = whole.end();
        }
        result.push_str(&input[last..]);

        if result.contains("${") && !pattern.is_match(input) {
            return Err(EnvResolverError::InvalidSyntax(input.to_string()));
        }

        Ok(coerce_scalar(result))
    }

    fn check_allowed(&self, name: &str) -> Result<(), EnvResolverError> {
        if self.allowed_prefixes.is_empty()
            || self.allowed_prefixes.iter().any(|p| name.starts_with(p))
        {
            return Ok(());
        }
        Err(EnvResolverError::VarNotAllowed(
            name.to_string(),
            self.allowed_prefixes.clone(),
        ))
    }
}

/// Expanded strings that look like booleans or integers become typed values
/// so numeric settings can be templated.
fn coerce_scalar(s: String) -> JsonValue {
    if let Ok(b) = s.parse::<bool>() {
        return JsonValue::Bool(b);
    }
    if let Ok(n) = s.parse::<i64>() {
        return JsonValue::Number(n.into());
    }
    JsonValue::String(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_basic_and_default_resolution() {
        let vars = env(&[("NOVA_STATE_SECRET", "s3cret")]);
        let lookup = |name: &str| vars.get(name).cloned();
        let resolver = EnvResolver::default();

        let out = resolver
            .resolve_with(
                &json!({"a": "${NOVA_STATE_SECRET}", "b": "${NOVA_MISSING:fallback}"}),
                &lookup,
            )
            .unwrap();
        assert_eq!(out, json!({"a": "s3cret", "b": "fallback"}));
    }

    #[test]
    fn test_missing_variable_error() {
        let lookup = |_: &str| -> Option<String> { None };
        let result = EnvResolver::default().resolve_with(&json!("${NOVA_NOPE}"), &lookup);
        assert!(matches!(result, Err(EnvResolverError::VarNotFound(_))));
    }

    #[test]
    fn test_prefix_allow_list() {
        let lookup = |_: &str| Some("x".to_string());
        let result = EnvResolver::default().resolve_with(&json!("${HOME}"), &lookup);
        assert!(matches!(result, Err(EnvResolverError::VarNotAllowed(_, _))));

        let out = EnvResolver::unrestricted()
            .resolve_with(&json!("${HOME}"), &lookup)
            .unwrap();
        assert_eq!(out, json!("x"));
    }

    #[test]
    fn test_interpolation_and_coercion() {
        let vars = env(&[("NOVA_HOST", "localhost"), ("NOVA_PORT", "8080")]);
        let lookup = |name: &str| vars.get(name).cloned();
        let out = EnvResolver::default()
            .resolve_with(
                &json!({
                    "url": "http://${NOVA_HOST}:${NOVA_PORT}/api",
                    "port": "${NOVA_PORT}",
                    "flag": "${NOVA_FLAG:true}",
                    "list": ["${NOVA_HOST}"]
                }),
                &lookup,
            )
            .unwrap();
        assert_eq!(
            out,
            json!({
                "url": "http://localhost:8080/api",
                "port": 8080,
                "flag": true,
                "list": ["localhost"]
            })
        );
    }

    #[test]
    fn test_values_are_not_re_expanded() {
        let vars = env(&[("NOVA_A", "${NOVA_B}"), ("NOVA_B", "boom")]);
        let lookup = |name: &str| vars.get(name).cloned();
        let out = EnvResolver::default()
            .resolve_with(&json!("${NOVA_A}"), &lookup)
            .unwrap();
        assert_eq!(out, json!("${NOVA_B}"));
    }
}
