//! Signed OAuth `state` parameter

use crate::error::{ConnectorError, ConnectorResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use nova_core::now_ms;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const STATE_MAX_AGE_MS: i64 = 10 * 60 * 1000;
pub const STATE_FUTURE_SKEW_MS: i64 = 60 * 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatePayload {
    pub ts: i64,
    pub nonce: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub return_to: String,
    pub flow: String,
}

/// Only same-site absolute paths; `//host` would be protocol-relative.
fn is_safe_return_path(path: &str) -> bool {
    path.starts_with('/') && !path.starts_with("//") && !path.starts_with("/\\")
}

/// HMAC-SHA256 signer for `base64url(payload).base64url(mac)` state values.
#[derive(Clone)]
pub struct StateSigner {
    secret: Vec<u8>,
}

impl std::fmt::Debug for StateSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StateSigner { .. }")
    }
}

impl StateSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> ConnectorResult<Self> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(ConnectorError::InvalidConfig(
                "state secret must not be empty".to_string(),
            ));
        }
        Ok(Self {
            secret: secret.to_vec(),
        })
    }

    fn mac(&self) -> ConnectorResult<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| ConnectorError::InvalidConfig(format!("state secret: {}", e)))
    }

    pub fn sign(&self, user_id: &str, return_to: &str, flow: &str) -> ConnectorResult<String> {
        self.sign_payload(&StatePayload {
            ts: now_ms(),
            nonce: uuid::Uuid::new_v4().simple().to_string(),
            user_id: user_id.to_string(),
            return_to: return_to.to_string(),
            flow: flow.to_string(),
        })
    }

    pub fn sign_payload(&self, payload: &StatePayload) -> ConnectorResult<String> {
        if payload.user_id.is_empty() {
            return Err(ConnectorError::InvalidState("missing user id".to_string()));
        }
        if !is_safe_return_path(&payload.return_to) {
            return Err(ConnectorError::InvalidState(
                "return path must be a same-site absolute path".to_string(),
            ));
        }
        let body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload)?);
        let mut mac = self.mac()?;
        mac.update(body.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok(format!("{}.{}", body, signature))
    }

    pub fn verify(&self, state: &str, expected_flow: &str) -> ConnectorResult<StatePayload> {
        self.verify_at(state, expected_flow, now_ms())
    }

    pub fn verify_at(
        &self,
        state: &str,
        expected_flow: &str,
        now_ms: i64,
    ) -> ConnectorResult<StatePayload> {
        let malformed = || ConnectorError::InvalidState("malformed state".to_string());

        let (body, signature) = state.trim().split_once('.').ok_or_else(malformed)?;
        let signature = URL_SAFE_NO_PAD.decode(signature).map_err(|_| malformed())?;

        let mut mac = self.mac()?;
        mac.update(body.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| ConnectorError::InvalidState("bad signature".to_string()))?;

        let raw = URL_SAFE_NO_PAD.decode(body).map_err(|_| malformed())?;
        let payload: StatePayload = serde_json::from_slice(&raw).map_err(|_| malformed())?;

        if payload.user_id.is_empty() {
            return Err(ConnectorError::InvalidState("missing user id".to_string()));
        }
        if !is_safe_return_path(&payload.return_to) {
            return Err(ConnectorError::InvalidState("unsafe return path".to_string()));
        }
        if payload.flow != expected_flow {
            return Err(ConnectorError::InvalidState("flow mismatch".to_string()));
        }
        if now_ms - payload.ts > STATE_MAX_AGE_MS {
            return Err(ConnectorError::InvalidState("state expired".to_string()));
        }
        if payload.ts - now_ms > STATE_FUTURE_SKEW_MS {
            return Err(ConnectorError::InvalidState("state issued in the future".to_string()));
        }
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> StateSigner {
        StateSigner::new("test-state-secret").unwrap()
    }

    fn payload(ts: i64) -> StatePayload {
        StatePayload {
            ts,
            nonce: "n1".to_string(),
            user_id: "u1".to_string(),
            return_to: "/settings/connectors".to_string(),
            flow: "mail".to_string(),
        }
    }

    #[test]
    fn test_sign_and_verify() {
        let signer = signer();
        let state = signer.sign("u1", "/settings", "mail").unwrap();
        let payload = signer.verify(&state, "mail").unwrap();
        assert_eq!(payload.user_id, "u1");
        assert_eq!(payload.return_to, "/settings");
        assert!(!state.contains('='));
    }

    #[test]
    fn test_tampered_body_is_rejected() {
        let signer = signer();
        let state = signer.sign_payload(&payload(1_000)).unwrap();
        let (_, signature) = state.split_once('.').unwrap();
        let mut forged = payload(1_000);
        forged.user_id = "attacker".to_string();
        let forged_body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());
        let err = signer
            .verify_at(&format!("{}.{}", forged_body, signature), "mail", 1_000)
            .unwrap_err();
        assert!(err.to_string().contains("bad signature"));

        let other = StateSigner::new("other-secret").unwrap();
        assert!(other.verify_at(&state, "mail", 1_000).is_err());
    }

    #[test]
    fn test_age_and_skew_limits() {
        let signer = signer();
        let now = 100_000_000;
        let fresh = signer.sign_payload(&payload(now - STATE_MAX_AGE_MS + 1)).unwrap();
        assert!(signer.verify_at(&fresh, "mail", now).is_ok());

        let old = signer.sign_payload(&payload(now - STATE_MAX_AGE_MS - 1)).unwrap();
        assert!(signer.verify_at(&old, "mail", now).is_err());

        let future = signer.sign_payload(&payload(now + STATE_FUTURE_SKEW_MS + 1)).unwrap();
        assert!(signer.verify_at(&future, "mail", now).is_err());
    }

    #[test]
    fn test_flow_mismatch_and_garbage() {
        let signer = signer();
        let state = signer.sign_payload(&payload(5)).unwrap();
        assert!(signer.verify_at(&state, "music", 5).is_err());
        assert!(signer.verify_at("not-a-state", "mail", 5).is_err());
        assert!(signer.verify_at("a.b.c", "mail", 5).is_err());
    }

    #[test]
    fn test_unsafe_return_paths() {
        let signer = signer();
        for path in ["//evil.example", "https://evil.example", "", "relative"] {
            assert!(signer.sign("u1", path, "mail").is_err(), "{}", path);
        }
        // A validly signed payload with an unsafe path is still refused.
        let mut bad = payload(5);
        bad.return_to = "//evil.example".to_string();
        let body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&bad).unwrap());
        let mut mac = signer.mac().unwrap();
        mac.update(body.as_bytes());
        let sig = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        assert!(signer.verify_at(&format!("{}.{}", body, sig), "mail", 5).is_err());
    }
}
