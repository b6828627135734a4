use std::str::FromStr;

use crate::error::CoreError;

/// Allow-listed reasons a service role may touch a user's configuration
/// without the user's own credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceReason {
    Scheduler,
    OAuthCallback,
    TokenRefresh,
    KeyRotation,
}

impl ServiceReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceReason::Scheduler => "scheduler",
            ServiceReason::OAuthCallback => "oauth-callback",
            ServiceReason::TokenRefresh => "token-refresh",
            ServiceReason::KeyRotation => "key-rotation",
        }
    }
}

impl FromStr for ServiceReason {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "scheduler" => Ok(ServiceReason::Scheduler),
            "oauth-callback" => Ok(ServiceReason::OAuthCallback),
            "token-refresh" => Ok(ServiceReason::TokenRefresh),
            "key-rotation" => Ok(ServiceReason::KeyRotation),
            other => Err(CoreError::Unauthorized(format!(
                "service reason '{}' is not allow-listed",
                other
            ))),
        }
    }
}

/// Authorization context required for every configuration read or write.
#[derive(Clone, PartialEq, Eq)]
pub enum ConfigScope {
    /// The owning user, carrying the credential their session presented.
    User { user_id: String, credential: String },
    /// A backend job acting for a user with an allow-listed justification.
    Service { user_id: String, reason: ServiceReason },
}

impl ConfigScope {
    pub fn user(user_id: impl Into<String>, credential: impl Into<String>) -> Self {
        ConfigScope::User {
            user_id: user_id.into(),
            credential: credential.into(),
        }
    }

    pub fn service(user_id: impl Into<String>, reason: ServiceReason) -> Self {
        ConfigScope::Service {
            user_id: user_id.into(),
            reason,
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            ConfigScope::User { user_id, .. } | ConfigScope::Service { user_id, .. } => user_id,
        }
    }

    /// Same user, re-scoped to a service reason (for work spawned on the user's behalf).
    pub fn as_service(&self, reason: ServiceReason) -> Self {
        ConfigScope::service(self.user_id().to_string(), reason)
    }

    /// Short description safe to log.
    pub fn describe(&self) -> String {
        match self {
            ConfigScope::User { user_id, .. } => format!("user:{}", user_id),
            ConfigScope::Service { user_id, reason } => {
                format!("service:{}:{}", reason.as_str(), user_id)
            }
        }
    }
}

// Credentials never reach logs through Debug.
impl std::fmt::Debug for ConfigScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_service_reason_is_rejected() {
        assert_eq!("scheduler".parse::<ServiceReason>().unwrap(), ServiceReason::Scheduler);
        let err = "backup".parse::<ServiceReason>().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Unauthorized);
    }

    #[test]
    fn debug_output_hides_credential() {
        let scope = ConfigScope::user("u1", "super-secret-jwt");
        let rendered = format!("{:?}", scope);
        assert_eq!(rendered, "user:u1");
        assert!(!rendered.contains("super-secret"));
    }
}
