//! Who the local participant is, and where their credential lives.
//!
//! Network-facing components receive a [`CredentialProvider`] instead of
//! reading tokens from ambient storage. The local identity is resolved once
//! per editor through an [`IdentityProvider`]; when that fails the editor
//! still works under a random anonymous id.

use std::sync::{Arc, RwLock};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::IdentityError;

// ───────────────────────────────────────────────────────────────────
// Credentials
// ───────────────────────────────────────────────────────────────────

/// Single injected source of the bearer token.
pub trait CredentialProvider: Send + Sync {
    fn token(&self) -> Option<String>;
    fn set_token(&self, token: String);
    fn clear(&self);
}

/// Process-local credential holder.
#[derive(Debug, Default)]
pub struct MemoryCredentials {
    token: RwLock<Option<String>>,
}

impl MemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }
}

impl CredentialProvider for MemoryCredentials {
    fn token(&self) -> Option<String> {
        self.token.read().ok().and_then(|t| t.clone())
    }

    fn set_token(&self, token: String) {
        if let Ok(mut slot) = self.token.write() {
            *slot = Some(token);
        }
    }

    fn clear(&self) {
        if let Ok(mut slot) = self.token.write() {
            *slot = None;
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Identity
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub user_id: String,
    pub display_name: String,
}

impl UserIdentity {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
        }
    }

    /// Random identity for participants whose identity could not be resolved.
    pub fn anonymous() -> Self {
        let simple = Uuid::new_v4().simple().to_string();
        Self {
            user_id: format!("anonymous-{}", &simple[..9]),
            display_name: "Anonymous".to_string(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_id.starts_with("anonymous-")
    }
}

pub trait IdentityProvider: Send + Sync {
    fn current_user(&self) -> Result<UserIdentity, IdentityError>;
}

/// Always answers with the same user.
#[derive(Debug, Clone)]
pub struct StaticIdentity(pub UserIdentity);

impl IdentityProvider for StaticIdentity {
    fn current_user(&self) -> Result<UserIdentity, IdentityError> {
        Ok(self.0.clone())
    }
}

/// Reads the user out of the claims segment of the stored JWT.
///
/// The signature is not checked; the backend does that on every request.
pub struct TokenIdentity {
    credentials: Arc<dyn CredentialProvider>,
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default, rename = "userId")]
    user_id: Option<serde_json::Value>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

impl TokenIdentity {
    pub fn new(credentials: Arc<dyn CredentialProvider>) -> Self {
        Self { credentials }
    }
}

impl IdentityProvider for TokenIdentity {
    fn current_user(&self) -> Result<UserIdentity, IdentityError> {
        let token = self.credentials.token().ok_or(IdentityError::MissingToken)?;
        let claims = decode_claims(&token)?;

        let user_id = match claims.user_id {
            Some(serde_json::Value::String(s)) => Some(s),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
        .or(claims.sub.clone())
        .ok_or(IdentityError::MissingUserId)?;

        let display_name = claims
            .name
            .or(claims.username)
            .or(claims.email)
            .or(claims.sub)
            .unwrap_or_else(|| user_id.clone());

        Ok(UserIdentity {
            user_id,
            display_name,
        })
    }
}

fn decode_claims(token: &str) -> Result<Claims, IdentityError> {
    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_)) => payload,
        _ => return Err(IdentityError::MalformedToken),
    };
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| IdentityError::InvalidClaims(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| IdentityError::InvalidClaims(e.to_string()))
}

/// Resolve the local participant, falling back to an anonymous identity.
pub fn resolve_local_identity(provider: &dyn IdentityProvider) -> UserIdentity {
    match provider.current_user() {
        Ok(identity) => identity,
        Err(e) => {
            let anonymous = UserIdentity::anonymous();
            log::warn!(
                "Could not resolve user identity ({e}); editing as {}",
                anonymous.user_id
            );
            anonymous
        }
    }
}
