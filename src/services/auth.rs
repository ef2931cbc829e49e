//! Token verification and caller identity.
//!
//! ARCHITECTURE
//! ============
//! Clients authenticate the websocket upgrade with a JWT in the `token` query
//! parameter. Tokens are HS256, issued by the account service; this server
//! only verifies them. A verified token is resolved against the users table
//! to build the caller's [`Identity`] — a token for a deleted user is
//! rejected even when the signature is valid.

use std::fmt;

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::services::repo::FleetRepo;

// =============================================================================
// ROLES
// =============================================================================

/// Access roles, most to least privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Admin,
    Dispatcher,
    Responder,
}

impl Role {
    /// Wire/database spelling of the role.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Dispatcher => "DISPATCHER",
            Role::Responder => "RESPONDER",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ADMIN" => Some(Role::Admin),
            "DISPATCHER" => Some(Role::Dispatcher),
            "RESPONDER" => Some(Role::Responder),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// CLAIMS + IDENTITY
// =============================================================================

/// Claims carried by an access token.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: i64,
    pub user_role: String,
    /// Token kind; only `"access"` tokens open a socket.
    #[serde(rename = "type")]
    pub token_type: String,
    pub iat: i64,
    pub exp: i64,
}

/// The authenticated caller attached to a connection for its lifetime.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: i64,
    pub role: Role,
    pub name: String,
    pub email: String,
}

// =============================================================================
// VERIFIER
// =============================================================================

/// HS256 token verifier. Built once at startup from `JWT_SECRET`.
pub struct TokenVerifier {
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        let validation = Validation::new(Algorithm::HS256);
        Self { decoding: DecodingKey::from_secret(secret), validation }
    }

    /// Decode and validate a token (signature + expiry).
    ///
    /// # Errors
    ///
    /// Returns the `jsonwebtoken` error for a bad signature, expired token,
    /// or malformed claims.
    pub fn decode(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        Ok(jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)?.claims)
    }
}

/// Resolve a raw token into a caller identity, or `None` if the token is
/// invalid, expired, the wrong kind, or names an unknown user. Failures are
/// logged here; callers just reject the upgrade.
pub async fn authenticate(
    verifier: &TokenVerifier,
    repo: &dyn FleetRepo,
    token: &str,
) -> Option<Identity> {
    let claims = match verifier.decode(token) {
        Ok(claims) => claims,
        Err(e) => {
            warn!(error = %e, "ws: token rejected");
            return None;
        }
    };

    if claims.token_type != "access" {
        warn!(token_type = %claims.token_type, "ws: non-access token rejected");
        return None;
    }

    let user = match repo.get_user_by_id(claims.user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            warn!(user_id = claims.user_id, "ws: token for unknown user");
            return None;
        }
        Err(e) => {
            warn!(error = %e, user_id = claims.user_id, "ws: user lookup failed");
            return None;
        }
    };

    let Some(role) = Role::parse(&user.role) else {
        warn!(user_id = user.user_id, role = %user.role, "ws: user has unrecognized role");
        return None;
    };

    Some(Identity { user_id: user.user_id, role, name: user.name, email: user.email })
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub mod test_tokens {
    use super::Claims;
    use jsonwebtoken::{EncodingKey, Header};
    use std::time::{SystemTime, UNIX_EPOCH};

    fn now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_secs()).unwrap_or(0))
            .unwrap_or(0)
    }

    /// Mint a token the way the account service does.
    pub fn issue(secret: &[u8], user_id: i64, role: &str, token_type: &str, ttl_secs: i64) -> String {
        let iat = now();
        let claims = Claims {
            user_id,
            user_role: role.to_string(),
            token_type: token_type.to_string(),
            iat,
            exp: iat + ttl_secs,
        };
        jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(secret))
            .expect("encode test token")
    }

    pub fn access(secret: &[u8], user_id: i64, role: &str) -> String {
        issue(secret, user_id, role, "access", 3600)
    }
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
