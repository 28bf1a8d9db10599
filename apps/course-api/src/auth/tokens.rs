//! Access tokens issued by the auth service: HS256 JWTs over a shared secret.

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthClaims {
    /// User ID.
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// Verify signature and expiry, returning the claims.
pub fn verify_token(token: &str, secret: &str) -> Result<AuthClaims, ApiError> {
    let key = DecodingKey::from_secret(secret.as_bytes());
    let validation = Validation::new(Algorithm::HS256);

    let data = jsonwebtoken::decode::<AuthClaims>(token, &key, &validation).map_err(|e| {
        tracing::debug!(?e, "access token validation failed");
        ApiError::unauthorized("Invalid or expired token")
    })?;
    Ok(data.claims)
}

/// Sign a token for `user_id`. Used by local tooling and tests; production
/// tokens come from the auth service.
pub fn issue_token(user_id: &str, secret: &str, ttl: Duration) -> Result<String, ApiError> {
    let now = Utc::now();
    let claims = AuthClaims {
        sub: user_id.to_string(),
        iat: now.timestamp(),
        exp: (now + ttl).timestamp(),
    };
    let key = EncodingKey::from_secret(secret.as_bytes());

    jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &key).map_err(|e| {
        tracing::error!(?e, "failed to sign access token");
        ApiError::internal("Token signing failed")
    })
}
