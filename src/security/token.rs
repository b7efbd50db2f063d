//! Media-socket tokens
//!
//! The media WebSocket carries no other authentication, so `/ws/{call_id}`
//! requires a short-lived HS256 token whose subject is the call id. Tokens
//! are minted when a call is created (web) or embedded in the carrier
//! stream URL (telephony) and expire after five minutes, which bounds the
//! window for session hijack.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Token lifetime in minutes
const MEDIA_TOKEN_EXPIRY_MINUTES: i64 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MediaClaims {
    /// Call id the token is bound to
    sub: String,
    iat: i64,
    exp: i64,
}

/// Issue a media token bound to a call id
pub fn issue_media_token(jwt_secret: &str, call_id: &str) -> Result<String> {
    let now = Utc::now();
    let claims = MediaClaims {
        sub: call_id.to_string(),
        iat: now.timestamp(),
        exp: (now + Duration::minutes(MEDIA_TOKEN_EXPIRY_MINUTES)).timestamp(),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )
    .context("Failed to encode media token")
}

/// Verify a media token and check it is bound to the expected call id
pub fn verify_media_token(jwt_secret: &str, call_id: &str, token: &str) -> bool {
    let validation = Validation::new(Algorithm::HS256);
    match decode::<MediaClaims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &validation,
    ) {
        Ok(data) => data.claims.sub == call_id,
        Err(_) => false,
    }
}
