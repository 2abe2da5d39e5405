//! Reading access-token claims. Signatures are never checked on the client;
//! the claims only tell us who the user is and when the token stops working.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::Deserialize;
use thiserror::Error;
use time::OffsetDateTime;

use crate::types::{Profile, Role};

#[derive(Debug, Error)]
pub enum ClaimsError {
    #[error("token is not in header.claims.signature form")]
    Shape,
    #[error("claims segment is not valid base64url")]
    Encoding,
    #[error("invalid claims json")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccessClaims {
    #[serde(alias = "nameid")]
    pub sub: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default, alias = "unique_name")]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    pub exp: i64,
}

impl AccessClaims {
    pub fn is_expired_at(&self, now: i64, leeway_seconds: i64) -> bool {
        self.exp <= now.saturating_add(leeway_seconds)
    }

    pub fn is_expired(&self, leeway_seconds: i64) -> bool {
        self.is_expired_at(now_unix(), leeway_seconds)
    }

    pub fn profile(&self) -> Profile {
        let email = self
            .email
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let name = self
            .name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| email.clone())
            .unwrap_or_else(|| self.sub.clone());
        Profile {
            id: self.sub.clone(),
            name,
            email,
            role: self.role,
        }
    }
}

pub fn decode_claims(token: &str) -> Result<AccessClaims, ClaimsError> {
    let mut parts = token.trim().split('.');
    let (Some(_header), Some(claims), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ClaimsError::Shape);
    };
    let bytes = URL_SAFE_NO_PAD
        .decode(claims.trim_end_matches('='))
        .map_err(|_| ClaimsError::Encoding)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// `Some(true)` when the token carries readable claims that have expired,
/// `None` when the token is opaque to us.
pub fn token_expired(token: &str, leeway_seconds: i64) -> Option<bool> {
    decode_claims(token)
        .ok()
        .map(|claims| claims.is_expired(leeway_seconds))
}

pub fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}
