//! Bearer token state for an authenticated archive session.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use serde::Deserialize;
use thiserror::Error;

/// Tokens are treated as expired this many seconds early to avoid using a
/// token that dies mid-request.
const EXPIRY_MARGIN_SECS: u64 = 600;

/// Errors raised while decoding a token.
#[derive(Debug, Error)]
pub enum TokenError {
    /// The token is not a three-part JWT.
    #[error("token is not a JWT")]
    NotAJwt,

    /// The payload segment did not decode or parse.
    #[error("unreadable JWT payload")]
    BadPayload,
}

#[derive(Debug, Deserialize)]
struct JwtClaims {
    exp: u64,
}

/// Credentials plus the bearer token obtained for them.
#[derive(Debug, Clone)]
pub struct AuthInfo {
    /// Authenticated username.
    pub username: String,
    /// Password, kept in memory for transparent re-authentication. Absent
    /// for sessions restored from a persisted token.
    pub password: Option<String>,
    /// Bearer token presented on authenticated requests.
    pub token: String,
    expiration_time: u64,
}

impl AuthInfo {
    /// Builds auth state from a fresh login, decoding the expiry from the
    /// token itself.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError`] when the token payload cannot be decoded.
    pub fn new(
        username: impl Into<String>,
        password: Option<String>,
        token: impl Into<String>,
    ) -> Result<Self, TokenError> {
        let token = token.into();
        let expiration_time = expiry_from_token(&token)?;
        Ok(Self {
            username: username.into(),
            password,
            token,
            expiration_time,
        })
    }

    /// Expiry as seconds since the Unix epoch.
    #[must_use]
    pub fn expiration_time(&self) -> u64 {
        self.expiration_time
    }

    /// Whether the token is expired (or within the safety margin of it).
    #[must_use]
    pub fn expired(&self) -> bool {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(u64::MAX);
        now > self.expiration_time.saturating_sub(EXPIRY_MARGIN_SECS)
    }
}

/// Decodes the `exp` claim from a JWT without verifying the signature;
/// the token is only inspected to know when to re-authenticate.
fn expiry_from_token(token: &str) -> Result<u64, TokenError> {
    let payload = token.split('.').nth(1).ok_or(TokenError::NotAJwt)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| STANDARD.decode(payload))
        .map_err(|_| TokenError::BadPayload)?;
    let claims: JwtClaims =
        serde_json::from_slice(&bytes).map_err(|_| TokenError::BadPayload)?;
    Ok(claims.exp)
}

#[cfg(test)]
pub(crate) fn fake_jwt(exp: u64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp}}}"#).as_bytes());
    format!("{header}.{payload}.sig")
}
