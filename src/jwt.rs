//! Access token issuance and validation.
//!
//! Access tokens are compact HS512-signed JWTs carrying the user id, username
//! and role names. They are never persisted. The refresh flow validates an
//! already expired access token with [`ValidationMode::IgnoreExpiry`], which
//! skips only the expiration check.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::session::UserIdentity;

/// Minimum signing secret length in bytes (128 bits).
pub const MIN_SECRET_LENGTH: usize = 16;

/// Default access token duration: 5 minutes
pub const DEFAULT_ACCESS_TOKEN_DURATION_SECS: u64 = 5 * 60;

/// Longest accepted access token duration: 24 hours
pub const MAX_ACCESS_TOKEN_DURATION_SECS: u64 = 24 * 60 * 60;

const SIGNING_ALGORITHM: Algorithm = Algorithm::HS512;

/// JWT claims for access tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (user id)
    pub sub: String,
    /// Username
    pub username: String,
    /// Role names, one entry per role
    #[serde(rename = "role", default)]
    pub roles: Vec<String>,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Not before (Unix timestamp)
    pub nbf: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
    /// Issuer
    pub iss: String,
    /// Audience
    pub aud: String,
}

impl AccessClaims {
    /// Parse the subject claim as a user id.
    pub fn user_id(&self) -> Option<i32> {
        self.sub.parse().ok()
    }

    /// Case-insensitive role membership check.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.eq_ignore_ascii_case(role))
    }
}

/// Signing configuration supplied at startup.
#[derive(Clone)]
pub struct JwtSettings {
    pub secret: Vec<u8>,
    pub issuer: String,
    pub audience: String,
    /// Access token lifetime in seconds
    pub access_token_duration: u64,
}

impl std::fmt::Debug for JwtSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtSettings")
            .field("secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("access_token_duration", &self.access_token_duration)
            .finish()
    }
}

/// How strictly [`JwtConfig::validate_access_token`] treats the lifetime claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    /// Signature, issuer, audience, not-before and expiration are all checked.
    Strict,
    /// Everything except expiration is checked. Only used by the refresh flow.
    IgnoreExpiry,
}

/// Result of generating an access token.
#[derive(Debug, Clone)]
pub struct AccessTokenResult {
    /// The JWT token string
    pub token: String,
    /// Expiration timestamp (Unix seconds)
    pub expires_at: u64,
    /// Token duration in seconds
    pub duration: u64,
}

/// Issuer and validator for access tokens.
#[derive(Clone)]
pub struct JwtConfig {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
    access_token_duration: u64,
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("access_token_duration", &self.access_token_duration)
            .finish_non_exhaustive()
    }
}

impl JwtConfig {
    /// Create a new JWT configuration.
    ///
    /// Fails with [`JwtError::SecretTooShort`] when the secret has fewer than
    /// [`MIN_SECRET_LENGTH`] bytes, and with [`JwtError::InvalidDuration`]
    /// unless the lifetime is between one second and
    /// [`MAX_ACCESS_TOKEN_DURATION_SECS`]. Callers treat both as fatal at startup.
    pub fn new(settings: &JwtSettings) -> Result<Self, JwtError> {
        if settings.secret.len() < MIN_SECRET_LENGTH {
            return Err(JwtError::SecretTooShort);
        }

        if !(1..=MAX_ACCESS_TOKEN_DURATION_SECS).contains(&settings.access_token_duration) {
            return Err(JwtError::InvalidDuration(settings.access_token_duration));
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(&settings.secret),
            decoding_key: DecodingKey::from_secret(&settings.secret),
            issuer: settings.issuer.clone(),
            audience: settings.audience.clone(),
            access_token_duration: settings.access_token_duration,
        })
    }

    pub fn access_token_duration(&self) -> u64 {
        self.access_token_duration
    }

    /// Generate an access token for a user.
    pub fn generate_access_token(
        &self,
        identity: &UserIdentity,
    ) -> Result<AccessTokenResult, JwtError> {
        self.generate_access_token_at(identity, now_secs()?)
    }

    /// Generate an access token as if the current time were `now`.
    pub fn generate_access_token_at(
        &self,
        identity: &UserIdentity,
        now: u64,
    ) -> Result<AccessTokenResult, JwtError> {
        let exp = now
            .checked_add(self.access_token_duration)
            .ok_or(JwtError::InvalidDuration(self.access_token_duration))?;

        let claims = AccessClaims {
            sub: identity.id.to_string(),
            username: identity.username.clone(),
            roles: identity.roles.clone(),
            iat: now,
            nbf: now,
            exp,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };

        let header = Header::new(SIGNING_ALGORITHM);
        let token = jsonwebtoken::encode(&header, &claims, &self.encoding_key)
            .map_err(JwtError::Encoding)?;

        Ok(AccessTokenResult {
            token,
            expires_at: exp,
            duration: self.access_token_duration,
        })
    }

    /// Validate and decode an access token.
    ///
    /// Clock skew tolerance is zero in both modes.
    pub fn validate_access_token(
        &self,
        token: &str,
        mode: ValidationMode,
    ) -> Result<AccessClaims, JwtError> {
        let mut validation = Validation::new(SIGNING_ALGORITHM);
        validation.leeway = 0;
        validation.validate_nbf = true;
        validation.validate_exp = mode == ValidationMode::Strict;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "nbf", "iat", "sub", "iss", "aud"]);

        let token_data =
            jsonwebtoken::decode::<AccessClaims>(token, &self.decoding_key, &validation)
                .map_err(|e| match e.kind() {
                    ErrorKind::ExpiredSignature => JwtError::Expired,
                    _ => JwtError::InvalidToken(e),
                })?;

        Ok(token_data.claims)
    }
}

/// Current Unix time in seconds.
pub fn now_secs() -> Result<u64, JwtError> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| JwtError::TimeError)?
        .as_secs())
}

/// Errors that can occur during JWT operations.
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("signing secret must be at least {} bytes", MIN_SECRET_LENGTH)]
    SecretTooShort,
    #[error("access token duration of {0}s is out of range")]
    InvalidDuration(u64),
    #[error("failed to encode token: {0}")]
    Encoding(jsonwebtoken::errors::Error),
    #[error("invalid token: {0}")]
    InvalidToken(jsonwebtoken::errors::Error),
    #[error("token has expired")]
    Expired,
    #[error("system time error")]
    TimeError,
}
