//! Session lifecycle: login, refresh-token rotation and the collaborator
//! traits the session layer needs from storage.
//!
//! The service holds no per-session state between requests. The only shared
//! mutable resource is the single refresh record per user, owned by a
//! [`RefreshStore`].

mod errors;
mod rotator;
mod service;

use std::future::Future;

pub use errors::SessionError;
pub use rotator::{
    DEFAULT_REFRESH_TOKEN_DURATION_SECS, MAX_REFRESH_TOKEN_DURATION_SECS, REFRESH_TOKEN_BYTES,
    RefreshTokenRotator,
};
pub use service::{AuthSessionService, Session};

/// The identity an access token is minted for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub id: i32,
    pub username: String,
    pub roles: Vec<String>,
}

/// A user's current refresh token. At most one exists per user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshToken {
    pub user_id: i32,
    /// Random opaque value handed to the client
    pub token: String,
    /// Expiration timestamp (Unix seconds)
    pub expires_at: u64,
}

impl RefreshToken {
    pub fn is_expired_at(&self, now: u64) -> bool {
        now > self.expires_at
    }
}

/// Credential checks and identity lookups.
pub trait IdentityProvider: Sync {
    type Error: std::fmt::Display + Send;

    /// Returns `None` for an unknown username and for a wrong password alike.
    fn verify_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> impl Future<Output = Result<Option<UserIdentity>, Self::Error>> + Send;

    fn get_identity(
        &self,
        user_id: i32,
    ) -> impl Future<Output = Result<Option<UserIdentity>, Self::Error>> + Send;
}

/// Keyed storage for the single refresh token of each user.
pub trait RefreshStore: Sync {
    type Error: std::fmt::Display + Send;

    fn get(
        &self,
        user_id: i32,
    ) -> impl Future<Output = Result<Option<RefreshToken>, Self::Error>> + Send;

    /// Insert the record, overwriting any existing one for the same user.
    fn replace(
        &self,
        token: &RefreshToken,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Overwrite the user's record with `next` only if the stored value equals
    /// `presented` and has not expired at `now`. Must be a single atomic
    /// compare-and-swap. Returns `false` when nothing was replaced.
    fn rotate(
        &self,
        presented: &str,
        now: u64,
        next: &RefreshToken,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send;
}
