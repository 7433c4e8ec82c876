//! Refresh token issuance, validation and rotation.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use tracing::{debug, error};

use super::{RefreshStore, RefreshToken, SessionError};
use crate::jwt::now_secs;

/// Refresh token entropy: 256 bits
pub const REFRESH_TOKEN_BYTES: usize = 32;

/// Default refresh token duration: 2 weeks
pub const DEFAULT_REFRESH_TOKEN_DURATION_SECS: u64 = 14 * 24 * 60 * 60;

/// Longest accepted refresh token duration: 365 days
pub const MAX_REFRESH_TOKEN_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

/// Issues and rotates the single refresh token each user may hold.
#[derive(Debug, Clone)]
pub struct RefreshTokenRotator<S> {
    store: S,
    duration: u64,
}

impl<S: RefreshStore> RefreshTokenRotator<S> {
    /// Fails with [`SessionError::InvalidLifetime`] unless `duration` is
    /// between one second and [`MAX_REFRESH_TOKEN_DURATION_SECS`].
    pub fn new(store: S, duration: u64) -> Result<Self, SessionError> {
        if !(1..=MAX_REFRESH_TOKEN_DURATION_SECS).contains(&duration) {
            return Err(SessionError::InvalidLifetime(duration));
        }
        Ok(Self { store, duration })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Refresh token duration in seconds.
    pub fn duration(&self) -> u64 {
        self.duration
    }

    /// Build a fresh random token without storing it.
    pub fn generate(&self, user_id: i32, now: u64) -> Result<RefreshToken, SessionError> {
        let expires_at = now
            .checked_add(self.duration)
            .ok_or(SessionError::InvalidLifetime(self.duration))?;

        let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
        rand::rng().fill_bytes(&mut bytes);

        Ok(RefreshToken {
            user_id,
            token: URL_SAFE_NO_PAD.encode(bytes),
            expires_at,
        })
    }

    /// Issue a new refresh token, replacing whatever the user held before.
    pub async fn issue(&self, user_id: i32) -> Result<RefreshToken, SessionError> {
        self.issue_at(user_id, now_secs()?).await
    }

    pub async fn issue_at(&self, user_id: i32, now: u64) -> Result<RefreshToken, SessionError> {
        let token = self.generate(user_id, now)?;
        self.store.replace(&token).await.map_err(|e| {
            error!(user_id, error = %e, "Failed to store refresh token");
            SessionError::Unavailable
        })?;
        Ok(token)
    }

    /// Check a presented value against the user's stored token.
    ///
    /// True iff a record exists, the value matches exactly, and it has not expired.
    pub async fn validate(&self, user_id: i32, presented: &str) -> Result<bool, SessionError> {
        self.validate_at(user_id, presented, now_secs()?).await
    }

    pub async fn validate_at(
        &self,
        user_id: i32,
        presented: &str,
        now: u64,
    ) -> Result<bool, SessionError> {
        let stored = self.store.get(user_id).await.map_err(|e| {
            error!(user_id, error = %e, "Failed to load refresh token");
            SessionError::Unavailable
        })?;

        let valid = match stored {
            None => {
                debug!(user_id, "No refresh token on record");
                false
            }
            Some(stored) if stored.token != presented => {
                debug!(user_id, "Refresh token mismatch");
                false
            }
            Some(stored) if stored.is_expired_at(now) => {
                debug!(user_id, "Refresh token expired");
                false
            }
            Some(_) => true,
        };
        Ok(valid)
    }

    /// Exchange a valid presented token for a new one.
    ///
    /// The swap is a single conditional write, so of several concurrent
    /// rotations presenting the same value at most one succeeds. The rest get
    /// [`SessionError::InvalidToken`].
    pub async fn rotate(
        &self,
        user_id: i32,
        presented: &str,
    ) -> Result<RefreshToken, SessionError> {
        self.rotate_at(user_id, presented, now_secs()?).await
    }

    pub async fn rotate_at(
        &self,
        user_id: i32,
        presented: &str,
        now: u64,
    ) -> Result<RefreshToken, SessionError> {
        let next = self.generate(user_id, now)?;
        let swapped = self.store.rotate(presented, now, &next).await.map_err(|e| {
            error!(user_id, error = %e, "Failed to rotate refresh token");
            SessionError::Unavailable
        })?;

        if !swapped {
            debug!(user_id, "Refresh token rotation lost or rejected");
            return Err(SessionError::InvalidToken);
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MapStore(Mutex<HashMap<i32, RefreshToken>>);

    impl RefreshStore for MapStore {
        type Error = std::convert::Infallible;

        async fn get(&self, user_id: i32) -> Result<Option<RefreshToken>, Self::Error> {
            Ok(self.0.lock().unwrap().get(&user_id).cloned())
        }

        async fn replace(&self, token: &RefreshToken) -> Result<(), Self::Error> {
            self.0.lock().unwrap().insert(token.user_id, token.clone());
            Ok(())
        }

        async fn rotate(
            &self,
            presented: &str,
            now: u64,
            next: &RefreshToken,
        ) -> Result<bool, Self::Error> {
            let mut map = self.0.lock().unwrap();
            let current = map
                .get(&next.user_id)
                .is_some_and(|t| t.token == presented && !t.is_expired_at(now));
            if current {
                map.insert(next.user_id, next.clone());
            }
            Ok(current)
        }
    }

    const HOUR: u64 = 3600;
    const NOW: u64 = 1_700_000_000;

    fn rotator() -> RefreshTokenRotator<MapStore> {
        RefreshTokenRotator::new(MapStore::default(), HOUR).unwrap()
    }

    #[test]
    fn test_generated_token_shape() {
        let token = rotator().generate(1, NOW).unwrap();

        assert_eq!(token.user_id, 1);
        assert_eq!(token.expires_at, NOW + HOUR);
        let bytes = URL_SAFE_NO_PAD.decode(&token.token).unwrap();
        assert_eq!(bytes.len(), REFRESH_TOKEN_BYTES);
    }

    #[test]
    fn test_generated_tokens_are_unique() {
        let rotator = rotator();
        let a = rotator.generate(1, NOW).unwrap();
        let b = rotator.generate(1, NOW).unwrap();
        assert_ne!(a.token, b.token);
    }

    #[test]
    fn test_out_of_range_duration_rejected() {
        assert!(matches!(
            RefreshTokenRotator::new(MapStore::default(), 0),
            Err(SessionError::InvalidLifetime(0))
        ));
        assert!(matches!(
            RefreshTokenRotator::new(MapStore::default(), u64::MAX),
            Err(SessionError::InvalidLifetime(u64::MAX))
        ));
        assert!(
            RefreshTokenRotator::new(MapStore::default(), MAX_REFRESH_TOKEN_DURATION_SECS).is_ok()
        );
    }

    #[tokio::test]
    async fn test_expiry_overflow_stores_nothing() {
        let rotator = rotator();

        let result = rotator.issue_at(1, u64::MAX - 1).await;
        assert!(matches!(result, Err(SessionError::InvalidLifetime(HOUR))));
        assert!(rotator.store().0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_issue_then_validate() {
        let rotator = rotator();
        let token = rotator.issue_at(1, NOW).await.unwrap();

        assert!(rotator.validate_at(1, &token.token, NOW).await.unwrap());
        assert!(!rotator.validate_at(2, &token.token, NOW).await.unwrap());
        assert!(!rotator.validate_at(1, "something-else", NOW).await.unwrap());
    }

    #[tokio::test]
    async fn test_expiry_boundary() {
        let rotator = rotator();
        let token = rotator.issue_at(1, NOW).await.unwrap();

        assert!(rotator.validate_at(1, &token.token, NOW + HOUR).await.unwrap());
        assert!(!rotator.validate_at(1, &token.token, NOW + HOUR + 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_reissue_replaces_previous() {
        let rotator = rotator();
        let first = rotator.issue_at(1, NOW).await.unwrap();
        let second = rotator.issue_at(1, NOW + 10).await.unwrap();

        assert!(!rotator.validate_at(1, &first.token, NOW + 20).await.unwrap());
        assert!(rotator.validate_at(1, &second.token, NOW + 20).await.unwrap());
        assert_eq!(rotator.store().0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rotate_is_single_use() {
        let rotator = rotator();
        let original = rotator.issue_at(1, NOW).await.unwrap();

        let next = rotator.rotate_at(1, &original.token, NOW + 5).await.unwrap();
        assert_ne!(next.token, original.token);
        assert_eq!(next.expires_at, NOW + 5 + HOUR);

        let again = rotator.rotate_at(1, &original.token, NOW + 6).await;
        assert!(matches!(again, Err(SessionError::InvalidToken)));
        assert!(rotator.validate_at(1, &next.token, NOW + 6).await.unwrap());
    }

    #[tokio::test]
    async fn test_rotate_rejects_expired_and_unknown() {
        let rotator = rotator();
        let token = rotator.issue_at(1, NOW).await.unwrap();

        let expired = rotator.rotate_at(1, &token.token, NOW + HOUR + 1).await;
        assert!(matches!(expired, Err(SessionError::InvalidToken)));

        let unknown = rotator.rotate_at(99, &token.token, NOW).await;
        assert!(matches!(unknown, Err(SessionError::InvalidToken)));
    }
}
