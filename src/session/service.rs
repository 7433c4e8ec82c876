//! Login and refresh orchestration.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{
    IdentityProvider, RefreshStore, RefreshToken, RefreshTokenRotator, SessionError, UserIdentity,
};
use crate::jwt::{AccessTokenResult, JwtConfig, ValidationMode};

/// A freshly issued access/refresh token pair.
#[derive(Debug, Clone)]
pub struct Session {
    pub user: UserIdentity,
    pub access_token: AccessTokenResult,
    pub refresh_token: RefreshToken,
}

/// Stateless login/refresh service.
///
/// The access token is signed before the refresh record is written. Signing
/// is pure, so the only step that can leave a trace in storage is the final
/// write, and a pair is returned only when that write succeeded.
#[derive(Debug, Clone)]
pub struct AuthSessionService<I, S> {
    identity: I,
    jwt: Arc<JwtConfig>,
    rotator: RefreshTokenRotator<S>,
}

impl<I, S> AuthSessionService<I, S>
where
    I: IdentityProvider,
    S: RefreshStore,
{
    pub fn new(identity: I, jwt: Arc<JwtConfig>, rotator: RefreshTokenRotator<S>) -> Self {
        Self {
            identity,
            jwt,
            rotator,
        }
    }

    pub fn rotator(&self) -> &RefreshTokenRotator<S> {
        &self.rotator
    }

    /// Verify credentials and issue a new token pair.
    ///
    /// Any previous refresh token of the user stops working.
    pub async fn login(&self, username: &str, password: &str) -> Result<Session, SessionError> {
        let user = self
            .identity
            .verify_credentials(username, password)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to verify credentials");
                SessionError::Unavailable
            })?
            .ok_or_else(|| {
                info!(username, "Login rejected");
                SessionError::InvalidCredentials
            })?;

        let access_token = self.jwt.generate_access_token(&user)?;
        let refresh_token = self.rotator.issue(user.id).await?;

        info!(user_id = user.id, "Login succeeded");
        Ok(Session {
            user,
            access_token,
            refresh_token,
        })
    }

    /// Exchange an expired (or still valid) access token plus the matching
    /// refresh token for a new pair.
    pub async fn refresh(
        &self,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<Session, SessionError> {
        let claims = self
            .jwt
            .validate_access_token(access_token, ValidationMode::IgnoreExpiry)
            .map_err(|e| {
                warn!(error = %e, "Refresh rejected: access token invalid");
                SessionError::InvalidToken
            })?;

        let user_id = claims.user_id().ok_or_else(|| {
            warn!(sub = %claims.sub, "Refresh rejected: malformed subject");
            SessionError::InvalidToken
        })?;

        if !self.rotator.validate(user_id, refresh_token).await? {
            warn!(user_id, "Refresh rejected: refresh token not valid");
            return Err(SessionError::InvalidToken);
        }

        let user = self
            .identity
            .get_identity(user_id)
            .await
            .map_err(|e| {
                error!(user_id, error = %e, "Failed to load user");
                SessionError::Unavailable
            })?
            .ok_or_else(|| {
                warn!(user_id, "Refresh rejected: user no longer exists");
                SessionError::InvalidToken
            })?;

        let access_token = self.jwt.generate_access_token(&user)?;
        let refresh_token = self.rotator.rotate(user_id, refresh_token).await?;

        debug!(user_id, "Token pair rotated");
        Ok(Session {
            user,
            access_token,
            refresh_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwt::JwtSettings;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FixedIdentities(Vec<(UserIdentity, &'static str)>);

    impl IdentityProvider for FixedIdentities {
        type Error = std::convert::Infallible;

        async fn verify_credentials(
            &self,
            username: &str,
            password: &str,
        ) -> Result<Option<UserIdentity>, Self::Error> {
            Ok(self
                .0
                .iter()
                .find(|(user, pw)| user.username == username && *pw == password)
                .map(|(user, _)| user.clone()))
        }

        async fn get_identity(&self, user_id: i32) -> Result<Option<UserIdentity>, Self::Error> {
            Ok(self
                .0
                .iter()
                .find(|(user, _)| user.id == user_id)
                .map(|(user, _)| user.clone()))
        }
    }

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

    struct FailingStore;

    impl RefreshStore for FailingStore {
        type Error = &'static str;

        async fn get(&self, _user_id: i32) -> Result<Option<RefreshToken>, Self::Error> {
            Err("down")
        }

        async fn replace(&self, _token: &RefreshToken) -> Result<(), Self::Error> {
            Err("down")
        }

        async fn rotate(
            &self,
            _presented: &str,
            _now: u64,
            _next: &RefreshToken,
        ) -> Result<bool, Self::Error> {
            Err("down")
        }
    }

    fn jwt(secret: &[u8]) -> Arc<JwtConfig> {
        Arc::new(
            JwtConfig::new(&JwtSettings {
                secret: secret.to_vec(),
                issuer: "issuer".to_string(),
                audience: "audience".to_string(),
                access_token_duration: 300,
            })
            .unwrap(),
        )
    }

    fn identities() -> FixedIdentities {
        FixedIdentities(vec![(
            UserIdentity {
                id: 1,
                username: "alice".to_string(),
                roles: vec!["User".to_string()],
            },
            "password123",
        )])
    }

    fn service<S: RefreshStore>(store: S) -> AuthSessionService<FixedIdentities, S> {
        AuthSessionService::new(
            identities(),
            jwt(b"session-service-test-secret"),
            RefreshTokenRotator::new(store, 3600).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_login_issues_pair() {
        let service = service(MapStore::default());
        let session = service.login("alice", "password123").await.unwrap();

        assert_eq!(session.user.id, 1);
        assert_eq!(session.refresh_token.user_id, 1);
        let claims = service
            .jwt
            .validate_access_token(&session.access_token.token, ValidationMode::Strict)
            .unwrap();
        assert_eq!(claims.username, "alice");
    }

    #[tokio::test]
    async fn test_login_rejects_unknown_user_and_wrong_password_alike() {
        let service = service(MapStore::default());

        let wrong_password = service.login("alice", "nope").await;
        let unknown_user = service.login("mallory", "password123").await;

        assert!(matches!(wrong_password, Err(SessionError::InvalidCredentials)));
        assert!(matches!(unknown_user, Err(SessionError::InvalidCredentials)));
        assert!(service.rotator().store().0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_rotates_pair() {
        let service = service(MapStore::default());
        let first = service.login("alice", "password123").await.unwrap();

        let second = service
            .refresh(&first.access_token.token, &first.refresh_token.token)
            .await
            .unwrap();
        assert_ne!(second.refresh_token.token, first.refresh_token.token);

        // The old refresh value is spent
        let replay = service
            .refresh(&first.access_token.token, &first.refresh_token.token)
            .await;
        assert!(matches!(replay, Err(SessionError::InvalidToken)));

        // The new pair works
        service
            .refresh(&second.access_token.token, &second.refresh_token.token)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_second_login_invalidates_first_refresh_token() {
        let service = service(MapStore::default());
        let first = service.login("alice", "password123").await.unwrap();
        let _second = service.login("alice", "password123").await.unwrap();

        let result = service
            .refresh(&first.access_token.token, &first.refresh_token.token)
            .await;
        assert!(matches!(result, Err(SessionError::InvalidToken)));
    }

    #[tokio::test]
    async fn test_refresh_rejects_token_from_other_secret() {
        let service = service(MapStore::default());
        let session = service.login("alice", "password123").await.unwrap();

        let foreign = jwt(b"some-other-secret-value")
            .generate_access_token(&session.user)
            .unwrap();
        let result = service
            .refresh(&foreign.token, &session.refresh_token.token)
            .await;
        assert!(matches!(result, Err(SessionError::InvalidToken)));
    }

    #[tokio::test]
    async fn test_refresh_accepts_expired_access_token() {
        let service = service(MapStore::default());
        let session = service.login("alice", "password123").await.unwrap();

        let now = crate::jwt::now_secs().unwrap();
        let expired = service
            .jwt
            .generate_access_token_at(&session.user, now - 301)
            .unwrap();
        assert!(expired.expires_at < now);

        service
            .refresh(&expired.token, &session.refresh_token.token)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_refresh_rejects_mismatched_refresh_value() {
        let service = service(MapStore::default());
        let session = service.login("alice", "password123").await.unwrap();

        let result = service
            .refresh(&session.access_token.token, "not-the-refresh-token")
            .await;
        assert!(matches!(result, Err(SessionError::InvalidToken)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_refresh_single_winner() {
        let service = Arc::new(service(MapStore::default()));
        let session = service.login("alice", "password123").await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let service = service.clone();
            let access = session.access_token.token.clone();
            let refresh = session.refresh_token.token.clone();
            handles.push(tokio::spawn(async move {
                service.refresh(&access, &refresh).await
            }));
        }

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(e) => assert!(matches!(e, SessionError::InvalidToken)),
            }
        }
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn test_storage_failure_is_unavailable() {
        let service = service(FailingStore);
        let result = service.login("alice", "password123").await;
        assert!(matches!(result, Err(SessionError::Unavailable)));
    }
}
