//! Axum extractors for authentication.

use axum::{extract::FromRequestParts, http::request::Parts};
use tracing::debug;

use super::bearer::bearer_token;
use super::errors::{AuthError, AuthErrorKind};
use super::state::HasAuthBackend;
use super::types::AuthenticatedUser;
use crate::db::ADMIN_ROLE;
use crate::jwt::ValidationMode;

/// Validate the bearer access token of a request.
fn authenticate_request<S>(parts: &Parts, state: &S) -> Result<AuthenticatedUser, AuthErrorKind>
where
    S: HasAuthBackend,
{
    let token = bearer_token(&parts.headers).ok_or(AuthErrorKind::NotAuthenticated)?;

    let claims = state
        .jwt()
        .validate_access_token(token, ValidationMode::Strict)
        .map_err(|e| {
            debug!(error = %e, "Access token rejected");
            AuthErrorKind::InvalidToken
        })?;

    let user_id = claims.user_id().ok_or_else(|| {
        debug!(sub = %claims.sub, "Access token subject is not a user id");
        AuthErrorKind::InvalidToken
    })?;

    Ok(AuthenticatedUser { claims, user_id })
}

/// Extractor for endpoints that require a valid access token.
pub struct Auth(pub AuthenticatedUser);

impl<S> FromRequestParts<S> for Auth
where
    S: HasAuthBackend + Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        authenticate_request(parts, state)
            .map(Auth)
            .map_err(AuthError::from)
    }
}

/// Extractor for endpoints that require the Admin role.
/// Authenticated callers without the role get 403.
pub struct AdminOnly(pub AuthenticatedUser);

impl<S> FromRequestParts<S> for AdminOnly
where
    S: HasAuthBackend + Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = authenticate_request(parts, state)?;
        if !user.has_role(ADMIN_ROLE) {
            debug!(user_id = user.user_id, "Admin role required");
            return Err(AuthError::new(AuthErrorKind::InsufficientRole));
        }
        Ok(AdminOnly(user))
    }
}
