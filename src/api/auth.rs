//! Registration, login and token refresh.

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderValue, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::post,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::error::{ApiError, ResultExt};
use super::json::ApiJson;
use super::users::UserResponse;
use crate::db::{Database, NewUser, RefreshTokenStore, StoreError, UserStore};
use crate::rate_limit::{RateLimitConfig, rate_limit_login, rate_limit_refresh, rate_limit_register};
use crate::session::{AuthSessionService, Session, SessionError};

/// Session service over the SQLite stores.
pub type SessionService = AuthSessionService<UserStore, RefreshTokenStore>;

const USERNAME_MAX_LEN: usize = 32;
const PASSWORD_MIN_LEN: usize = 8;
/// bcrypt only reads the first 72 bytes
const PASSWORD_MAX_BYTES: usize = 72;
const NAME_MAX_LEN: usize = 255;
const EMAIL_MAX_LEN: usize = 255;

#[derive(Clone)]
pub struct AuthState {
    pub db: Database,
    pub sessions: Arc<SessionService>,
    pub rate_limit_config: Arc<RateLimitConfig>,
}

pub fn router(state: AuthState) -> Router {
    let register_router = Router::new()
        .route("/register", post(register))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            state.rate_limit_config.clone(),
            rate_limit_register,
        ));

    let login_router = Router::new()
        .route("/login", post(login))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            state.rate_limit_config.clone(),
            rate_limit_login,
        ));

    let refresh_router = Router::new()
        .route("/refreshToken", post(refresh_token))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            state.rate_limit_config,
            rate_limit_refresh,
        ));

    Router::new()
        .merge(register_router)
        .merge(login_router)
        .merge(refresh_router)
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RegisterRequest {
    username: String,
    password: String,
    first_name: String,
    last_name: String,
    email: Option<String>,
}

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest {
    #[serde(alias = "token")]
    expired_access_token: String,
    #[serde(alias = "refreshToken")]
    refresh_value: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    access_token: String,
    refresh_token: String,
    /// Access token expiration (Unix seconds)
    expires_at: u64,
    user: UserResponse,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenPairResponse {
    access_token: String,
    refresh_token: String,
    /// Access token expiration (Unix seconds)
    expires_at: u64,
}

impl From<Session> for TokenPairResponse {
    fn from(session: Session) -> Self {
        Self {
            access_token: session.access_token.token,
            refresh_token: session.refresh_token.token,
            expires_at: session.access_token.expires_at,
        }
    }
}

async fn register(
    State(state): State<AuthState>,
    ApiJson(payload): ApiJson<RegisterRequest>,
) -> Result<Response, ApiError> {
    let new_user = validate_registration(payload)?;

    let user = match state.db.users().create(&new_user).await {
        Ok(user) => user,
        Err(StoreError::UsernameTaken) => {
            return Err(ApiError::bad_request("Username is already taken"));
        }
        Err(e) => return Err(ApiError::db_error("Failed to create user", e)),
    };

    info!(user_id = user.id, username = %user.username, "User registered");

    let location = HeaderValue::from_str(&format!("/users/{}", user.id))
        .map_err(|_| ApiError::internal("Failed to build location header"))?;
    let mut response = (StatusCode::CREATED, Json(UserResponse::from(user))).into_response();
    response.headers_mut().insert(header::LOCATION, location);
    Ok(response)
}

async fn login(
    State(state): State<AuthState>,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let session = state
        .sessions
        .login(&payload.username, &payload.password)
        .await?;

    let user = state
        .db
        .users()
        .get_by_id(session.user.id)
        .await
        .db_err("Failed to load user")?
        .ok_or(SessionError::InvalidCredentials)?;

    Ok(Json(LoginResponse {
        access_token: session.access_token.token,
        refresh_token: session.refresh_token.token,
        expires_at: session.access_token.expires_at,
        user: user.into(),
    }))
}

async fn refresh_token(
    State(state): State<AuthState>,
    ApiJson(payload): ApiJson<RefreshRequest>,
) -> Result<Json<TokenPairResponse>, ApiError> {
    let session = state
        .sessions
        .refresh(&payload.expired_access_token, &payload.refresh_value)
        .await?;
    Ok(Json(session.into()))
}

/// Check registration input, collecting every problem found.
fn validate_registration(payload: RegisterRequest) -> Result<NewUser, ApiError> {
    let mut errors = Vec::new();

    let username_len = payload.username.chars().count();
    if username_len == 0 || username_len > USERNAME_MAX_LEN {
        errors.push(format!(
            "Username must be between 1 and {} characters",
            USERNAME_MAX_LEN
        ));
    }
    if !payload
        .username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        errors.push("Username can only contain letters, numbers, and underscores".to_string());
    }

    if payload.password.chars().count() < PASSWORD_MIN_LEN {
        errors.push(format!(
            "Password must be at least {} characters",
            PASSWORD_MIN_LEN
        ));
    }
    if payload.password.len() > PASSWORD_MAX_BYTES {
        errors.push(format!(
            "Password cannot be longer than {} bytes",
            PASSWORD_MAX_BYTES
        ));
    }

    for (field, value) in [
        ("First name", &payload.first_name),
        ("Last name", &payload.last_name),
    ] {
        if value.trim().is_empty() {
            errors.push(format!("{} is required", field));
        } else if value.chars().count() > NAME_MAX_LEN {
            errors.push(format!(
                "{} cannot be longer than {} characters",
                field, NAME_MAX_LEN
            ));
        }
    }

    let email = payload
        .email
        .map(|email| email.trim().to_string())
        .filter(|email| !email.is_empty());
    if email
        .as_ref()
        .is_some_and(|email| email.chars().count() > EMAIL_MAX_LEN)
    {
        errors.push(format!(
            "Email cannot be longer than {} characters",
            EMAIL_MAX_LEN
        ));
    }

    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }

    Ok(NewUser {
        username: payload.username,
        password: payload.password,
        first_name: payload.first_name.trim().to_string(),
        last_name: payload.last_name.trim().to_string(),
        email,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> RegisterRequest {
        RegisterRequest {
            username: "alice_1".to_string(),
            password: "password123".to_string(),
            first_name: " Alice ".to_string(),
            last_name: "Smith".to_string(),
            email: Some(String::new()),
        }
    }

    fn errors(payload: RegisterRequest) -> Vec<String> {
        match validate_registration(payload) {
            Err(ApiError::Validation(errors)) => errors,
            other => panic!("expected validation errors, got {:?}", other.map(|u| u.username)),
        }
    }

    #[test]
    fn test_valid_registration_is_normalized() {
        let user = validate_registration(request()).unwrap();
        assert_eq!(user.first_name, "Alice");
        assert_eq!(user.email, None);
    }

    #[test]
    fn test_username_rules() {
        let mut payload = request();
        payload.username = "a".repeat(33);
        assert_eq!(errors(payload).len(), 1);

        let mut payload = request();
        payload.username = "bad name".to_string();
        assert_eq!(errors(payload).len(), 1);

        let mut payload = request();
        payload.username = String::new();
        assert_eq!(errors(payload).len(), 1);
    }

    #[test]
    fn test_password_bounds() {
        let mut payload = request();
        payload.password = "short".to_string();
        assert_eq!(errors(payload).len(), 1);

        let mut payload = request();
        payload.password = "x".repeat(73);
        assert_eq!(errors(payload).len(), 1);

        let mut payload = request();
        payload.password = "x".repeat(72);
        assert!(validate_registration(payload).is_ok());
    }

    #[test]
    fn test_all_errors_are_reported() {
        let payload = RegisterRequest {
            username: "no spaces allowed".to_string(),
            password: "short".to_string(),
            first_name: "  ".to_string(),
            last_name: "x".repeat(256),
            email: Some("e".repeat(256)),
        };
        assert_eq!(errors(payload).len(), 5);
    }
}
