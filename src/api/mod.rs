mod auth;
mod error;
mod json;
mod page;
mod users;

use axum::Router;
use std::sync::Arc;

use crate::db::Database;
use crate::jwt::JwtConfig;
use crate::pagination::KeysetPaginator;
use crate::rate_limit::RateLimitConfig;

pub use auth::{AuthState, SessionService};
pub use error::{ApiError, ResultExt};
pub use json::ApiJson;
pub use page::PageResponse;
pub use users::{UserResponse, UsersState};

/// Create the API router.
pub fn create_api_router(
    db: Database,
    jwt: Arc<JwtConfig>,
    sessions: Arc<SessionService>,
    paginator: KeysetPaginator,
    rate_limit_config: Arc<RateLimitConfig>,
) -> Router {
    let auth_state = auth::AuthState {
        db: db.clone(),
        sessions,
        rate_limit_config,
    };

    let users_state = users::UsersState { db, jwt, paginator };

    Router::new()
        .nest("/auth", auth::router(auth_state))
        .nest("/users", users::router(users_state))
}
