use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::error::{ApiError, ResultExt};
use super::json::ApiJson;
use super::page::PageResponse;
use crate::auth::{AdminOnly, Auth};
use crate::db::{Database, Role, User};
use crate::impl_has_auth_backend;
use crate::jwt::JwtConfig;
use crate::pagination::{CursorPaginationParameters, KeysetPaginator};

#[derive(Clone)]
pub struct UsersState {
    pub db: Database,
    pub jwt: Arc<JwtConfig>,
    pub paginator: KeysetPaginator,
}

impl_has_auth_backend!(UsersState);

pub fn router(state: UsersState) -> Router {
    Router::new()
        .route("/", get(list_users))
        .route("/roles", get(list_roles))
        .route("/{id}", get(get_user))
        .route("/{id}/roles", post(add_roles).delete(remove_roles))
        .with_state(state)
}

/// Public user representation. Never carries the password hash.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: i32,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub created: String,
    pub roles: Vec<String>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            first_name: user.first_name,
            last_name: user.last_name,
            email: user.email,
            created: user.created_at,
            roles: user.roles,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RoleResponse {
    id: i32,
    name: String,
    normalized_name: String,
}

impl From<Role> for RoleResponse {
    fn from(role: Role) -> Self {
        Self {
            id: role.id,
            name: role.name,
            normalized_name: role.normalized_name,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoleNamesRequest {
    role_names: Vec<String>,
}

async fn list_users(
    State(state): State<UsersState>,
    Auth(_user): Auth,
    Query(params): Query<CursorPaginationParameters>,
) -> Result<Json<PageResponse<UserResponse>>, ApiError> {
    let page = state.paginator.page(&state.db.users(), &params).await?;
    Ok(Json(PageResponse::from_page(page, UserResponse::from)))
}

async fn get_user(
    State(state): State<UsersState>,
    Auth(_user): Auth,
    Path(id): Path<i32>,
) -> Result<Json<UserResponse>, ApiError> {
    load_user(&state.db, id).await
}

async fn list_roles(
    State(state): State<UsersState>,
    AdminOnly(_admin): AdminOnly,
    Query(params): Query<CursorPaginationParameters>,
) -> Result<Json<PageResponse<RoleResponse>>, ApiError> {
    let page = state.paginator.page(&state.db.roles(), &params).await?;
    Ok(Json(PageResponse::from_page(page, RoleResponse::from)))
}

async fn add_roles(
    State(state): State<UsersState>,
    AdminOnly(admin): AdminOnly,
    Path(id): Path<i32>,
    ApiJson(payload): ApiJson<RoleNamesRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let role_names = validate_role_names(payload.role_names)?;
    ensure_user_exists(&state.db, id).await?;
    ensure_roles_exist(&state.db, &role_names).await?;

    let added = state
        .db
        .users()
        .add_roles(id, &role_names)
        .await
        .db_err("Failed to add roles")?;
    info!(user_id = id, admin_id = admin.user_id, added, "Roles added");

    load_user(&state.db, id).await
}

async fn remove_roles(
    State(state): State<UsersState>,
    AdminOnly(admin): AdminOnly,
    Path(id): Path<i32>,
    ApiJson(payload): ApiJson<RoleNamesRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let role_names = validate_role_names(payload.role_names)?;
    ensure_user_exists(&state.db, id).await?;
    ensure_roles_exist(&state.db, &role_names).await?;

    let removed = state
        .db
        .users()
        .remove_roles(id, &role_names)
        .await
        .db_err("Failed to remove roles")?;
    info!(user_id = id, admin_id = admin.user_id, removed, "Roles removed");

    load_user(&state.db, id).await
}

fn validate_role_names(role_names: Vec<String>) -> Result<Vec<String>, ApiError> {
    let role_names: Vec<String> = role_names
        .into_iter()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect();

    if role_names.is_empty() {
        return Err(ApiError::bad_request("At least one role name is required"));
    }
    Ok(role_names)
}

async fn ensure_roles_exist(db: &Database, role_names: &[String]) -> Result<(), ApiError> {
    let mut unknown = Vec::new();
    for name in role_names {
        let role = db
            .roles()
            .get_by_name(name)
            .await
            .db_err("Failed to look up role")?;
        if role.is_none() {
            unknown.push(format!("Unknown role: {}", name));
        }
    }

    if unknown.is_empty() {
        Ok(())
    } else {
        Err(ApiError::Validation(unknown))
    }
}

async fn ensure_user_exists(db: &Database, id: i32) -> Result<(), ApiError> {
    load_user(db, id).await.map(|_| ())
}

async fn load_user(db: &Database, id: i32) -> Result<Json<UserResponse>, ApiError> {
    let user = db
        .users()
        .get_by_id(id)
        .await
        .db_err("Failed to get user")?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    Ok(Json(user.into()))
}
