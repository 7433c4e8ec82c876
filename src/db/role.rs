use sqlx::sqlite::SqlitePool;

use super::StoreError;
use crate::pagination::{Direction, Keyed, KeysetSource, Window};

/// Role every new account receives.
pub const USER_ROLE: &str = "User";

/// Role allowed to list roles and change grants.
pub const ADMIN_ROLE: &str = "Admin";

#[derive(Clone)]
pub struct RoleStore {
    pool: SqlitePool,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Role {
    pub id: i32,
    pub name: String,
    pub normalized_name: String,
}

impl Keyed for Role {
    fn key(&self) -> i32 {
        self.id
    }
}

impl RoleStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Look up a role by name (case-insensitive).
    pub async fn get_by_name(&self, name: &str) -> Result<Option<Role>, StoreError> {
        let role = sqlx::query_as(
            "SELECT id, name, normalized_name FROM roles WHERE normalized_name = ?",
        )
        .bind(name.to_uppercase())
        .fetch_optional(&self.pool)
        .await?;
        Ok(role)
    }
}

impl KeysetSource for RoleStore {
    type Item = Role;
    type Error = StoreError;

    async fn fetch(&self, window: Window) -> Result<Vec<Role>, StoreError> {
        let sql = match window.direction {
            Direction::Forward => {
                "SELECT id, name, normalized_name FROM roles
                 WHERE (?1 IS NULL OR id > ?1) ORDER BY id ASC LIMIT ?2"
            }
            Direction::Backward => {
                "SELECT id, name, normalized_name FROM roles
                 WHERE (?1 IS NULL OR id < ?1) ORDER BY id DESC LIMIT ?2"
            }
        };

        let roles = sqlx::query_as(sql)
            .bind(window.boundary)
            .bind(i64::from(window.limit))
            .fetch_all(&self.pool)
            .await?;
        Ok(roles)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM roles")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}
