use std::sync::{Arc, OnceLock};

use sqlx::sqlite::SqlitePool;

use super::StoreError;
use super::role::USER_ROLE;
use crate::pagination::{Direction, Keyed, KeysetSource, Window};
use crate::session::{IdentityProvider, UserIdentity};

/// Expands to a static SELECT over `users u` with the user's role names
/// aggregated into a comma separated `roles` column.
macro_rules! select_users {
    ($tail:literal) => {
        concat!(
            "SELECT u.id, u.username, u.first_name, u.last_name, u.email, u.created_at, ",
            "(SELECT GROUP_CONCAT(r.name) FROM user_roles ur JOIN roles r ON r.id = ur.role_id ",
            "WHERE ur.user_id = u.id) AS roles ",
            "FROM users u ",
            $tail
        )
    };
}

/// Password hashed into the stand-in hash for unknown usernames.
const DUMMY_PASSWORD: &str = "userbase-dummy-password";

#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
    password_cost: u32,
    dummy_hash: Arc<OnceLock<String>>,
}

/// Registration input. The password is hashed before it reaches the database.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub created_at: String,
    /// Role names, sorted
    pub roles: Vec<String>,
}

impl User {
    pub fn identity(&self) -> UserIdentity {
        UserIdentity {
            id: self.id,
            username: self.username.clone(),
            roles: self.roles.clone(),
        }
    }
}

impl Keyed for User {
    fn key(&self) -> i32 {
        self.id
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i32,
    username: String,
    first_name: String,
    last_name: String,
    email: Option<String>,
    created_at: String,
    roles: Option<String>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        let mut roles: Vec<String> = row
            .roles
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        roles.sort();

        Self {
            id: row.id,
            username: row.username,
            first_name: row.first_name,
            last_name: row.last_name,
            email: row.email,
            created_at: row.created_at,
            roles,
        }
    }
}

impl UserStore {
    pub fn new(pool: SqlitePool, password_cost: u32, dummy_hash: Arc<OnceLock<String>>) -> Self {
        Self {
            pool,
            password_cost,
            dummy_hash,
        }
    }

    /// Create a user holding the default role. Returns the stored user.
    pub async fn create(&self, new_user: &NewUser) -> Result<User, StoreError> {
        self.create_with_roles(new_user, &[USER_ROLE]).await
    }

    /// Create a user holding exactly the given roles, in one transaction.
    /// An unknown role name fails with `UnknownRole` and nothing is stored.
    pub async fn create_with_roles(
        &self,
        new_user: &NewUser,
        role_names: &[&str],
    ) -> Result<User, StoreError> {
        let password_hash = bcrypt::hash(&new_user.password, self.password_cost)?;

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "INSERT INTO users (username, password_hash, first_name, last_name, email)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&new_user.username)
        .bind(&password_hash)
        .bind(&new_user.first_name)
        .bind(&new_user.last_name)
        .bind(&new_user.email)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::from_insert)?;
        let id = result.last_insert_rowid();

        for name in role_names {
            let granted = sqlx::query(
                "INSERT OR IGNORE INTO user_roles (user_id, role_id)
                 SELECT ?, id FROM roles WHERE normalized_name = ?",
            )
            .bind(id)
            .bind(name.to_uppercase())
            .execute(&mut *tx)
            .await?;

            // Dropping the transaction rolls the user insert back
            if granted.rows_affected() == 0 && !self.role_exists(&mut tx, name).await? {
                return Err(StoreError::UnknownRole(name.to_string()));
            }
        }

        let row: UserRow = sqlx::query_as(select_users!("WHERE u.id = ?"))
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(User::from(row))
    }

    async fn role_exists(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        name: &str,
    ) -> Result<bool, StoreError> {
        let row: Option<(i32,)> = sqlx::query_as("SELECT id FROM roles WHERE normalized_name = ?")
            .bind(name.to_uppercase())
            .fetch_optional(&mut **tx)
            .await?;
        Ok(row.is_some())
    }

    /// Get a user by ID.
    pub async fn get_by_id(&self, id: i32) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> = sqlx::query_as(select_users!("WHERE u.id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(User::from))
    }

    /// Get a user by username (case-insensitive).
    pub async fn get_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> = sqlx::query_as(select_users!("WHERE u.username = ?"))
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(User::from))
    }

    /// Check a username/password pair.
    pub async fn verify_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<UserIdentity>, StoreError> {
        let row: Option<(i32, String)> =
            sqlx::query_as("SELECT id, password_hash FROM users WHERE username = ?")
                .bind(username)
                .fetch_optional(&self.pool)
                .await?;

        let Some((id, password_hash)) = row else {
            // Unknown usernames pay for one bcrypt check like known ones
            let dummy = self.dummy_hash()?;
            let _ = bcrypt::verify(password, dummy);
            return Ok(None);
        };

        // A malformed stored hash counts as a mismatch
        if !bcrypt::verify(password, &password_hash).unwrap_or(false) {
            return Ok(None);
        }

        Ok(self.get_by_id(id).await?.map(|user| user.identity()))
    }

    /// Grant roles by name (case-insensitive). Unknown role names and roles
    /// the user already holds are skipped. Returns the number of grants added.
    pub async fn add_roles(&self, user_id: i32, role_names: &[String]) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut added = 0;

        for name in role_names {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO user_roles (user_id, role_id)
                 SELECT ?, id FROM roles WHERE normalized_name = ?",
            )
            .bind(user_id)
            .bind(name.to_uppercase())
            .execute(&mut *tx)
            .await?;
            added += result.rows_affected();
        }

        tx.commit().await?;
        Ok(added)
    }

    /// Revoke roles by name (case-insensitive). Returns the number of grants removed.
    pub async fn remove_roles(
        &self,
        user_id: i32,
        role_names: &[String],
    ) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;

        for name in role_names {
            let result = sqlx::query(
                "DELETE FROM user_roles WHERE user_id = ?
                 AND role_id = (SELECT id FROM roles WHERE normalized_name = ?)",
            )
            .bind(user_id)
            .bind(name.to_uppercase())
            .execute(&mut *tx)
            .await?;
            removed += result.rows_affected();
        }

        tx.commit().await?;
        Ok(removed)
    }

    /// Hash of a fixed password at the configured cost, computed on first use.
    fn dummy_hash(&self) -> Result<&str, StoreError> {
        if let Some(hash) = self.dummy_hash.get() {
            return Ok(hash);
        }
        let hash = bcrypt::hash(DUMMY_PASSWORD, self.password_cost)?;
        Ok(self.dummy_hash.get_or_init(|| hash))
    }

    /// Delete a user. Role grants and the refresh token go with it.
    ///
    /// No route exposes this. It exists for seeding and maintenance tooling
    /// and for tests that need an account to vanish mid-session.
    pub async fn delete(&self, id: i32) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

impl KeysetSource for UserStore {
    type Item = User;
    type Error = StoreError;

    async fn fetch(&self, window: Window) -> Result<Vec<User>, StoreError> {
        let sql = match window.direction {
            Direction::Forward => {
                select_users!("WHERE (?1 IS NULL OR u.id > ?1) ORDER BY u.id ASC LIMIT ?2")
            }
            Direction::Backward => {
                select_users!("WHERE (?1 IS NULL OR u.id < ?1) ORDER BY u.id DESC LIMIT ?2")
            }
        };

        let rows: Vec<UserRow> = sqlx::query_as(sql)
            .bind(window.boundary)
            .bind(i64::from(window.limit))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(User::from).collect())
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}

impl IdentityProvider for UserStore {
    type Error = StoreError;

    async fn verify_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<UserIdentity>, StoreError> {
        UserStore::verify_credentials(self, username, password).await
    }

    async fn get_identity(&self, user_id: i32) -> Result<Option<UserIdentity>, StoreError> {
        Ok(self.get_by_id(user_id).await?.map(|user| user.identity()))
    }
}
