//! Refresh token storage.
//!
//! One row per user. Access tokens are stateless and never stored.

use sqlx::sqlite::SqlitePool;

use super::StoreError;
use crate::session::{RefreshStore, RefreshToken};

/// Store for the single refresh token each user may hold.
#[derive(Clone)]
pub struct RefreshTokenStore {
    pool: SqlitePool,
}

impl RefreshTokenStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Delete tokens that expired before `now`. Returns the number removed.
    pub async fn delete_expired(&self, now: u64) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < ?")
            .bind(to_db_time(now))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

impl RefreshStore for RefreshTokenStore {
    type Error = StoreError;

    async fn get(&self, user_id: i32) -> Result<Option<RefreshToken>, StoreError> {
        let row: Option<(i32, String, i64)> = sqlx::query_as(
            "SELECT user_id, token, expires_at FROM refresh_tokens WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(user_id, token, expires_at)| RefreshToken {
            user_id,
            token,
            expires_at: expires_at.max(0) as u64,
        }))
    }

    async fn replace(&self, token: &RefreshToken) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO refresh_tokens (user_id, token, expires_at) VALUES (?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET token = excluded.token, expires_at = excluded.expires_at",
        )
        .bind(token.user_id)
        .bind(&token.token)
        .bind(to_db_time(token.expires_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn rotate(
        &self,
        presented: &str,
        now: u64,
        next: &RefreshToken,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET token = ?, expires_at = ?
             WHERE user_id = ? AND token = ? AND expires_at >= ?",
        )
        .bind(&next.token)
        .bind(to_db_time(next.expires_at))
        .bind(next.user_id)
        .bind(presented)
        .bind(to_db_time(now))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

/// SQLite integers are signed; clamp timestamps past `i64::MAX`.
fn to_db_time(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX)
}
