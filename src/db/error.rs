//! Storage error type.

/// Errors returned by the database stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("password hashing failed: {0}")]
    PasswordHash(#[from] bcrypt::BcryptError),
    #[error("username is already taken")]
    UsernameTaken,
    #[error("unknown role: {0}")]
    UnknownRole(String),
}

impl StoreError {
    /// Map unique constraint violations on insert to `UsernameTaken`.
    pub(crate) fn from_insert(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => Self::UsernameTaken,
            _ => Self::Database(e),
        }
    }
}
