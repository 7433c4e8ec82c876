//! Session error types.

use crate::jwt::JwtError;

/// Externally visible session failures.
///
/// Refresh failures all collapse into `InvalidToken`; the precise reason is
/// only logged.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("invalid token")]
    InvalidToken,
    #[error("storage unavailable")]
    Unavailable,
    #[error("failed to sign token: {0}")]
    Signing(#[from] JwtError),
    #[error("refresh token duration of {0}s is out of range")]
    InvalidLifetime(u64),
}
