//! Authentication user types.

use crate::jwt::AccessClaims;

/// Caller identity taken from a validated access token.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    /// JWT claims from the access token
    pub claims: AccessClaims,
    /// Database user ID parsed from the subject claim
    pub user_id: i32,
}

impl AuthenticatedUser {
    pub fn has_role(&self, role: &str) -> bool {
        self.claims.has_role(role)
    }
}
