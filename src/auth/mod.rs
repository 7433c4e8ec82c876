//! Bearer access-token authentication with role checks.
//!
//! Access tokens are stateless: a request is authenticated by the token's
//! signature and claims alone. Refreshing an expired token is an explicit
//! client call to `/auth/refreshToken`.

mod bearer;
mod errors;
mod extractors;
mod ip;
mod state;
mod types;

pub use bearer::bearer_token;
pub use errors::{AuthError, AuthErrorKind};
pub use extractors::{AdminOnly, Auth};
pub use ip::{HasHeadersAndExtensions, extract_client_ip};
pub use state::HasAuthBackend;
pub use types::AuthenticatedUser;
