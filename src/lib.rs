pub mod api;
pub mod auth;
pub mod cleanup;
pub mod cli;
pub mod db;
pub mod jwt;
pub mod pagination;
pub mod rate_limit;
pub mod session;

use api::{SessionService, create_api_router};
use axum::Router;
use db::Database;
use jwt::{JwtConfig, JwtError, JwtSettings};
use pagination::{DEFAULT_PAGE_SIZE, KeysetPaginator, MAX_PAGE_SIZE};
use rate_limit::{RateLimitConfig, RateLimitSettings};
use session::{RefreshTokenRotator, SessionError};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

pub struct ServerConfig {
    /// Database connection (cloneable, uses connection pool internally)
    pub db: Database,
    /// Access token signing and validation settings
    pub jwt: JwtSettings,
    /// Refresh token lifetime in seconds
    pub refresh_token_duration: u64,
    /// Page size when a listing request names none
    pub default_page_size: u32,
    /// Largest page a listing request may ask for
    pub max_page_size: u32,
    /// Per-IP limits on the authentication endpoints
    pub rate_limits: RateLimitSettings,
}

impl ServerConfig {
    /// Configuration with default lifetimes, page sizes and rate limits.
    pub fn new(db: Database, jwt: JwtSettings) -> Self {
        Self {
            db,
            jwt,
            refresh_token_duration: session::DEFAULT_REFRESH_TOKEN_DURATION_SECS,
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
            rate_limits: RateLimitSettings::default(),
        }
    }
}

/// Startup configuration rejected by [`create_app`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid signing configuration: {0}")]
    Jwt(#[from] JwtError),
    #[error("invalid session configuration: {0}")]
    Session(#[from] SessionError),
}

/// Create the application router with the given configuration.
///
/// Fails when the signing secret is too short or a token lifetime is out of range.
pub fn create_app(config: &ServerConfig) -> Result<Router, ConfigError> {
    let jwt = Arc::new(JwtConfig::new(&config.jwt)?);

    let rotator = RefreshTokenRotator::new(
        config.db.refresh_tokens(),
        config.refresh_token_duration,
    )?;
    let sessions: Arc<SessionService> = Arc::new(session::AuthSessionService::new(
        config.db.users(),
        jwt.clone(),
        rotator,
    ));

    let paginator = KeysetPaginator::new(config.default_page_size, config.max_page_size);
    let rate_limit_config = Arc::new(RateLimitConfig::new(&config.rate_limits));

    Ok(create_api_router(
        config.db.clone(),
        jwt,
        sessions,
        paginator,
        rate_limit_config,
    ))
}

/// Run cleanup tasks and spawn background scheduler.
/// Call this before starting the server.
pub async fn init_cleanup(db: &Database) {
    cleanup::run_cleanup(db).await;
    cleanup::spawn_cleanup_scheduler(db.clone());
}

/// Run the server on the given listener. This function blocks until the server exits.
/// Call `init_cleanup` before this to run cleanup on startup.
pub async fn run_server(app: Router, listener: TcpListener) -> Result<(), std::io::Error> {
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service).await
}

/// Error starting a background server.
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("failed to bind: {0}")]
    Bind(#[from] std::io::Error),
}

/// Start the server on the given port in a background task. Use port 0 to let the OS choose a random port.
/// Returns the actual address the server is listening on.
/// Note: For production use, prefer `run_server` directly in main.
pub async fn start_server(
    config: ServerConfig,
    port: u16,
) -> Result<(tokio::task::JoinHandle<()>, SocketAddr), StartError> {
    let app = create_app(&config)?;

    // Run cleanup tasks on startup
    init_cleanup(&config.db).await;

    let addr = format!("127.0.0.1:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        run_server(app, listener).await.ok();
    });

    Ok((handle, local_addr))
}
