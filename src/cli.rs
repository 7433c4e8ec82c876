//! CLI argument parsing, validation, and startup helpers.

use crate::ServerConfig;
use crate::db::{ADMIN_ROLE, Database, NewUser, USER_ROLE};
use crate::jwt::{JwtSettings, MIN_SECRET_LENGTH};
use crate::rate_limit::RateLimitSettings;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use clap::Parser;
use rand::RngCore;
use tracing::{error, info};

/// Random bytes in a generated admin password (24 characters once encoded)
const ADMIN_PASSWORD_BYTES: usize = 18;

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "userbase",
    about = "User accounts with JWT sessions and cursor-paginated listings"
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "7291")]
    pub port: u16,

    /// Path to SQLite database file
    #[arg(short, long, default_value = "userbase.db")]
    pub database: String,

    /// Path to file containing JWT secret. Prefer using JWT_SECRET env var instead
    #[arg(long)]
    pub jwt_secret_file: Option<String>,

    /// Issuer claim of access tokens
    #[arg(long, env = "TOKEN_ISSUER", default_value = "userbase")]
    pub token_issuer: String,

    /// Audience claim of access tokens
    #[arg(long, env = "TOKEN_AUDIENCE", default_value = "userbase")]
    pub token_audience: String,

    /// Access token lifetime in minutes (at most one day)
    #[arg(long, default_value = "5", value_parser = clap::value_parser!(u64).range(1..=1440))]
    pub access_token_minutes: u64,

    /// Refresh token lifetime in minutes (at most 365 days)
    #[arg(long, default_value = "20160", value_parser = clap::value_parser!(u64).range(1..=525600))]
    pub refresh_token_minutes: u64,

    /// Rate limit by the first X-Forwarded-For entry (only behind a trusted proxy)
    #[arg(long)]
    pub trust_forwarded_for: bool,

    /// Create an admin user with this name and print its generated password
    #[arg(long, value_parser = validate_username)]
    pub create_admin: Option<String>,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,
}

fn validate_username(s: &str) -> Result<String, String> {
    if s.is_empty() || s.chars().count() > 32 {
        return Err("Username must be between 1 and 32 characters".to_string());
    }

    if !s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(format!(
            "Username can only contain letters, numbers, and underscores: {}",
            s
        ));
    }

    Ok(s.to_string())
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Load JWT secret from environment variable or file.
/// Returns None and logs an error if the secret cannot be loaded.
pub fn load_jwt_secret(jwt_secret_file: Option<&str>) -> Option<String> {
    let secret = if let Ok(secret) = std::env::var("JWT_SECRET") {
        // Clear the environment variable to prevent leaking
        // SAFETY: We're single-threaded at this point during startup,
        // and no other code is reading this environment variable.
        unsafe { std::env::remove_var("JWT_SECRET") };
        secret
    } else if let Some(path) = jwt_secret_file {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read JWT secret file");
                return None;
            }
        }
    } else {
        error!(
            "JWT secret is required. Set JWT_SECRET environment variable (recommended) or use --jwt-secret-file"
        );
        return None;
    };

    if secret.len() < MIN_SECRET_LENGTH {
        error!(
            "JWT secret is shorter than {} bytes. Use a longer secret",
            MIN_SECRET_LENGTH
        );
        return None;
    }

    Some(secret)
}

fn generate_password() -> String {
    let mut bytes = [0u8; ADMIN_PASSWORD_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Handle the --create-admin flag: create an admin account with a generated password.
/// Returns false and logs an error if the account could not be created.
pub async fn handle_create_admin(db: &Database, username: &str) -> bool {
    let password = generate_password();
    let new_user = NewUser {
        username: username.to_string(),
        password: password.clone(),
        first_name: "Admin".to_string(),
        last_name: "Admin".to_string(),
        email: None,
    };

    let user = match db
        .users()
        .create_with_roles(&new_user, &[USER_ROLE, ADMIN_ROLE])
        .await
    {
        Ok(user) => user,
        Err(e) => {
            error!(username, error = %e, "Failed to create admin user");
            return false;
        }
    };

    println!();
    println!("Admin user created: {}", user.username);
    println!("Password: {}", password);
    println!();
    true
}

/// Build ServerConfig from validated arguments.
pub fn build_config(args: &Args, db: Database, jwt_secret: String) -> ServerConfig {
    let jwt = JwtSettings {
        secret: jwt_secret.into_bytes(),
        issuer: args.token_issuer.clone(),
        audience: args.token_audience.clone(),
        access_token_duration: args.access_token_minutes.saturating_mul(60),
    };

    let mut config = ServerConfig::new(db, jwt);
    config.refresh_token_duration = args.refresh_token_minutes.saturating_mul(60);
    config.rate_limits = RateLimitSettings {
        trust_forwarded_for: args.trust_forwarded_for,
        ..RateLimitSettings::default()
    };
    config
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}
