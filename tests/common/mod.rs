#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    extract::ConnectInfo,
    http::{HeaderMap, Method, Request, StatusCode, header},
};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tower::ServiceExt;
use userbase::{
    ServerConfig, create_app,
    db::{ADMIN_ROLE, Database},
    jwt::{DEFAULT_ACCESS_TOKEN_DURATION_SECS, JwtSettings},
};

pub const TEST_SECRET: &[u8] = b"integration-test-secret-value";
pub const TEST_ISSUER: &str = "userbase-tests";
pub const TEST_AUDIENCE: &str = "userbase-clients";
pub const TEST_PASSWORD: &str = "password123";

#[derive(Clone)]
pub struct TestApp {
    pub app: Router,
    pub db: Database,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

pub fn jwt_settings() -> JwtSettings {
    JwtSettings {
        secret: TEST_SECRET.to_vec(),
        issuer: TEST_ISSUER.to_string(),
        audience: TEST_AUDIENCE.to_string(),
        access_token_duration: DEFAULT_ACCESS_TOKEN_DURATION_SECS,
    }
}

/// Build an app over a fresh in-memory database with generous rate limits.
pub async fn create_test_app() -> TestApp {
    create_test_app_with(|_| {}).await
}

pub async fn create_test_app_with(customize: impl FnOnce(&mut ServerConfig)) -> TestApp {
    create_test_app_on(":memory:", customize).await
}

/// Build an app over a database file. See [`TempDatabase`].
pub async fn create_file_test_app(db: &TempDatabase) -> TestApp {
    let path = db.path.to_str().expect("Non UTF-8 temp path");
    create_test_app_on(path, |_| {}).await
}

async fn create_test_app_on(path: &str, customize: impl FnOnce(&mut ServerConfig)) -> TestApp {
    let db = Database::open(path)
        .await
        .expect("Failed to open test database")
        .with_password_cost(4);

    let mut config = ServerConfig::new(db.clone(), jwt_settings());
    config.rate_limits.login_per_minute = 1000;
    config.rate_limits.register_per_minute = 1000;
    config.rate_limits.refresh_per_minute = 1000;
    customize(&mut config);

    let app = create_app(&config).expect("Failed to create app");
    TestApp { app, db }
}

/// A database file in the temp directory, removed on drop.
pub struct TempDatabase {
    path: PathBuf,
}

impl TempDatabase {
    pub fn new(name: &str) -> Self {
        let path = std::env::temp_dir().join(format!("userbase-{}-{}.db", name, std::process::id()));
        remove_database_files(&path);
        Self { path }
    }
}

impl Drop for TempDatabase {
    fn drop(&mut self) {
        remove_database_files(&self.path);
    }
}

fn remove_database_files(path: &Path) {
    for suffix in ["", "-wal", "-shm", "-journal"] {
        let mut file = path.as_os_str().to_owned();
        file.push(suffix);
        let _ = std::fs::remove_file(file);
    }
}

impl TestApp {
    /// Send a request from 127.0.0.1 with an optional JSON body and bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> TestResponse {
        self.request_from("127.0.0.1:40000", method, uri, body, token)
            .await
    }

    pub async fn request_from(
        &self,
        peer: &str,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> TestResponse {
        let peer: SocketAddr = peer.parse().expect("Invalid peer address");
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .extension(ConnectInfo(peer));
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };

        let response = self
            .app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn register(&self, username: &str) -> TestResponse {
        self.request(
            Method::POST,
            "/auth/register",
            Some(json!({
                "username": username,
                "password": TEST_PASSWORD,
                "firstName": "Test",
                "lastName": "User",
                "email": format!("{}@example.com", username),
            })),
            None,
        )
        .await
    }

    pub async fn login(&self, username: &str, password: &str) -> TestResponse {
        self.request(
            Method::POST,
            "/auth/login",
            Some(json!({ "username": username, "password": password })),
            None,
        )
        .await
    }

    pub async fn refresh(&self, access_token: &str, refresh_token: &str) -> TestResponse {
        self.request(
            Method::POST,
            "/auth/refreshToken",
            Some(json!({
                "expiredAccessToken": access_token,
                "refreshValue": refresh_token,
            })),
            None,
        )
        .await
    }

    /// Register a user and log in. Returns the login response body.
    pub async fn register_and_login(&self, username: &str) -> Value {
        let registered = self.register(username).await;
        assert_eq!(registered.status, StatusCode::CREATED, "{}", registered.body);
        let login = self.login(username, TEST_PASSWORD).await;
        assert_eq!(login.status, StatusCode::OK, "{}", login.body);
        login.body
    }

    /// Register a user, grant the Admin role directly and log in.
    pub async fn register_admin(&self, username: &str) -> Value {
        let registered = self.register(username).await;
        assert_eq!(registered.status, StatusCode::CREATED, "{}", registered.body);
        let id = registered.body["id"].as_i64().unwrap() as i32;
        self.db
            .users()
            .add_roles(id, &[ADMIN_ROLE.to_string()])
            .await
            .unwrap();
        let login = self.login(username, TEST_PASSWORD).await;
        assert_eq!(login.status, StatusCode::OK, "{}", login.body);
        login.body
    }
}

pub fn token(login_body: &Value) -> &str {
    login_body["accessToken"].as_str().unwrap()
}

pub fn refresh_token(login_body: &Value) -> &str {
    login_body["refreshToken"].as_str().unwrap()
}
