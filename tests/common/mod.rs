//! Shared test helpers for integration tests.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use saltleads::config::Config;
use saltleads::dashboard::{build_router, AppState};
use saltleads::ledger::MemoryLedger;
use saltleads::notify::RecordingNotifier;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tower::ServiceExt;

pub const TEST_JWT_SECRET: &str = "integration-test-secret";
pub const TEST_EMPLOYEE_CODE: &str = "SALT-2026";

/// Returns the test database URL from the `TEST_DATABASE_URL` environment variable.
/// Panics if the variable is not set.
pub fn test_db_url() -> String {
    std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set for integration tests")
}

/// Returns true if the test database URL is configured.
pub fn has_test_db() -> bool {
    std::env::var("TEST_DATABASE_URL").is_ok()
}

static SCHEMA_INIT: OnceCell<()> = OnceCell::const_new();

/// Run migrations once per test binary.
pub async fn ensure_schema() {
    SCHEMA_INIT
        .get_or_init(|| async {
            let db = saltleads::db::Database::connect(&test_db_url())
                .await
                .unwrap();
            db.migrate().await.unwrap();
        })
        .await;
}

/// Connect to the test database with every table emptied.
pub async fn setup_test_db() -> saltleads::db::Database {
    ensure_schema().await;
    let db = saltleads::db::Database::connect(&test_db_url())
        .await
        .expect("Failed to connect to test database");
    truncate_all_tables(db.pool()).await;
    db
}

pub async fn truncate_all_tables(pool: &sqlx::PgPool) {
    sqlx::raw_sql(
        "TRUNCATE TABLE chat_messages, chats, questions, price_estimates,
                       edit_history, contact_forms, service_requests, outbox, users
         RESTART IDENTITY CASCADE",
    )
    .execute(pool)
    .await
    .unwrap();
}

pub fn test_config() -> Config {
    let mut config = Config::new(TEST_JWT_SECRET);
    config.employee_code = Some(TEST_EMPLOYEE_CODE.to_string());
    config.admin_emails = vec!["ops@example.com".to_string()];
    config
}

/// Router plus handles on the in-memory sinks so tests can drain the
/// outbox and look at what was mirrored or mailed.
pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub ledger: Arc<MemoryLedger>,
    pub notifier: Arc<RecordingNotifier>,
}

impl TestApp {
    pub async fn new() -> Self {
        let db = setup_test_db().await;
        let ledger = Arc::new(MemoryLedger::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let state = AppState::new(db, test_config(), ledger.clone(), notifier.clone());
        TestApp {
            router: build_router(state.clone()),
            state,
            ledger,
            notifier,
        }
    }

    pub async fn call(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().uri(uri).method(method);
        if let Some(t) = token {
            builder = builder.header("authorization", format!("Bearer {}", t));
        }
        let body = match body {
            Some(v) => {
                builder = builder.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::json!(null));
        (status, json)
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, serde_json::Value) {
        self.call("GET", uri, token, None).await
    }

    pub async fn post(
        &self,
        uri: &str,
        token: Option<&str>,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        self.call("POST", uri, token, Some(body)).await
    }

    pub async fn patch(
        &self,
        uri: &str,
        token: Option<&str>,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        self.call("PATCH", uri, token, Some(body)).await
    }

    pub async fn put(
        &self,
        uri: &str,
        token: Option<&str>,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        self.call("PUT", uri, token, Some(body)).await
    }

    pub async fn delete(&self, uri: &str, token: Option<&str>) -> (StatusCode, serde_json::Value) {
        self.call("DELETE", uri, token, None).await
    }

    /// Register a customer and return its token.
    pub async fn customer(&self, username: &str) -> String {
        let (status, json) = self
            .post(
                "/api/auth/register",
                None,
                serde_json::json!({
                    "name": format!("{} name", username),
                    "username": username,
                    "password": "secret123",
                    "phone": "010-1111-2222",
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", json);
        json["token"].as_str().unwrap().to_string()
    }

    /// Seed an active employee directly and log in.
    pub async fn employee(&self, username: &str) -> String {
        let hash = saltleads::auth::hash_password("secret123").unwrap();
        self.state
            .db
            .upsert_active_employee(&format!("{} name", username), username, &hash, "010-3333-4444")
            .await
            .unwrap();
        let (status, json) = self
            .post(
                "/api/auth/login",
                None,
                serde_json::json!({"username": username, "password": "secret123"}),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{}", json);
        json["token"].as_str().unwrap().to_string()
    }

    pub async fn drain(&self) -> saltleads::outbox::DrainReport {
        self.state.drain_outbox().await.unwrap()
    }
}
