//! Security-focused integration tests.
//!
//! Role enforcement, token handling, injection attempts through filters and
//! path ids, request limits, and CORS.
//!
//! Requires TEST_DATABASE_URL to be set.
//! Run with: cargo test --test security_tests -- --test-threads=1

mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use common::TestApp;
use saltleads::auth::{Role, TokenService};
use serde_json::json;
use tower::ServiceExt;

macro_rules! require_db {
    () => {
        if !common::has_test_db() {
            eprintln!("Skipping: TEST_DATABASE_URL not set");
            return;
        }
    };
}

const EMPLOYEE_ONLY_GETS: [&str; 5] = [
    "/api/price-estimate",
    "/api/price-estimate/sheets",
    "/api/notifications/chats",
    "/api/notifications/questions",
    "/api/auth/pending-employees",
];

// ---------------------------------------------------------------------------
// Role enforcement
// ---------------------------------------------------------------------------

#[tokio::test]
async fn employee_endpoints_reject_customers() {
    require_db!();
    let app = TestApp::new().await;
    let customer = app.customer("cust").await;
    for uri in EMPLOYEE_ONLY_GETS {
        let (status, json) = app.get(uri, Some(&customer)).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{} let a customer in", uri);
        assert!(json["error"].is_string());
    }
}

#[tokio::test]
async fn employee_endpoints_require_token() {
    require_db!();
    let app = TestApp::new().await;
    for uri in EMPLOYEE_ONLY_GETS {
        let (status, _) = app.get(uri, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{} served anonymously", uri);
    }
    let (status, _) = app.get("/api/auth/me", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn customer_cannot_accept_or_end_chat() {
    require_db!();
    let app = TestApp::new().await;
    app.post("/api/notifications/chat", None, json!({"sessionId": "chat_sec"}))
        .await;
    let customer = app.customer("cust").await;
    for action in ["accept", "end"] {
        let (status, _) = app
            .patch(
                &format!("/api/notifications/chat/chat_sec/{}", action),
                Some(&customer),
                json!({}),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}

#[tokio::test]
async fn employee_sender_cannot_be_spoofed() {
    require_db!();
    let app = TestApp::new().await;
    app.post("/api/notifications/chat", None, json!({"sessionId": "chat_spoof"}))
        .await;
    let uri = "/api/notifications/chat/chat_spoof/message";
    let body = json!({"text": "상담원입니다", "sender": "employee"});

    let (status, _) = app.post(uri, None, body.clone()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let customer = app.customer("cust").await;
    let (status, _) = app.post(uri, Some(&customer), body).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn customers_only_see_their_own_records() {
    require_db!();
    let app = TestApp::new().await;
    let alice = app.customer("alice").await;
    let bob = app.customer("bob").await;
    let (_, json) = app
        .post(
            "/api/contact-forms",
            Some(&alice),
            json!({"name": "A", "email": "a@example.com", "subject": "s", "message": "m"}),
        )
        .await;
    let id = json["contactForm"]["id"].as_i64().unwrap();

    let (status, _) = app
        .get(&format!("/api/contact-forms/{}", id), Some(&bob))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (_, json) = app.get("/api/contact-forms", Some(&bob)).await;
    assert!(json["contactForms"].as_array().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

#[tokio::test]
async fn forged_and_expired_tokens_rejected() {
    require_db!();
    let app = TestApp::new().await;
    let token = app.customer("cust").await;
    let (_, me) = app.get("/api/auth/me", Some(&token)).await;
    let id = uuid::Uuid::parse_str(me["user"]["id"].as_str().unwrap()).unwrap();

    let forged = TokenService::new("some-other-secret", 7)
        .issue(id, Role::Employee)
        .unwrap();
    let (status, _) = app.get("/api/auth/me", Some(&forged)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let expired = TokenService::new(common::TEST_JWT_SECRET, -2)
        .issue(id, Role::Customer)
        .unwrap();
    let (status, _) = app.get("/api/auth/me", Some(&expired)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let mut tampered = token.clone();
    tampered.push('x');
    let (status, _) = app.get("/api/auth/me", Some(&tampered)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn role_comes_from_account_not_token() {
    require_db!();
    let app = TestApp::new().await;
    let token = app.customer("cust").await;
    let (_, me) = app.get("/api/auth/me", Some(&token)).await;
    let id = uuid::Uuid::parse_str(me["user"]["id"].as_str().unwrap()).unwrap();

    // Correctly signed, but claims a role the account does not have.
    let elevated = TokenService::new(common::TEST_JWT_SECRET, 7)
        .issue(id, Role::Employee)
        .unwrap();
    let (status, _) = app
        .get("/api/notifications/chats", Some(&elevated))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn pending_employee_token_is_refused() {
    require_db!();
    let app = TestApp::new().await;
    app.post(
        "/api/auth/register",
        None,
        json!({
            "name": "대기",
            "username": "pending1",
            "password": "secret123",
            "phone": "010-0000-1111",
            "role": "employee",
            "employeeCode": common::TEST_EMPLOYEE_CODE,
        }),
    )
    .await;
    let user = app
        .state
        .db
        .get_user_by_username("pending1")
        .await
        .unwrap()
        .unwrap();
    let token = TokenService::new(common::TEST_JWT_SECRET, 7)
        .issue(user.id, Role::Employee)
        .unwrap();
    let (status, _) = app.get("/api/notifications/chats", Some(&token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

// ---------------------------------------------------------------------------
// Injection attempts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn filter_injection_is_a_validation_error() {
    require_db!();
    let app = TestApp::new().await;
    let staff = app.employee("staff").await;
    let injections = [
        "'; DROP TABLE price_estimates; --",
        "pending' OR '1'='1",
    ];
    for injection in injections {
        let uri = format!(
            "/api/price-estimate?status={}",
            urlencoding::encode(injection)
        );
        let (status, _) = app.get(&uri, Some(&staff)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", injection);
        let uri = format!(
            "/api/service-requests?category={}",
            urlencoding::encode(injection)
        );
        let (status, _) = app.get(&uri, Some(&staff)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", injection);
    }
    let (status, json) = app.get("/api/price-estimate", Some(&staff)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["estimates"].is_array());
}

#[tokio::test]
async fn session_id_rejects_odd_characters() {
    require_db!();
    let app = TestApp::new().await;
    for id in ["chat'; DELETE FROM chats; --", "../../etc/passwd", ""] {
        let (status, _) = app
            .post("/api/notifications/chat", None, json!({"sessionId": id}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{:?}", id);
    }
}

#[tokio::test]
async fn non_numeric_ids_are_client_errors() {
    require_db!();
    let app = TestApp::new().await;
    let staff = app.employee("staff").await;
    let (status, _) = app
        .get("/api/price-estimate/1%20OR%201=1", Some(&staff))
        .await;
    assert!(status.is_client_error());
}

// ---------------------------------------------------------------------------
// Limits and CORS
// ---------------------------------------------------------------------------

#[tokio::test]
async fn body_size_limit_enforced() {
    require_db!();
    let app = TestApp::new().await;
    let large_body = "x".repeat(2 * 1024 * 1024);
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/notifications/question")
                .method(Method::POST)
                .header("content-type", "application/json")
                .body(Body::from(large_body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn malformed_json_returns_client_error() {
    require_db!();
    let app = TestApp::new().await;
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/price-estimate")
                .method(Method::POST)
                .header("content-type", "application/json")
                .body(Body::from("{invalid json}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn cors_preflight_returns_headers() {
    require_db!();
    let app = TestApp::new().await;
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/price-estimate")
                .method(Method::OPTIONS)
                .header("origin", "https://salt.example.com")
                .header("access-control-request-method", "POST")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(response
        .headers()
        .get("access-control-allow-origin")
        .is_some());
    assert!(response
        .headers()
        .get("access-control-allow-methods")
        .is_some());
}

#[tokio::test]
async fn internal_details_not_leaked_on_conflict() {
    require_db!();
    let app = TestApp::new().await;
    app.customer("dup").await;
    let (status, json) = app
        .post(
            "/api/auth/register",
            None,
            json!({"name": "x", "username": "dup", "password": "secret123", "phone": "010"}),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    let text = json.to_string();
    assert!(!text.contains("duplicate key"));
    assert!(!text.contains("users_username"));
}
