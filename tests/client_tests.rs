//! # Client Tests: ApiClient and ChatPoller over real HTTP
//!
//! Two kinds of server back these tests:
//!
//! ```text
//! MockServer::start()                    serve_app()
//!   └─ TcpListener 127.0.0.1:0             └─ TcpListener 127.0.0.1:0
//!   └─ scripted chat endpoints             └─ the real router (TEST_DATABASE_URL)
//!   └─ request log for assertions
//! ```
//!
//! Mock-backed tests always run; the end-to-end flow is skipped without a
//! test database.

mod common;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, patch};
use axum::{Json, Router};
use saltleads::chat::{ChatStatus, Sender};
use saltleads::client::{
    ApiClient, ApiFailure, ChatPoller, ClientSession, PollTarget, RegisterRequest, Registered,
};
use saltleads::wizard::{Selection, Wizard};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Mock server
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockState {
    /// Polls to answer with 500 before succeeding.
    fail_first: usize,
    calls: AtomicUsize,
    auth_headers: Mutex<Vec<Option<String>>>,
}

fn chat_json(session_id: &str, status: &str) -> serde_json::Value {
    json!({
        "sessionId": session_id,
        "customerName": "고객",
        "status": status,
        "messages": [],
        "acceptedBy": "",
        "acceptedAt": null,
        "endedBy": "",
        "endedAt": null,
        "version": 1,
        "createdAt": "2026-10-19T01:00:00Z",
        "lastUpdate": "2026-10-19T01:00:00Z"
    })
}

async fn mock_get_chat(
    State(state): State<Arc<MockState>>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    state.auth_headers.lock().unwrap().push(auth);
    let n = state.calls.fetch_add(1, Ordering::SeqCst);
    if n < state.fail_first {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "Internal server error"})),
        );
    }
    if session_id == "missing" {
        return (StatusCode::OK, Json(json!({"success": true, "chat": null})));
    }
    (
        StatusCode::OK,
        Json(json!({"success": true, "chat": chat_json(&session_id, "pending")})),
    )
}

async fn mock_list_chats(State(state): State<Arc<MockState>>) -> impl IntoResponse {
    state.calls.fetch_add(1, Ordering::SeqCst);
    Json(json!({
        "success": true,
        "chats": [chat_json("chat_a", "pending"), chat_json("chat_b", "active")]
    }))
}

async fn mock_accept() -> impl IntoResponse {
    (
        StatusCode::CONFLICT,
        Json(json!({"error": "Chat already accepted by 김직원"})),
    )
}

struct MockServer {
    addr: SocketAddr,
    state: Arc<MockState>,
}

impl MockServer {
    async fn start(fail_first: usize) -> Self {
        let state = Arc::new(MockState {
            fail_first,
            ..Default::default()
        });
        let app = Router::new()
            .route("/api/notifications/chat/{session_id}", get(mock_get_chat))
            .route("/api/notifications/chats", get(mock_list_chats))
            .route(
                "/api/notifications/chat/{session_id}/accept",
                patch(mock_accept),
            )
            .with_state(state.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        MockServer { addr, state }
    }

    fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Client against the mock
// ---------------------------------------------------------------------------

#[tokio::test]
async fn get_chat_maps_null_to_none() {
    let mock = MockServer::start(0).await;
    let client = ApiClient::new(&mock.url()).unwrap();
    assert!(client.get_chat("missing").await.unwrap().is_none());
    let chat = client.get_chat("chat_1").await.unwrap().unwrap();
    assert_eq!(chat.session_id, "chat_1");
    assert_eq!(chat.status, ChatStatus::Pending);
}

#[tokio::test]
async fn bearer_token_is_sent() {
    let mock = MockServer::start(0).await;
    let client = ApiClient::new(&mock.url()).unwrap();
    client.get_chat("chat_1").await.unwrap();
    let client = client.with_token("abc.def.ghi");
    client.get_chat("chat_1").await.unwrap();
    let seen = mock.state.auth_headers.lock().unwrap().clone();
    assert_eq!(seen, vec![None, Some("Bearer abc.def.ghi".to_string())]);
}

#[tokio::test]
async fn error_body_becomes_api_failure() {
    let mock = MockServer::start(0).await;
    let client = ApiClient::new(&mock.url()).unwrap();
    let err = client.accept_chat("chat_1").await.unwrap_err();
    let failure = err.downcast_ref::<ApiFailure>().expect("ApiFailure");
    assert_eq!(failure.status, StatusCode::CONFLICT);
    assert!(failure.message.contains("김직원"));
}

#[tokio::test]
async fn unreachable_server_is_an_error() {
    let client = ApiClient::new("http://127.0.0.1:9").unwrap();
    assert!(client.get_chat("chat_1").await.is_err());
}

// ---------------------------------------------------------------------------
// Poller
// ---------------------------------------------------------------------------

#[tokio::test]
async fn poller_recovers_after_failures() {
    let mock = MockServer::start(2).await;
    let client = ApiClient::new(&mock.url()).unwrap();
    let cancel = CancellationToken::new();
    let (handle, mut rx) = ChatPoller::new(client, PollTarget::Session("chat_poll".into()))
        .with_interval(Duration::from_millis(10), Duration::from_millis(40))
        .spawn(cancel.clone());

    tokio::time::timeout(Duration::from_secs(5), rx.changed())
        .await
        .expect("poller never published")
        .unwrap();
    let snapshot = rx.borrow_and_update().clone();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].session_id, "chat_poll");
    assert!(mock.calls() >= 3);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("poller ignored cancellation")
        .unwrap();
}

#[tokio::test]
async fn poller_lists_all_chats_until_cancelled() {
    let mock = MockServer::start(0).await;
    let client = ApiClient::new(&mock.url()).unwrap().with_token("staff");
    let cancel = CancellationToken::new();
    let (handle, mut rx) = ChatPoller::new(client, PollTarget::AllChats)
        .with_interval(Duration::from_millis(10), Duration::from_millis(40))
        .spawn(cancel.clone());

    rx.changed().await.unwrap();
    let ids: Vec<String> = rx.borrow().iter().map(|c| c.session_id.clone()).collect();
    assert_eq!(ids, vec!["chat_a", "chat_b"]);

    cancel.cancel();
    handle.await.unwrap();
    let calls = mock.calls();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(mock.calls(), calls, "poller kept polling after cancel");
}

#[tokio::test]
async fn poller_exits_when_receiver_dropped() {
    let mock = MockServer::start(0).await;
    let client = ApiClient::new(&mock.url()).unwrap();
    let (handle, rx) = ChatPoller::new(client, PollTarget::Session("chat_x".into()))
        .with_interval(Duration::from_millis(10), Duration::from_millis(40))
        .spawn(CancellationToken::new());
    drop(rx);
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("poller outlived its receiver")
        .unwrap();
}

// ---------------------------------------------------------------------------
// End to end against the real router
// ---------------------------------------------------------------------------

macro_rules! require_db {
    () => {
        if !common::has_test_db() {
            eprintln!("Skipping: TEST_DATABASE_URL not set");
            return;
        }
    };
}

async fn serve_app(app: &common::TestApp) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app.router.clone();
    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn customer_and_employee_consultation() {
    require_db!();
    let app = common::TestApp::new().await;
    let url = serve_app(&app).await;

    // Customer signs up, prices a selection, walks away.
    let customer = ApiClient::new(&url).unwrap();
    let registered = customer
        .register(&RegisterRequest {
            name: "홍길동".into(),
            username: "hong".into(),
            password: "secret123".into(),
            phone: "010-1234-5678".into(),
            role: "customer".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    let Registered::Token(token) = registered else {
        panic!("customer registration should return a token");
    };
    let customer = customer.with_token(token);
    assert_eq!(customer.me().await.unwrap().role, "customer");

    let mut wizard = Wizard::new();
    wizard
        .select(Selection {
            indoor_count: 2,
            outdoor_count: 1,
            ..Default::default()
        })
        .unwrap();
    wizard.show_price().unwrap();
    let abandoned = wizard.restart().unwrap();
    let estimate_id = customer.submit_quick(&abandoned).await.unwrap();
    assert!(estimate_id > 0);

    customer
        .ask_question("010-1234-5678", "설치 기간이 얼마나 걸리나요?")
        .await
        .unwrap();

    // Customer opens a chat; the employee dashboard sees it.
    let mut session = ClientSession::new();
    let session_id = session.session_id().to_string();
    let chat = customer
        .request_chat(&session_id, Some("홍길동"))
        .await
        .unwrap();
    assert_eq!(chat.status, ChatStatus::Pending);

    app.employee("staff").await;
    let mut staff = ApiClient::new(&url).unwrap();
    staff.login("staff", "secret123").await.unwrap();

    let cancel = CancellationToken::new();
    let (poller, mut rx) = ChatPoller::new(staff.clone(), PollTarget::AllChats)
        .with_interval(Duration::from_millis(20), Duration::from_millis(100))
        .spawn(cancel.clone());
    tokio::time::timeout(
        Duration::from_secs(5),
        rx.wait_for(|chats| chats.iter().any(|c| c.session_id == session_id)),
    )
    .await
    .expect("employee never saw the chat")
    .unwrap();
    cancel.cancel();
    poller.await.unwrap();

    let accepted = staff.accept_chat(&session_id).await.unwrap();
    assert_eq!(accepted.status, ChatStatus::Active);
    assert_eq!(accepted.accepted_by, "staff name");

    let reply = staff
        .send_message(&session_id, "안녕하세요, 상담원입니다.", Sender::Employee)
        .await
        .unwrap();
    assert_eq!(reply.employee_name, "staff name");
    customer
        .send_message(&session_id, "견적 문의드려요", Sender::User)
        .await
        .unwrap();

    let seen = customer.mark_read(&session_id, Sender::Employee).await.unwrap();
    assert!(seen
        .messages
        .iter()
        .filter(|m| m.sender == Sender::Employee)
        .all(|m| m.read));

    let ended = staff.end_chat(&session_id).await.unwrap();
    assert_eq!(ended.status, ChatStatus::Ended);
    assert_eq!(ended.messages.len(), 2);

    // Customer starts over with a fresh session.
    let next = session.new_chat().to_string();
    assert_ne!(next, session_id);
    assert!(customer.get_chat(&next).await.unwrap().is_none());
}

#[tokio::test]
async fn pending_employee_registration() {
    require_db!();
    let app = common::TestApp::new().await;
    let url = serve_app(&app).await;
    let client = ApiClient::new(&url).unwrap();
    let registered = client
        .register(&RegisterRequest {
            name: "신입".into(),
            username: "newbie".into(),
            password: "secret123".into(),
            phone: "010-2222-3333".into(),
            role: "employee".into(),
            employee_code: Some(common::TEST_EMPLOYEE_CODE.into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(registered, Registered::Pending);

    let mut client = client;
    let err = client.login("newbie", "secret123").await.unwrap_err();
    let failure = err.downcast_ref::<ApiFailure>().unwrap();
    assert_eq!(failure.status, StatusCode::FORBIDDEN);
    assert!(client.token().is_none());
}
