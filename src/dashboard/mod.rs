//! # Dashboard: Web Server and Background Workers
//!
//! Runs the Axum HTTP server behind the marketing site and the customer and
//! employee dashboards, plus two background tasks:
//!
//! - the outbox drain, which mirrors leads to the spreadsheet and sends mail
//! - the daily digest scheduler
//!
//! All routes live under `/api` except the health endpoints (`/healthz`, `/readyz`,
//! `/metrics`).

pub(crate) mod middleware_auth;
mod routes_auth;
mod routes_chat;
mod routes_contact_forms;
mod routes_estimates;
mod routes_health;
mod routes_questions;
mod routes_service_requests;

use crate::auth::TokenService;
use crate::config::Config;
use crate::ledger::{Ledger, MemoryLedger, SheetsLedger};
use crate::notify::{LogNotifier, Notifier, SmtpNotifier};
use crate::outbox::Drain;
use crate::{db, digest, prom_metrics};
use anyhow::Result;
use axum::extract::Request;
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::routing::{get, patch, post, put};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Instrument};

pub struct AppState {
    pub db: db::Database,
    pub config: Config,
    pub tokens: TokenService,
    pub ledger: Arc<dyn Ledger>,
    pub notifier: Arc<dyn Notifier>,
    pub prom_metrics: prom_metrics::Metrics,
}

impl AppState {
    pub fn new(
        db: db::Database,
        config: Config,
        ledger: Arc<dyn Ledger>,
        notifier: Arc<dyn Notifier>,
    ) -> Arc<Self> {
        let tokens = TokenService::new(&config.jwt_secret, config.jwt_expire_days);
        Arc::new(AppState {
            db,
            config,
            tokens,
            ledger,
            notifier,
            prom_metrics: prom_metrics::Metrics::new(),
        })
    }

    /// Run one outbox drain pass with this state's sinks.
    pub async fn drain_outbox(&self) -> Result<crate::outbox::DrainReport> {
        Drain {
            db: &self.db,
            ledger: self.ledger.as_ref(),
            notifier: self.notifier.as_ref(),
            metrics: &self.prom_metrics,
            max_attempts: self.config.outbox_max_attempts,
            retention: self.config.outbox_retention,
        }
        .run_once()
        .await
    }
}

/// Pick the ledger and notifier the configuration allows, falling back to
/// the in-memory ledger and the log notifier.
pub fn build_sinks(config: &Config) -> Result<(Arc<dyn Ledger>, Arc<dyn Notifier>)> {
    let ledger: Arc<dyn Ledger> = match &config.sheets {
        Some(sheets) => Arc::new(SheetsLedger::new(sheets)?),
        None => {
            warn!("GOOGLE_SPREADSHEET_ID or credentials not set; leads are mirrored to memory only");
            Arc::new(MemoryLedger::new())
        }
    };
    let notifier: Arc<dyn Notifier> = match &config.smtp {
        Some(smtp) => Arc::new(SmtpNotifier::new(smtp, &config.admin_emails)?),
        None => {
            warn!("SMTP_HOST not set; notifications are logged, not mailed");
            Arc::new(LogNotifier::new(config.admin_emails.clone()))
        }
    };
    Ok((ledger, notifier))
}

/// Middleware that records HTTP request duration into the Prometheus histogram,
/// generates (or propagates) a request ID for correlation, and wraps the
/// request in a tracing span using `.instrument()` for proper async propagation.
async fn metrics_middleware(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> axum::response::Response {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let method = req.method().to_string();
    let raw_path = req.uri().path().to_string();
    let norm_path = normalize_path(&raw_path);
    let start = std::time::Instant::now();

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        path = %raw_path,
    );
    let mut response = next.run(req).instrument(span).await;

    let duration = start.elapsed().as_secs_f64();
    state
        .prom_metrics
        .http_request_duration
        .get_or_create(&prom_metrics::HttpLabel {
            method,
            path: norm_path,
        })
        .observe(duration);

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Normalize URL path to collapse high-cardinality segments (chat sessions,
/// UUIDs, numeric IDs) into placeholders, preventing histogram label explosion.
fn normalize_path(path: &str) -> String {
    let mut prev = "";
    path.split('/')
        .map(|seg| {
            let out = if seg.is_empty() {
                seg.to_string()
            } else if prev == "chat" {
                ":session".to_string()
            } else if seg.chars().all(|c| c.is_ascii_digit()) {
                ":id".to_string()
            } else if seg.len() == 36 && seg.chars().filter(|c| *c == '-').count() == 4 {
                ":uuid".to_string()
            } else {
                seg.to_string()
            };
            prev = seg;
            out
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn cors_layer(origin: Option<&str>) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    match origin.and_then(|o| HeaderValue::from_str(o).ok()) {
        Some(value) => layer.allow_origin(AllowOrigin::exact(value)),
        None => layer.allow_origin(Any),
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let app = Router::new()
        .route("/healthz", get(routes_health::handler_healthz))
        .route("/readyz", get(routes_health::handler_readyz))
        .route("/metrics", get(routes_health::handler_metrics))
        // Credentials
        .route("/api/auth/register", post(routes_auth::handler_register))
        .route("/api/auth/login", post(routes_auth::handler_login))
        .route(
            "/api/auth/check-username",
            post(routes_auth::handler_check_username),
        )
        .route(
            "/api/auth/verify-employee-code",
            post(routes_auth::handler_verify_employee_code),
        )
        .route(
            "/api/auth/me",
            get(routes_auth::handler_me).put(routes_auth::handler_update_details),
        )
        .route("/api/auth/password", put(routes_auth::handler_update_password))
        .route(
            "/api/auth/pending-employees",
            get(routes_auth::handler_pending_employees),
        )
        .route(
            "/api/auth/approve-employee/{id}",
            put(routes_auth::handler_approve_employee),
        )
        .route(
            "/api/auth/reject-employee/{id}",
            axum::routing::delete(routes_auth::handler_reject_employee),
        )
        // Estimates
        .route(
            "/api/price-estimate",
            post(routes_estimates::handler_submit_full).get(routes_estimates::handler_list),
        )
        .route(
            "/api/price-estimate/quick",
            post(routes_estimates::handler_submit_quick),
        )
        .route(
            "/api/price-estimate/sheets",
            get(routes_estimates::handler_sheets),
        )
        .route(
            "/api/price-estimate/pricing",
            get(routes_estimates::handler_pricing),
        )
        .route(
            "/api/price-estimate/calendar",
            get(routes_estimates::handler_calendar),
        )
        .route(
            "/api/price-estimate/{id}",
            get(routes_estimates::handler_get).patch(routes_estimates::handler_annotate),
        )
        .route(
            "/api/price-estimate/{id}/status",
            patch(routes_estimates::handler_update_status),
        )
        // Chat
        .route("/api/notifications/chat", post(routes_chat::handler_request))
        .route("/api/notifications/chats", get(routes_chat::handler_list))
        .route(
            "/api/notifications/chat/{session_id}",
            get(routes_chat::handler_get).delete(routes_chat::handler_cancel),
        )
        .route(
            "/api/notifications/chat/{session_id}/accept",
            patch(routes_chat::handler_accept),
        )
        .route(
            "/api/notifications/chat/{session_id}/end",
            patch(routes_chat::handler_end),
        )
        .route(
            "/api/notifications/chat/{session_id}/read",
            patch(routes_chat::handler_mark_read),
        )
        .route(
            "/api/notifications/chat/{session_id}/message",
            post(routes_chat::handler_send_message),
        )
        // Questions
        .route(
            "/api/notifications/question",
            post(routes_questions::handler_create),
        )
        .route(
            "/api/notifications/questions",
            get(routes_questions::handler_list),
        )
        .route(
            "/api/notifications/questions/{id}/read",
            patch(routes_questions::handler_set_read),
        )
        .route(
            "/api/notifications/questions/{id}",
            axum::routing::delete(routes_questions::handler_delete),
        )
        // Customer records
        .route(
            "/api/service-requests",
            get(routes_service_requests::handler_list)
                .post(routes_service_requests::handler_create),
        )
        .route(
            "/api/service-requests/{id}",
            get(routes_service_requests::handler_get)
                .put(routes_service_requests::handler_update)
                .delete(routes_service_requests::handler_delete),
        )
        .route(
            "/api/contact-forms",
            get(routes_contact_forms::handler_list).post(routes_contact_forms::handler_create),
        )
        .route(
            "/api/contact-forms/{id}",
            get(routes_contact_forms::handler_get)
                .put(routes_contact_forms::handler_update)
                .delete(routes_contact_forms::handler_delete),
        );

    app.layer(cors_layer(state.config.cors_origin.as_deref()))
        .layer(CatchPanicLayer::new())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            metrics_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(1024 * 1024))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(30),
        ))
        .with_state(state)
}

/// Drain the outbox every `interval` until `cancel` fires.
async fn outbox_loop(state: Arc<AppState>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        match state.drain_outbox().await {
            Ok(r) if r.done + r.retried + r.failed > 0 => info!(
                done = r.done,
                retried = r.retried,
                failed = r.failed,
                "outbox drained"
            ),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "outbox drain failed"),
        }
    }
}

pub async fn run(port: u16, database: db::Database, config: Config) -> Result<()> {
    let (ledger, notifier) = build_sinks(&config)?;
    let state = AppState::new(database, config, ledger, notifier);
    let app = build_router(state.clone());
    let cancel = CancellationToken::new();

    let outbox = tokio::spawn(outbox_loop(
        Arc::clone(&state),
        state.config.outbox_interval,
        cancel.clone(),
    ));
    let digest = tokio::spawn(digest::run_scheduler(
        Arc::clone(&state.ledger),
        Arc::clone(&state.notifier),
        state.config.digest_hour,
        state.config.digest_utc_offset_hours,
        cancel.clone(),
    ));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, "server running");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    cancel.cancel();
    let _ = tokio::join!(outbox, digest);
    info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("received SIGINT, shutting down"),
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("received SIGINT, shutting down");
    }
}
