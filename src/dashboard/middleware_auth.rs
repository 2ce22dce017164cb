//! Bearer-token extractors for the API routes.
//!
//! Extracts the JWT from the `Authorization: Bearer <token>` header,
//! verifies it, and re-reads the account so a deleted or demoted user loses
//! access before the token expires. Handlers take one of:
//!
//! - [`RequireAuth`]: any active account
//! - [`RequireEmployee`]: an active employee (403 for customers)
//! - [`MaybeAuth`]: public routes that behave differently for a signed-in
//!   caller; a bad token there counts as anonymous
//!
//! [`ClientIp`] resolves the caller's address for lead rows.

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::header;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use std::sync::Arc;

use super::AppState;
use crate::auth::{AccountStatus, Actor, Role};
use crate::error::ApiError;

fn bearer(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

/// Verify the token and load the account behind it.
async fn authenticate(state: &AppState, token: &str) -> Result<Actor, ApiError> {
    let claims = state.tokens.verify(token)?;
    let id = uuid::Uuid::parse_str(&claims.sub)
        .map_err(|_| ApiError::Unauthorized("Invalid or expired token".into()))?;
    let user = state
        .db
        .get_user(id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Account no longer exists".into()))?;
    if user.status != AccountStatus::Active.as_str() {
        return Err(ApiError::Forbidden("Account is awaiting approval".into()));
    }
    let role = Role::parse(&user.role)
        .ok_or_else(|| ApiError::Unauthorized("Account has an unknown role".into()))?;
    Ok(Actor {
        id: user.id,
        name: user.name,
        username: user.username,
        role,
    })
}

/// Axum extractor that requires any authenticated, active account.
///
/// Returns 401 if no valid JWT is present.
pub struct RequireAuth(pub Actor);

impl FromRequestParts<Arc<AppState>> for RequireAuth {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer(parts).ok_or_else(|| {
            ApiError::Unauthorized("Authentication required".into()).into_response()
        })?;
        let actor = authenticate(state, token)
            .await
            .map_err(IntoResponse::into_response)?;
        Ok(RequireAuth(actor))
    }
}

/// Axum extractor that requires an authenticated employee.
///
/// Returns 401 if no valid JWT is present, 403 if the caller is a customer.
pub struct RequireEmployee(pub Actor);

impl FromRequestParts<Arc<AppState>> for RequireEmployee {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let RequireAuth(actor) = RequireAuth::from_request_parts(parts, state).await?;
        if !actor.is_employee() {
            return Err(ApiError::Forbidden("Employee access required".into()).into_response());
        }
        Ok(RequireEmployee(actor))
    }
}

pub struct MaybeAuth(pub Option<Actor>);

impl FromRequestParts<Arc<AppState>> for MaybeAuth {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let Some(token) = bearer(parts) else {
            return Ok(MaybeAuth(None));
        };
        match authenticate(state, token).await {
            Ok(actor) => Ok(MaybeAuth(Some(actor))),
            Err(ApiError::Internal(e)) => Err(ApiError::Internal(e).into_response()),
            Err(_) => Ok(MaybeAuth(None)),
        }
    }
}

/// First `x-forwarded-for` entry, else `x-real-ip`, else the peer address.
pub struct ClientIp(pub String);

fn header_value<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

pub(super) fn client_ip(parts: &Parts) -> String {
    if let Some(first) = header_value(parts, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return first.to_string();
    }
    if let Some(real) = header_value(parts, "x-real-ip") {
        return real.to_string();
    }
    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ClientIp(client_ip(parts)))
    }
}
