//! # Auth: Accounts, Passwords, and Bearer Tokens
//!
//! Two roles share one account table. Customers are active as soon as they
//! register; employees need the shared employee code to register at all and
//! then wait in `pending` until an existing employee approves them. Only
//! active accounts can log in.
//!
//! Passwords are stored as argon2 PHC strings. Sessions are stateless HS256
//! JWTs carrying `{sub, role, iat, exp}`; the HTTP extractors re-read the
//! account on every request so a rejected or deleted user loses access at
//! once (see `dashboard::middleware_auth`).

use anyhow::anyhow;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

pub const MIN_USERNAME_LEN: usize = 3;
pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Employee,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Employee => "employee",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "customer" => Some(Role::Customer),
            "employee" => Some(Role::Employee),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Pending,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Pending => "pending",
        }
    }
}

/// The authenticated account behind a request.
#[derive(Debug, Clone)]
pub struct Actor {
    pub id: uuid::Uuid,
    pub name: String,
    pub username: String,
    pub role: Role,
}

impl Actor {
    pub fn is_employee(&self) -> bool {
        self.role == Role::Employee
    }
}

// ── Passwords ───────────────────────────────────────────────────

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("password hashing failed: {}", e))?;
    Ok(hash.to_string())
}

/// False for a wrong password and for an unparseable stored hash.
pub fn verify_password(password: &str, phc: &str) -> bool {
    match PasswordHash::new(phc) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

// ── Tokens ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Account UUID.
    pub sub: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and checks HS256 session tokens.
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: chrono::Duration,
}

impl TokenService {
    pub fn new(secret: &str, expire_days: i64) -> Self {
        TokenService {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: chrono::Duration::days(expire_days),
        }
    }

    pub fn issue(&self, user_id: uuid::Uuid, role: Role) -> anyhow::Result<String> {
        let now = chrono::Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            role,
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }

    /// Signature and expiry check. Any failure is `Unauthorized`.
    pub fn verify(&self, token: &str) -> Result<Claims, ApiError> {
        decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))
            .map(|data| data.claims)
            .map_err(|_| ApiError::Unauthorized("Invalid or expired token".into()))
    }
}

// ── Registration ────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub employee_code: Option<String>,
}

/// A registration that passed validation, ready to persist.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub name: String,
    pub username: String,
    pub role: Role,
    pub status: AccountStatus,
    pub phone: String,
    pub email: Option<String>,
}

/// Field checks first (all problems at once), then the employee code.
/// A wrong code is `Forbidden` so nothing is created.
pub fn validate_registration(
    reg: &Registration,
    employee_code: Option<&str>,
) -> Result<NewAccount, ApiError> {
    let mut problems = Vec::new();
    let name = reg.name.trim();
    let username = reg.username.trim().to_lowercase();
    let phone = reg.phone.trim();
    if name.is_empty() {
        problems.push("name is required".to_string());
    }
    if username.chars().count() < MIN_USERNAME_LEN {
        problems.push(format!(
            "username must be at least {} characters",
            MIN_USERNAME_LEN
        ));
    }
    if reg.password.chars().count() < MIN_PASSWORD_LEN {
        problems.push(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        ));
    }
    if phone.is_empty() {
        problems.push("phone is required".to_string());
    }
    let role = match reg.role.as_deref() {
        None | Some("") => Some(Role::Customer),
        Some(r) => Role::parse(r),
    };
    if role.is_none() {
        problems.push("role must be customer or employee".to_string());
    }
    if !problems.is_empty() {
        return Err(ApiError::Validation(problems));
    }
    let role = role.unwrap_or(Role::Customer);

    if role == Role::Employee && !employee_code_matches(employee_code, reg.employee_code.as_deref())
    {
        return Err(ApiError::Forbidden("Invalid employee code".into()));
    }

    Ok(NewAccount {
        name: name.to_string(),
        username,
        role,
        status: match role {
            Role::Customer => AccountStatus::Active,
            Role::Employee => AccountStatus::Pending,
        },
        phone: phone.to_string(),
        email: reg
            .email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(String::from),
    })
}

/// Constant-time comparison. An unconfigured code never matches.
pub fn employee_code_matches(expected: Option<&str>, given: Option<&str>) -> bool {
    match (expected, given) {
        (Some(e), Some(g)) if !e.is_empty() && e.len() == g.len() => e
            .bytes()
            .zip(g.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0,
        _ => false,
    }
}
