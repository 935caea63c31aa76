use std::convert::Infallible;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    extract::{FromRef, FromRequestParts, OptionalFromRequestParts},
    http::{HeaderMap, HeaderValue, header, request::Parts},
};
use jsonwebtoken::{DecodingKey, Validation, decode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::{AppConfig, Env},
    error::AppError,
    models::{Role, SessionUser, SessionView},
};

pub const AUTH_TOKEN_COOKIE: &str = "auth_token";
pub const USER_ROLE_COOKIE: &str = "user_role";

/// Claims
///
/// Payload of the session JWT issued by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (sub): the user's id.
    pub sub: Uuid,
    #[serde(default)]
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Expiration Time (exp), seconds since the epoch.
    pub exp: usize,
    /// Issued At (iat).
    pub iat: usize,
}

/// Session
///
/// The logged-in user resolved for one request. Handlers take it as an
/// argument instead of reading ambient state: `Session` rejects with 401,
/// `Option<Session>` yields `None` for anonymous callers.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub user: SessionUser,
    /// The bearer token, absent for the local header bypass.
    pub token: Option<String>,
    pub expires_at: Option<usize>,
}

impl Session {
    pub fn user_id(&self) -> Uuid {
        self.user.id
    }

    pub fn is_admin(&self) -> bool {
        self.user.role == Role::Admin
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            user: Some(self.user.clone()),
            token: self.token.clone(),
            is_logged_in: true,
        }
    }

    pub fn anonymous_view() -> SessionView {
        SessionView::default()
    }

    pub fn from_claims(claims: Claims, token: String) -> Self {
        Self {
            user: SessionUser {
                id: claims.sub,
                role: claims.role,
                username: claims.username,
                email: claims.email,
            },
            token: Some(token),
            expires_at: Some(claims.exp),
        }
    }

    /// resolve
    ///
    /// Order of credential sources:
    /// 1. `Env::Local` only: `x-user-id` (+ optional `x-user-role`) headers.
    /// 2. `Authorization: Bearer <jwt>`.
    /// 3. The `auth_token` cookie.
    pub fn resolve(headers: &HeaderMap, config: &AppConfig) -> Result<Option<Self>, AppError> {
        if config.env == Env::Local {
            if let Some(session) = local_bypass(headers) {
                return Ok(Some(session));
            }
        }

        let token = match bearer_token(headers).or_else(|| cookie_value(headers, AUTH_TOKEN_COOKIE)) {
            Some(token) => token,
            None => return Ok(None),
        };

        let claims = decode_token(&token, &config.jwt_secret)?;
        Ok(Some(Session::from_claims(claims, token)))
    }
}

fn local_bypass(headers: &HeaderMap) -> Option<Session> {
    let id = headers
        .get("x-user-id")
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| Uuid::parse_str(raw).ok())?;
    let role = headers
        .get("x-user-role")
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.parse().ok())
        .unwrap_or_default();

    Some(Session {
        user: SessionUser {
            id,
            role,
            username: None,
            email: None,
        },
        token: None,
        expires_at: None,
    })
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

/// Reads a cookie by name across every `Cookie` header.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

/// Validates signature and expiry of a session token.
pub fn decode_token(token: &str, secret: &str) -> Result<Claims, AppError> {
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    let mut validation = Validation::default();
    validation.validate_exp = true;

    decode::<Claims>(token, &decoding_key, &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AppError::Unauthorized("Session expired".to_string()),
            _ => AppError::Unauthorized("Invalid session token".to_string()),
        })
}

fn now_secs() -> usize {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as usize)
        .unwrap_or_default()
}

fn cookie(name: &str, value: &str, max_age: usize, http_only: bool, secure: bool) -> String {
    let mut cookie = format!("{}={}; Path=/; SameSite=Lax; Max-Age={}", name, value, max_age);
    if http_only {
        cookie.push_str("; HttpOnly");
    }
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Set-Cookie values mirroring the session into `auth_token` and `user_role`.
pub fn session_cookies(session: &Session, secure: bool) -> Vec<HeaderValue> {
    let max_age = session
        .expires_at
        .map(|exp| exp.saturating_sub(now_secs()))
        .unwrap_or_default();
    let token = session.token.as_deref().unwrap_or_default();

    [
        cookie(AUTH_TOKEN_COOKIE, token, max_age, true, secure),
        cookie(USER_ROLE_COOKIE, session.user.role.as_str(), max_age, false, secure),
    ]
    .iter()
    .filter_map(|value| HeaderValue::from_str(value).ok())
    .collect()
}

/// Set-Cookie values expiring both session cookies.
pub fn clear_session_cookies(secure: bool) -> Vec<HeaderValue> {
    [
        cookie(AUTH_TOKEN_COOKIE, "", 0, true, secure),
        cookie(USER_ROLE_COOKIE, "", 0, false, secure),
    ]
    .iter()
    .filter_map(|value| HeaderValue::from_str(value).ok())
    .collect()
}

/// Session Extractor Implementation
///
/// Makes `Session` usable as a handler argument. Authentication is resolved
/// before the handler body runs, so handlers never read ambient user state.
///
/// The process:
/// 1. Dependency Resolution: `AppConfig` is pulled from the state for the
///    environment check and the JWT secret.
/// 2. Local Bypass: in `Env::Local`, `x-user-id` and `x-user-role` headers
///    stand in for a token.
/// 3. Token Lookup: the `Authorization: Bearer` header, then the `auth_token` cookie.
/// 4. Validation: HS256 signature and expiry, with the role read from the claims.
///
/// Rejection: `AppError::Unauthorized` (401 `{"error": ...}`) when no valid
/// credentials are present.
impl<S> FromRequestParts<S> for Session
where
    S: Send + Sync,
    AppConfig: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let config = AppConfig::from_ref(state);
        Session::resolve(&parts.headers, &config)?
            .ok_or_else(|| AppError::Unauthorized("Authentication required".to_string()))
    }
}

/// Optional Session Extractor
///
/// `Option<Session>` for routes open to anonymous callers. Missing and
/// invalid credentials both resolve to `None`; the invalid case is logged at
/// debug level.
impl<S> OptionalFromRequestParts<S> for Session
where
    S: Send + Sync,
    AppConfig: FromRef<S>,
{
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        let config = AppConfig::from_ref(state);
        match Session::resolve(&parts.headers, &config) {
            Ok(session) => Ok(session),
            Err(e) => {
                tracing::debug!(error = %e, "ignoring invalid session credentials");
                Ok(None)
            }
        }
    }
}
