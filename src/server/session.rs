//! Cookie sessions and the users they authenticate.
//!
//! After login the session (stored in Redis, or in memory when Redis is not configured) carries a
//! signed access token of the form `username.issued_at.signature`, where the signature is an
//! HMAC-SHA256 over `username.issued_at` keyed with `SESSION_SECRET`. Handlers take [`AuthUser`]
//! when a login is required and [`Viewer`] when it only personalises the response.

use std::sync::Arc;

use axum::{extract::FromRequestParts, http::request::Parts};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tower_sessions::Session;
use tracing::debug;

use crate::{
    infrastructure::AppState,
    server::{
        ApiError,
        repository::{UserRow, find_user_by_username},
    },
};

pub const SESSION_COOKIE_NAME: &str = "qid";
pub const ACCESS_TOKEN_KEY: &str = "access_token";

type HmacSha256 = Hmac<Sha256>;

impl From<tower_sessions::session::Error> for ApiError {
    fn from(error: tower_sessions::session::Error) -> Self {
        ApiError::InternalError(format!("Session store error: {}", error))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessClaims {
    pub username: String,
    pub issued_at: i64,
}

fn mac(secret: &str) -> Result<HmacSha256, ApiError> {
    HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|error| ApiError::InternalError(format!("Invalid session secret: {}", error)))
}

pub fn sign_access_token(secret: &str, username: &str, issued_at: i64) -> Result<String, ApiError> {
    let payload = format!("{}.{}", username, issued_at);

    let mut mac = mac(secret)?;
    mac.update(payload.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    Ok(format!("{}.{}", payload, signature))
}

/// `None` for anything that was not produced by [`sign_access_token`] with the same secret.
pub fn verify_access_token(secret: &str, token: &str) -> Option<AccessClaims> {
    // usernames may contain dots, so split from the right
    let mut parts = token.rsplitn(3, '.');
    let signature = hex::decode(parts.next()?).ok()?;
    let issued_at = parts.next()?;
    let username = parts.next()?;

    let mut mac = mac(secret).ok()?;
    mac.update(format!("{}.{}", username, issued_at).as_bytes());
    mac.verify_slice(&signature).ok()?;

    Some(AccessClaims {
        username: username.to_string(),
        issued_at: issued_at.parse().ok()?,
    })
}

pub async fn log_in(session: &Session, secret: &str, username: &str) -> Result<(), ApiError> {
    let token = sign_access_token(secret, username, Utc::now().timestamp())?;

    // a fresh id on every login so a planted cookie cannot be promoted
    session.cycle_id().await?;
    session.insert(ACCESS_TOKEN_KEY, token).await?;

    Ok(())
}

pub async fn log_out(session: &Session) -> Result<(), ApiError> {
    session.flush().await?;

    Ok(())
}

async fn session_user(
    parts: &mut Parts,
    state: &Arc<AppState>,
) -> Result<Option<UserRow>, ApiError> {
    let session = Session::from_request_parts(parts, state)
        .await
        .map_err(|(_, message)| ApiError::InternalError(message.to_string()))?;

    let Some(token) = session.get::<String>(ACCESS_TOKEN_KEY).await? else {
        return Ok(None);
    };

    let Some(claims) = verify_access_token(&state.settings.session_secret, &token) else {
        return Err(ApiError::Unauthorized("Unauthenticated".into()));
    };

    let user = find_user_by_username(&state.db_pool, &claims.username).await?;
    if user.is_none() {
        debug!(username = %claims.username, "session refers to a deleted user");
    }

    Ok(user)
}

/// The logged in user; rejects the request with 401 otherwise.
pub struct AuthUser(pub UserRow);

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        session_user(parts, state)
            .await?
            .map(AuthUser)
            .ok_or_else(|| ApiError::Unauthorized("Unauthenticated".into()))
    }
}

/// The logged in user if there is one.
pub struct Viewer(pub Option<UserRow>);

impl Viewer {
    pub fn username(&self) -> Option<&str> {
        self.0.as_ref().map(|user| user.username.as_str())
    }
}

impl FromRequestParts<Arc<AppState>> for Viewer {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        Ok(Viewer(session_user(parts, state).await?))
    }
}
