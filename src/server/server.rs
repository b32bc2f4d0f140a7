use std::{collections::BTreeMap, sync::Arc};

use axum::{
    Json, Router,
    extract::{FromRequest, rejection::JsonRejection},
    http::{HeaderValue, Method, StatusCode, header::CONTENT_TYPE},
    middleware,
    response::IntoResponse,
    routing::get,
};
use serde_json::json;
use thiserror::Error;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tower_sessions::{
    Expiry, MemoryStore, SessionManagerLayer, SessionStore,
    cookie::{SameSite, time::Duration},
};
use tower_sessions_redis_store::RedisStore;
use tracing::{error, info, warn};
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;
use utoipa_rapidoc::RapiDoc;

use crate::{
    infrastructure::{
        AppState, DbError, MailError, Mailer, MemoryTokenStore, RedisTokenStore, Settings,
        get_redis_pool,
    },
    server::{auth, comments, misc, posts, session::SESSION_COOKIE_NAME, shared, subs, trim},
};

#[derive(OpenApi)]
#[openapi(
    paths(),
    components(schemas(shared::ErrorBody, shared::ImageKind)),
    tags(
        (name = "auth", description = "Accounts and sessions"),
        (name = "posts", description = "Posts, feeds and comments on posts"),
        (name = "comments", description = "Editing and removing comments"),
        (name = "subs", description = "Communities"),
        (name = "misc", description = "Votes and rankings"),
    ),
    servers((url = "", description = "Readit API")),
)]
pub struct ApiDoc;

const APP_NAME: &str = env!("CARGO_PKG_NAME");
// "ten years", refreshed by activity
const SESSION_LIFETIME_DAYS: i64 = 365 * 10;

/// The full application router, with `store` holding the sessions.
pub fn app<Store>(state: Arc<AppState>, store: Store) -> Router
where
    Store: SessionStore + Clone,
{
    let session_layer = SessionManagerLayer::new(store)
        .with_name(SESSION_COOKIE_NAME)
        .with_http_only(true)
        .with_same_site(SameSite::Lax)
        .with_secure(state.settings.production)
        .with_expiry(Expiry::OnInactivity(Duration::days(SESSION_LIFETIME_DAYS)));

    let cors_layer = cors_layer(&state.settings);
    let upload_dir = ServeDir::new(&state.settings.upload_dir);

    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .nest("/api/auth", auth::router())
        .nest("/api/posts", posts::router())
        .nest("/api/comments", comments::router())
        .nest("/api/subs", subs::router())
        .nest("/api/misc", misc::router())
        .with_state(state)
        .split_for_parts();

    router
        .route("/", get(|| async { "hello world" }))
        .nest_service("/images", upload_dir)
        .merge(RapiDoc::with_openapi("/api-docs/openapi.json", api).path("/rapidoc"))
        .layer(middleware::from_fn(trim::trim_json_body))
        .layer(session_layer)
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(settings: &Settings) -> CorsLayer {
    let mut cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([CONTENT_TYPE])
        .allow_credentials(true);

    match settings.client_url.parse::<HeaderValue>() {
        Ok(origin) => cors = cors.allow_origin(origin),
        Err(error) => warn!(
            "CLIENT_URL {} is not a valid origin, cross-origin requests disabled: {}",
            settings.client_url, error
        ),
    }

    cors
}

/// A JSON request body whose rejections answer like every other [`ApiError`].
#[derive(FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<DbError> for ApiError {
    fn from(error: DbError) -> Self {
        ApiError::InternalError(error.to_string())
    }
}

impl From<MailError> for ApiError {
    fn from(error: MailError) -> Self {
        ApiError::InternalError(error.to_string())
    }
}

pub async fn serve(port: u16, settings: Settings) -> Result<(), ApiError> {
    tokio::fs::create_dir_all(&settings.upload_dir).await?;
    let mailer = Mailer::from_settings(&settings)?;

    let router = match settings.redis_url.clone() {
        Some(redis_url) => {
            let redis_pool = get_redis_pool(&redis_url).await?;
            let tokens = Arc::new(RedisTokenStore::new(redis_pool.clone()));
            let state = AppState::new(settings, tokens, mailer).await?;

            app(state, RedisStore::new(redis_pool))
        }
        None => {
            warn!("REDIS_URL not set, sessions and reset tokens are kept in memory");
            let tokens = Arc::new(MemoryTokenStore::default());
            let state = AppState::new(settings, tokens, mailer).await?;

            app(state, MemoryStore::default())
        }
    };

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(ApiError::TcpListenerError)?;

    info!("Serving {} on: http://{}", APP_NAME, addr);
    info!("\t - API docs on: http://{}/rapidoc", addr);

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("{} stopped", APP_NAME);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        error!("Could not listen for the shutdown signal: {}", error);
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TCP listener bind error: {0}")]
    TcpListenerError(std::io::Error),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Not found error: {0}")]
    NotFound(String),

    #[error("Bad request error: {0}")]
    BadRequest(String),

    #[error("Validation error: {0:?}")]
    Validation(BTreeMap<String, String>),

    #[error("Unauthorized error: {0}")]
    Unauthorized(String),

    #[error("Forbidden error: {0}")]
    Forbidden(String),

    #[error("Invalid password")]
    InvalidPassword,
}

impl ApiError {
    /// A 400 answer naming the offending field, e.g. `{"title": "Title must not be empty"}`.
    pub fn field(field: &str, message: &str) -> Self {
        ApiError::Validation(BTreeMap::from([(field.to_string(), message.to_string())]))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::Io(error) => {
                error!("IO error: {}", error);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Something went wrong".to_string(),
                )
            }
            ApiError::TcpListenerError(error) => {
                error!("TCP listener error: {}", error);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Server error: {}", error),
                )
            }
            ApiError::InternalError(message) => {
                error!("Internal server error: {}", message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Something went wrong".to_string(),
                )
            }
            ApiError::NotFound(message) => {
                warn!("Not found error: {}", message);
                (StatusCode::NOT_FOUND, message)
            }
            ApiError::BadRequest(message) => {
                warn!("Bad request error: {}", message);
                (StatusCode::BAD_REQUEST, message)
            }
            ApiError::Unauthorized(message) => {
                warn!("Unauthorized error: {}", message);
                (StatusCode::UNAUTHORIZED, message)
            }
            ApiError::Forbidden(message) => {
                warn!("Forbidden error: {}", message);
                (StatusCode::FORBIDDEN, message)
            }
            ApiError::InvalidPassword => {
                warn!("Invalid password");
                return (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({ "password": "Invalid password" })),
                )
                    .into_response();
            }
            ApiError::Validation(fields) => {
                warn!("Validation error: {:?}", fields);
                return (StatusCode::BAD_REQUEST, Json(fields)).into_response();
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use tower_sessions_redis_store::fred::prelude::Pool;

    use super::*;
    use crate::server::test_support::{Part, TestApp};

    fn assert_session_store<Store: SessionStore + Clone>() {}

    #[test]
    fn redis_store_backs_the_session_layer() {
        assert_session_store::<RedisStore<Pool>>();
        assert_session_store::<MemoryStore>();
    }

    #[tokio::test]
    async fn root_says_hello() {
        let app = TestApp::new().await;

        let response = app.get("/", None).await;

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, b"hello world");
    }

    #[tokio::test]
    async fn uploaded_images_are_served() {
        let app = TestApp::new().await;
        let cookie = app.login_as("alice").await;
        app.create_sub(&cookie, "rust").await;
        let bytes: &[u8] = b"\x89PNG\r\n\x1a\nlogo";

        let uploaded = app
            .multipart(
                "/api/subs/rust/image",
                &cookie,
                &[
                    Part::Text("type", "image"),
                    Part::File {
                        name: "file",
                        file_name: "logo.png",
                        content_type: "image/png",
                        bytes,
                    },
                ],
            )
            .await;
        assert_eq!(uploaded.status, StatusCode::OK, "{}", uploaded.json);

        let urn = uploaded.json["imageUrn"].as_str().unwrap();
        let served = app.get(&format!("/images/{}", urn), None).await;
        assert_eq!(served.status, StatusCode::OK);
        assert_eq!(served.body, bytes);

        let missing = app.get("/images/nothing.png", None).await;
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
    }
}
