use std::{sync::Arc, time::Duration};

use axum::{Json, extract::State};
use tower_sessions::Session;
use tracing::{error, info};
use utoipa_axum::{router::OpenApiRouter, routes};
use uuid::Uuid;

use crate::{
    infrastructure::{AppState, TokenStoreError},
    server::{
        ApiError, ApiJson,
        helpers::{FieldErrors, is_valid_email},
        password::{hash_password, verify_password},
        repository::{
            find_user_by_email, find_user_by_username, insert_user, update_user_password,
        },
        session::{AuthUser, log_in, log_out},
        shared::{
            ChangePasswordRequest, ForgotPasswordRequest, LoginRequest, RegisterRequest,
            SuccessResponse, UserView,
        },
    },
};

pub const FORGET_PASSWORD_PREFIX: &str = "forget-password:";
const RESET_TOKEN_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 3);

pub fn router() -> OpenApiRouter<Arc<AppState>> {
    OpenApiRouter::new()
        .routes(routes!(register))
        .routes(routes!(login))
        .routes(routes!(logout))
        .routes(routes!(me))
        .routes(routes!(forgot_password))
        .routes(routes!(change_password))
}

impl From<TokenStoreError> for ApiError {
    fn from(error: TokenStoreError) -> Self {
        ApiError::InternalError(format!("Token store error: {}", error))
    }
}

fn check_password(errors: &mut FieldErrors, field: &str, password: &str) {
    errors.check_length(
        field,
        password,
        6,
        255,
        "Password must be between 6 and 255 characters",
    );
}

impl RegisterRequest {
    fn validate(&self) -> Result<(), ApiError> {
        let mut errors = FieldErrors::default();

        if !is_valid_email(&self.email) {
            errors.add("email", "Must be a valid email address");
        }
        errors.check_length(
            "username",
            &self.username,
            3,
            255,
            "Username must be between 3 and 255 characters",
        );
        check_password(&mut errors, "password", &self.password);

        if !errors.is_empty() {
            return Err(ApiError::Validation(errors.into_inner()));
        }

        Ok(())
    }
}

/// Create an account
#[utoipa::path(
        post,
        path = "/register",
        request_body = RegisterRequest,
        responses(
            (status = 200, description = "The new user.", body = UserView),
            (status = 400, description = "Taken email/username or invalid fields, keyed by field."),
        ),
        tag = "auth"
    )]
#[axum::debug_handler]
async fn register(
    State(state): State<Arc<AppState>>,
    ApiJson(registration): ApiJson<RegisterRequest>,
) -> Result<Json<UserView>, ApiError> {
    let mut errors = FieldErrors::default();
    if find_user_by_email(&state.db_pool, &registration.email)
        .await?
        .is_some()
    {
        errors.add("email", "Email already taken");
    }
    if find_user_by_username(&state.db_pool, &registration.username)
        .await?
        .is_some()
    {
        errors.add("username", "Username already taken");
    }
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors.into_inner()));
    }

    registration.validate()?;

    let password_hash = hash_password(registration.password).await?;
    let user = insert_user(
        &state.db_pool,
        &registration.email,
        &registration.username,
        &password_hash,
    )
    .await?;

    info!(username = %user.username, "user registered");

    Ok(Json(user.into()))
}

/// Log in and start a session
#[utoipa::path(
        post,
        path = "/login",
        request_body = LoginRequest,
        responses(
            (status = 200, description = "The user; the response sets the session cookie.", body = UserView),
            (status = 400, description = "Empty username or password."),
            (status = 401, description = "Wrong password."),
            (status = 404, description = "Unknown username."),
        ),
        tag = "auth"
    )]
#[axum::debug_handler]
async fn login(
    State(state): State<Arc<AppState>>,
    session: Session,
    ApiJson(credentials): ApiJson<LoginRequest>,
) -> Result<Json<UserView>, ApiError> {
    let mut errors = FieldErrors::default();
    if credentials.username.is_empty() {
        errors.add("username", "Username must not be empty");
    }
    if credentials.password.is_empty() {
        errors.add("password", "Password must not be empty");
    }
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors.into_inner()));
    }

    let user = find_user_by_username(&state.db_pool, &credentials.username)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    if !verify_password(user.password.clone(), credentials.password).await? {
        return Err(ApiError::InvalidPassword);
    }

    log_in(&session, &state.settings.session_secret, &user.username).await?;

    Ok(Json(user.into()))
}

/// End the current session
#[utoipa::path(
        post,
        path = "/logout",
        responses(
            (status = 200, description = "Session destroyed.", body = SuccessResponse),
        ),
        tag = "auth"
    )]
#[axum::debug_handler]
async fn logout(session: Session) -> Result<Json<SuccessResponse>, ApiError> {
    log_out(&session).await?;

    Ok(Json(SuccessResponse { success: true }))
}

/// The logged in user
#[utoipa::path(
        get,
        path = "/me",
        responses(
            (status = 200, description = "The user owning the session.", body = UserView),
            (status = 401, description = "No valid session."),
        ),
        tag = "auth"
    )]
#[axum::debug_handler(state = Arc<AppState>)]
async fn me(AuthUser(user): AuthUser) -> Json<UserView> {
    Json(user.into())
}

/// Mail a password reset link
#[utoipa::path(
        post,
        path = "/forgot-password",
        request_body = ForgotPasswordRequest,
        description = "Always succeeds so the endpoint cannot be used to probe for accounts.",
        responses(
            (status = 200, description = "Mail sent if the address belongs to an account.", body = SuccessResponse),
        ),
        tag = "auth"
    )]
#[axum::debug_handler]
async fn forgot_password(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<ForgotPasswordRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let Some(user) = find_user_by_email(&state.db_pool, &request.email).await? else {
        info!("password reset requested for an unknown email");
        return Ok(Json(SuccessResponse { success: true }));
    };

    let token = Uuid::new_v4().to_string();
    state
        .tokens
        .put(
            &format!("{}{}", FORGET_PASSWORD_PREFIX, token),
            &user.username,
            RESET_TOKEN_TTL,
        )
        .await?;

    let link = format!(
        "{}/change-password/{}",
        state.settings.client_url.trim_end_matches('/'),
        token
    );
    let sent = state
        .mailer
        .send(
            &user.email,
            "Reset your password",
            format!(
                "Hi {},\n\nfollow this link to choose a new password:\n{}\n\nThe link expires in three days.",
                user.username, link
            ),
        )
        .await;
    if let Err(error) = sent {
        error!(username = %user.username, "Could not send the password reset mail: {}", error);
    }

    Ok(Json(SuccessResponse { success: true }))
}

/// Set a new password with a reset token
#[utoipa::path(
        post,
        path = "/change-password",
        request_body = ChangePasswordRequest,
        responses(
            (status = 200, description = "Password changed; the response sets the session cookie.", body = UserView),
            (status = 400, description = "Invalid password, or an expired or unknown token."),
        ),
        tag = "auth"
    )]
#[axum::debug_handler]
async fn change_password(
    State(state): State<Arc<AppState>>,
    session: Session,
    ApiJson(request): ApiJson<ChangePasswordRequest>,
) -> Result<Json<UserView>, ApiError> {
    let mut errors = FieldErrors::default();
    check_password(&mut errors, "newPassword", &request.new_password);
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors.into_inner()));
    }

    let key = format!("{}{}", FORGET_PASSWORD_PREFIX, request.token);
    let username = state
        .tokens
        .get(&key)
        .await?
        .ok_or_else(|| ApiError::field("token", "Token expired"))?;

    let user = find_user_by_username(&state.db_pool, &username)
        .await?
        .ok_or_else(|| ApiError::field("token", "User no longer exists"))?;

    let password_hash = hash_password(request.new_password).await?;
    update_user_password(&state.db_pool, &user.username, &password_hash).await?;
    state.tokens.remove(&key).await?;

    log_in(&session, &state.settings.session_secret, &user.username).await?;
    info!(username = %user.username, "password changed");

    Ok(Json(user.into()))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use lettre::{AsyncSmtpTransport, Tokio1Executor};
    use serde_json::json;

    use super::*;
    use crate::{infrastructure::Mailer, server::test_support::TestApp};

    #[tokio::test]
    async fn register_returns_user_without_password() {
        let app = TestApp::new().await;

        let response = app
            .post(
                "/api/auth/register",
                None,
                json!({ "email": " jane@example.com ", "username": "jane", "password": "password123" }),
            )
            .await;

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.json["username"], "jane");
        assert_eq!(response.json["email"], "jane@example.com");
        assert!(response.json.get("password").is_none());
        assert!(response.json["createdAt"].is_string());
    }

    #[tokio::test]
    async fn register_reports_taken_and_invalid_fields() {
        let app = TestApp::new().await;
        app.login_as("jane").await;

        let taken = app
            .post(
                "/api/auth/register",
                None,
                json!({ "email": "jane@example.com", "username": "jane", "password": "password123" }),
            )
            .await;
        assert_eq!(taken.status, StatusCode::BAD_REQUEST);
        assert_eq!(taken.json["email"], "Email already taken");
        assert_eq!(taken.json["username"], "Username already taken");

        let invalid = app
            .post(
                "/api/auth/register",
                None,
                json!({ "email": "not-an-email", "username": "jo", "password": "short" }),
            )
            .await;
        assert_eq!(invalid.status, StatusCode::BAD_REQUEST);
        assert!(invalid.json["email"].is_string());
        assert!(invalid.json["username"].is_string());
        assert!(invalid.json["password"].is_string());
    }

    #[tokio::test]
    async fn login_distinguishes_unknown_user_and_wrong_password() {
        let app = TestApp::new().await;
        app.login_as("jane").await;

        let unknown = app
            .post(
                "/api/auth/login",
                None,
                json!({ "username": "john", "password": "password123" }),
            )
            .await;
        assert_eq!(unknown.status, StatusCode::NOT_FOUND);
        assert_eq!(unknown.json["error"], "User not found");

        let wrong = app
            .post(
                "/api/auth/login",
                None,
                json!({ "username": "jane", "password": "password124" }),
            )
            .await;
        assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);
        assert_eq!(wrong.json["password"], "Invalid password");
        assert!(wrong.cookie.is_none());

        let empty = app.post("/api/auth/login", None, json!({})).await;
        assert_eq!(empty.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn me_follows_the_session() {
        let app = TestApp::new().await;

        let anonymous = app.get("/api/auth/me", None).await;
        assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);
        assert_eq!(anonymous.json["error"], "Unauthenticated");

        let cookie = app.login_as("jane").await;
        let me = app.get("/api/auth/me", Some(&cookie)).await;
        assert_eq!(me.status, StatusCode::OK);
        assert_eq!(me.json["username"], "jane");

        let logout = app.post("/api/auth/logout", Some(&cookie), json!({})).await;
        assert_eq!(logout.status, StatusCode::OK);
        assert_eq!(logout.json["success"], true);

        let after = app.get("/api/auth/me", Some(&cookie)).await;
        assert_eq!(after.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn forgot_password_answers_the_same_for_unknown_emails() {
        let app = TestApp::new().await;
        app.login_as("jane").await;

        for email in ["jane@example.com", "nobody@example.com"] {
            let response = app
                .post("/api/auth/forgot-password", None, json!({ "email": email }))
                .await;
            assert_eq!(response.status, StatusCode::OK);
            assert_eq!(response.json["success"], true);
        }
    }

    #[tokio::test]
    async fn forgot_password_succeeds_when_mail_cannot_be_delivered() {
        let unreachable = Mailer::Smtp {
            transport: AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous("127.0.0.1")
                .port(1)
                .build(),
            from: "Readit <no-reply@localhost>".parse().unwrap(),
        };
        let app = TestApp::with_mailer(unreachable).await;
        app.login_as("jane").await;

        let response = app
            .post(
                "/api/auth/forgot-password",
                None,
                json!({ "email": "jane@example.com" }),
            )
            .await;

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.json["success"], true);
    }

    #[tokio::test]
    async fn change_password_consumes_the_token_and_logs_in() {
        let app = TestApp::new().await;
        app.login_as("jane").await;
        app.state
            .tokens
            .put(
                &format!("{}reset-token", FORGET_PASSWORD_PREFIX),
                "jane",
                RESET_TOKEN_TTL,
            )
            .await
            .unwrap();

        let too_short = app
            .post(
                "/api/auth/change-password",
                None,
                json!({ "token": "reset-token", "newPassword": "abc" }),
            )
            .await;
        assert_eq!(too_short.status, StatusCode::BAD_REQUEST);
        assert!(too_short.json["newPassword"].is_string());

        let changed = app
            .post(
                "/api/auth/change-password",
                None,
                json!({ "token": "reset-token", "newPassword": "new-password" }),
            )
            .await;
        assert_eq!(changed.status, StatusCode::OK);
        assert_eq!(changed.json["username"], "jane");
        let cookie = changed.cookie.expect("session cookie");
        assert_eq!(app.get("/api/auth/me", Some(&cookie)).await.status, StatusCode::OK);

        let reused = app
            .post(
                "/api/auth/change-password",
                None,
                json!({ "token": "reset-token", "newPassword": "another-password" }),
            )
            .await;
        assert_eq!(reused.status, StatusCode::BAD_REQUEST);
        assert_eq!(reused.json["token"], "Token expired");

        let old = app
            .post(
                "/api/auth/login",
                None,
                json!({ "username": "jane", "password": "password123" }),
            )
            .await;
        assert_eq!(old.status, StatusCode::UNAUTHORIZED);

        let new = app
            .post(
                "/api/auth/login",
                None,
                json!({ "username": "jane", "password": "new-password" }),
            )
            .await;
        assert_eq!(new.status, StatusCode::OK);
    }
}
