use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::info;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::{
    infrastructure::AppState,
    server::{
        ApiError, ApiJson,
        repository::{self, CommentRow, find_comment},
        session::AuthUser,
        shared::{CommentRequest, CommentView},
    },
};

pub fn router() -> OpenApiRouter<Arc<AppState>> {
    OpenApiRouter::new().routes(routes!(update_comment, delete_comment))
}

async fn owned_comment(
    state: &AppState,
    username: &str,
    identifier: &str,
) -> Result<CommentRow, ApiError> {
    let comment = find_comment(&state.db_pool, Some(username), identifier)
        .await?
        .ok_or_else(|| ApiError::NotFound("Comment not found".into()))?;

    if comment.username != username {
        return Err(ApiError::Forbidden("You dont own this comment".into()));
    }

    Ok(comment)
}

/// Edit a comment's body
#[utoipa::path(
        patch,
        path = "/{identifier}",
        params(("identifier" = String, Path, description = "Comment identifier")),
        request_body = CommentRequest,
        responses(
            (status = 200, description = "The updated comment.", body = CommentView),
            (status = 400, description = "Empty comment."),
            (status = 403, description = "Not the author."),
            (status = 404, description = "No such comment."),
        ),
        tag = "comments"
    )]
#[axum::debug_handler(state = Arc<AppState>)]
async fn update_comment(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(identifier): Path<String>,
    ApiJson(request): ApiJson<CommentRequest>,
) -> Result<Json<CommentView>, ApiError> {
    let comment = owned_comment(&state, &user.username, &identifier).await?;

    if request.body.is_empty() {
        return Err(ApiError::field("body", "Comment must not be empty"));
    }

    repository::update_comment(&state.db_pool, comment.id, &request.body).await?;

    let comment = owned_comment(&state, &user.username, &identifier).await?;

    Ok(Json(comment.into()))
}

/// Delete a comment and its votes
#[utoipa::path(
        delete,
        path = "/{identifier}",
        params(("identifier" = String, Path, description = "Comment identifier")),
        responses(
            (status = 204, description = "Comment deleted."),
            (status = 403, description = "Not the author."),
            (status = 404, description = "No such comment."),
        ),
        tag = "comments"
    )]
#[axum::debug_handler(state = Arc<AppState>)]
async fn delete_comment(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(identifier): Path<String>,
) -> Result<StatusCode, ApiError> {
    let comment = owned_comment(&state, &user.username, &identifier).await?;

    repository::delete_comment(&state.db_pool, comment.id).await?;

    info!(%identifier, "comment deleted");

    Ok(StatusCode::NO_CONTENT)
}
