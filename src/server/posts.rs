use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use tracing::info;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::{
    infrastructure::AppState,
    server::{
        ApiError, ApiJson,
        helpers::{COMMENT_IDENTIFIER_LEN, POST_IDENTIFIER_LEN, make_id, slugify},
        repository::{
            self, PostRow, find_comment, find_sub, insert_comment, insert_post, list_comments,
            list_posts_before,
        },
        session::{AuthUser, Viewer},
        shared::{
            CommentRequest, CommentView, CreatePostRequest, CursorQuery, PageQuery,
            PaginatedPosts, PostView, UpdatePostRequest,
        },
    },
};

const DEFAULT_PAGE_SIZE: u32 = 8;
const DEFAULT_CURSOR_LIMIT: u32 = 10;
const MAX_PAGE_SIZE: u32 = 50;

pub fn router() -> OpenApiRouter<Arc<AppState>> {
    OpenApiRouter::new()
        .routes(routes!(create_post, get_posts))
        .routes(routes!(get_paginated_posts))
        .routes(routes!(get_post, update_post, delete_post))
        .routes(routes!(comment_on_post, get_post_comments))
}

/// The post at `identifier`/`slug` as seen by `viewer`, or 404.
pub async fn fetch_post(
    state: &AppState,
    viewer: Option<&str>,
    identifier: &str,
    slug: &str,
) -> Result<PostRow, ApiError> {
    repository::find_post(&state.db_pool, viewer, identifier, slug)
        .await?
        .ok_or_else(|| ApiError::NotFound("Post not found".into()))
}

async fn owned_post(
    state: &AppState,
    username: &str,
    identifier: &str,
    slug: &str,
) -> Result<PostRow, ApiError> {
    let post = fetch_post(state, Some(username), identifier, slug).await?;

    if post.username != username {
        return Err(ApiError::Forbidden("You dont own this post".into()));
    }

    Ok(post)
}

/// Submit a post to a sub
#[utoipa::path(
        post,
        path = "/",
        request_body = CreatePostRequest,
        responses(
            (status = 200, description = "The new post.", body = PostView),
            (status = 400, description = "Empty title."),
            (status = 401, description = "Not logged in."),
            (status = 404, description = "No such sub."),
        ),
        tag = "posts"
    )]
#[axum::debug_handler(state = Arc<AppState>)]
async fn create_post(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    ApiJson(request): ApiJson<CreatePostRequest>,
) -> Result<Json<PostView>, ApiError> {
    if request.title.is_empty() {
        return Err(ApiError::field("title", "Title must not be empty"));
    }

    let sub = find_sub(&state.db_pool, &request.sub)
        .await?
        .ok_or_else(|| ApiError::NotFound("Sub not found".into()))?;

    let identifier = make_id(POST_IDENTIFIER_LEN);
    let slug = Some(slugify(&request.title))
        .filter(|slug| !slug.is_empty())
        .unwrap_or_else(|| "post".to_string());
    let body = request.body.as_deref().filter(|body| !body.is_empty());

    insert_post(
        &state.db_pool,
        &identifier,
        &request.title,
        &slug,
        body,
        &sub.name,
        &user.username,
    )
    .await?;

    info!(%identifier, sub = %sub.name, author = %user.username, "post created");

    let post = fetch_post(&state, Some(&user.username), &identifier, &slug).await?;

    Ok(Json(PostView::from_row(post, &state.settings.app_url, true)))
}

/// Newest posts, one page at a time
#[utoipa::path(
        get,
        path = "/",
        params(PageQuery),
        responses(
            (status = 200, description = "One page of posts, newest first.", body = Vec<PostView>),
        ),
        tag = "posts"
    )]
#[axum::debug_handler(state = Arc<AppState>)]
async fn get_posts(
    State(state): State<Arc<AppState>>,
    viewer: Viewer,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<PostView>>, ApiError> {
    let page = i64::from(query.page.unwrap_or(0));
    let count = i64::from(
        query
            .count
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE),
    );

    let posts = repository::list_posts(&state.db_pool, viewer.username(), page * count, count)
        .await?
        .into_iter()
        .map(|post| PostView::from_row(post, &state.settings.app_url, true))
        .collect();

    Ok(Json(posts))
}

/// Newest posts older than a cursor
#[utoipa::path(
        get,
        path = "/paginated",
        params(CursorQuery),
        responses(
            (status = 200, description = "Posts older than the cursor and whether more exist.", body = PaginatedPosts),
        ),
        tag = "posts"
    )]
#[axum::debug_handler(state = Arc<AppState>)]
async fn get_paginated_posts(
    State(state): State<Arc<AppState>>,
    viewer: Viewer,
    Query(query): Query<CursorQuery>,
) -> Result<Json<PaginatedPosts>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_CURSOR_LIMIT)
        .clamp(1, MAX_PAGE_SIZE) as usize;
    let cursor = query.cursor.map(|cursor| cursor.timestamp_micros());

    // one extra row tells whether another page exists
    let mut posts = list_posts_before(
        &state.db_pool,
        viewer.username(),
        cursor,
        limit as i64 + 1,
    )
    .await?;

    let has_more = posts.len() > limit;
    posts.truncate(limit);

    Ok(Json(PaginatedPosts {
        has_more,
        posts: posts
            .into_iter()
            .map(|post| PostView::from_row(post, &state.settings.app_url, true))
            .collect(),
    }))
}

/// A single post
#[utoipa::path(
        get,
        path = "/{identifier}/{slug}",
        params(
            ("identifier" = String, Path, description = "Post identifier"),
            ("slug" = String, Path, description = "Post slug"),
        ),
        responses(
            (status = 200, description = "The post.", body = PostView),
            (status = 404, description = "No such post."),
        ),
        tag = "posts"
    )]
#[axum::debug_handler(state = Arc<AppState>)]
async fn get_post(
    State(state): State<Arc<AppState>>,
    viewer: Viewer,
    Path((identifier, slug)): Path<(String, String)>,
) -> Result<Json<PostView>, ApiError> {
    let post = fetch_post(&state, viewer.username(), &identifier, &slug).await?;

    Ok(Json(PostView::from_row(post, &state.settings.app_url, true)))
}

/// Edit a post's title or body
#[utoipa::path(
        patch,
        path = "/{identifier}/{slug}",
        params(
            ("identifier" = String, Path, description = "Post identifier"),
            ("slug" = String, Path, description = "Post slug"),
        ),
        request_body = UpdatePostRequest,
        description = "The slug keeps its original value so existing links stay valid.",
        responses(
            (status = 200, description = "The updated post.", body = PostView),
            (status = 400, description = "Empty title."),
            (status = 403, description = "Not the author."),
            (status = 404, description = "No such post."),
        ),
        tag = "posts"
    )]
#[axum::debug_handler(state = Arc<AppState>)]
async fn update_post(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path((identifier, slug)): Path<(String, String)>,
    ApiJson(request): ApiJson<UpdatePostRequest>,
) -> Result<Json<PostView>, ApiError> {
    let post = owned_post(&state, &user.username, &identifier, &slug).await?;

    let title = request.title.unwrap_or(post.title);
    if title.is_empty() {
        return Err(ApiError::field("title", "Title must not be empty"));
    }
    let body = match request.body {
        Some(body) if body.is_empty() => None,
        Some(body) => Some(body),
        None => post.body,
    };

    repository::update_post(&state.db_pool, post.id, &title, body.as_deref()).await?;

    let post = fetch_post(&state, Some(&user.username), &identifier, &slug).await?;

    Ok(Json(PostView::from_row(post, &state.settings.app_url, true)))
}

/// Delete a post with its comments and votes
#[utoipa::path(
        delete,
        path = "/{identifier}/{slug}",
        params(
            ("identifier" = String, Path, description = "Post identifier"),
            ("slug" = String, Path, description = "Post slug"),
        ),
        responses(
            (status = 204, description = "Post deleted."),
            (status = 403, description = "Not the author."),
            (status = 404, description = "No such post."),
        ),
        tag = "posts"
    )]
#[axum::debug_handler(state = Arc<AppState>)]
async fn delete_post(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path((identifier, slug)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let post = owned_post(&state, &user.username, &identifier, &slug).await?;

    repository::delete_post(&state.db_pool, post.id).await?;

    info!(%identifier, "post deleted");

    Ok(StatusCode::NO_CONTENT)
}

/// Comment on a post
#[utoipa::path(
        post,
        path = "/{identifier}/{slug}/comments",
        params(
            ("identifier" = String, Path, description = "Post identifier"),
            ("slug" = String, Path, description = "Post slug"),
        ),
        request_body = CommentRequest,
        responses(
            (status = 200, description = "The new comment.", body = CommentView),
            (status = 400, description = "Empty comment."),
            (status = 401, description = "Not logged in."),
            (status = 404, description = "No such post."),
        ),
        tag = "posts"
    )]
#[axum::debug_handler(state = Arc<AppState>)]
async fn comment_on_post(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path((identifier, slug)): Path<(String, String)>,
    ApiJson(request): ApiJson<CommentRequest>,
) -> Result<Json<CommentView>, ApiError> {
    if request.body.is_empty() {
        return Err(ApiError::field("body", "Comment must not be empty"));
    }

    let post = fetch_post(&state, None, &identifier, &slug).await?;

    let comment_identifier = make_id(COMMENT_IDENTIFIER_LEN);
    insert_comment(
        &state.db_pool,
        &comment_identifier,
        &request.body,
        &user.username,
        post.id,
    )
    .await?;

    let comment = find_comment(&state.db_pool, Some(&user.username), &comment_identifier)
        .await?
        .ok_or_else(|| ApiError::InternalError("Inserted comment is missing".into()))?;

    Ok(Json(comment.into()))
}

/// Comments on a post, newest first
#[utoipa::path(
        get,
        path = "/{identifier}/{slug}/comments",
        params(
            ("identifier" = String, Path, description = "Post identifier"),
            ("slug" = String, Path, description = "Post slug"),
        ),
        responses(
            (status = 200, description = "The comments.", body = Vec<CommentView>),
            (status = 404, description = "No such post."),
        ),
        tag = "posts"
    )]
#[axum::debug_handler(state = Arc<AppState>)]
async fn get_post_comments(
    State(state): State<Arc<AppState>>,
    viewer: Viewer,
    Path((identifier, slug)): Path<(String, String)>,
) -> Result<Json<Vec<CommentView>>, ApiError> {
    let post = fetch_post(&state, None, &identifier, &slug).await?;

    let comments = list_comments(&state.db_pool, viewer.username(), post.id)
        .await?
        .into_iter()
        .map(CommentView::from)
        .collect();

    Ok(Json(comments))
}
