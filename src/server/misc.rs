use std::sync::Arc;

use axum::{Json, extract::State};
use tracing::debug;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::{
    infrastructure::AppState,
    server::{
        ApiError, ApiJson,
        posts::fetch_post,
        repository::{
            self, VoteTarget, delete_vote, find_comment_id, find_post_id, find_vote, insert_vote,
            list_comments, update_vote,
        },
        session::AuthUser,
        shared::{CommentView, PostDetail, PostView, TopSub, VoteRequest},
    },
};

const TOP_SUBS_LIMIT: i64 = 5;

pub fn router() -> OpenApiRouter<Arc<AppState>> {
    OpenApiRouter::new()
        .routes(routes!(vote))
        .routes(routes!(top_subs))
}

/// What casting `value` does to a user's existing vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteAction {
    Create(i64),
    Update(i64),
    Delete,
    Unchanged,
    /// Retracting a vote that was never cast.
    Missing,
}

pub fn resolve_vote(existing: Option<i64>, value: i64) -> VoteAction {
    match (existing, value) {
        (None, 0) => VoteAction::Missing,
        (None, value) => VoteAction::Create(value),
        (Some(_), 0) => VoteAction::Delete,
        (Some(current), value) if current == value => VoteAction::Unchanged,
        (Some(_), value) => VoteAction::Update(value),
    }
}

/// Up, down or retract a vote on a post or one of its comments
#[utoipa::path(
        post,
        path = "/vote",
        request_body = VoteRequest,
        description = "Targets the comment when `commentIdentifier` is set, the post otherwise.",
        responses(
            (status = 200, description = "The post with its comments, as the voter now sees them.", body = PostDetail),
            (status = 400, description = "Value other than -1, 0 or 1."),
            (status = 401, description = "Not logged in."),
            (status = 404, description = "No such post, comment or vote."),
        ),
        tag = "misc"
    )]
#[axum::debug_handler(state = Arc<AppState>)]
async fn vote(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    ApiJson(request): ApiJson<VoteRequest>,
) -> Result<Json<PostDetail>, ApiError> {
    let value = match request.value.as_ref().and_then(serde_json::Value::as_i64) {
        Some(value @ -1..=1) => value,
        _ => return Err(ApiError::field("value", "Value must be -1, 0 or 1")),
    };

    let mut tx = state.db_pool.begin().await?;

    let post_id = find_post_id(&mut *tx, &request.identifier, &request.slug)
        .await?
        .ok_or_else(|| ApiError::NotFound("Post not found".into()))?;

    let comment_identifier = request
        .comment_identifier
        .as_deref()
        .filter(|identifier| !identifier.is_empty());
    let target = match comment_identifier {
        Some(comment_identifier) => VoteTarget::Comment(
            find_comment_id(&mut *tx, comment_identifier, post_id)
                .await?
                .ok_or_else(|| ApiError::NotFound("Comment not found".into()))?,
        ),
        None => VoteTarget::Post(post_id),
    };

    let existing = find_vote(&mut *tx, &user.username, target).await?;
    let action = resolve_vote(existing.as_ref().map(|vote| vote.value), value);
    debug!(voter = %user.username, ?target, ?action, "casting vote");

    match (action, existing) {
        (VoteAction::Missing, _) => return Err(ApiError::NotFound("Vote not found".into())),
        (VoteAction::Create(value), _) => {
            insert_vote(&mut *tx, &user.username, target, value).await?
        }
        (VoteAction::Update(value), Some(vote)) => update_vote(&mut *tx, vote.id, value).await?,
        (VoteAction::Delete, Some(vote)) => delete_vote(&mut *tx, vote.id).await?,
        (VoteAction::Unchanged, _) => {}
        (VoteAction::Update(_) | VoteAction::Delete, None) => {
            return Err(ApiError::InternalError(
                "vote resolved against a missing row".into(),
            ));
        }
    }

    tx.commit().await?;

    let viewer = Some(user.username.as_str());
    let post = fetch_post(&state, viewer, &request.identifier, &request.slug).await?;
    let comments = list_comments(&state.db_pool, viewer, post.id)
        .await?
        .into_iter()
        .map(CommentView::from)
        .collect();

    Ok(Json(PostDetail {
        post: PostView::from_row(post, &state.settings.app_url, true),
        comments,
    }))
}

/// The subs with the most posts
#[utoipa::path(
        get,
        path = "/top-subs",
        responses(
            (status = 200, description = "Up to five subs, most posts first.", body = Vec<TopSub>),
        ),
        tag = "misc"
    )]
#[axum::debug_handler]
async fn top_subs(State(state): State<Arc<AppState>>) -> Result<Json<Vec<TopSub>>, ApiError> {
    let subs = repository::top_subs(&state.db_pool, TOP_SUBS_LIMIT)
        .await?
        .into_iter()
        .map(|sub| TopSub::from_row(sub, &state.settings.app_url))
        .collect();

    Ok(Json(subs))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::{Value, json};

    use super::*;
    use crate::server::test_support::TestApp;

    #[test]
    fn vote_transitions() {
        assert_eq!(resolve_vote(None, 0), VoteAction::Missing);
        assert_eq!(resolve_vote(None, 1), VoteAction::Create(1));
        assert_eq!(resolve_vote(None, -1), VoteAction::Create(-1));
        assert_eq!(resolve_vote(Some(1), 0), VoteAction::Delete);
        assert_eq!(resolve_vote(Some(-1), 0), VoteAction::Delete);
        assert_eq!(resolve_vote(Some(1), -1), VoteAction::Update(-1));
        assert_eq!(resolve_vote(Some(-1), 1), VoteAction::Update(1));
        assert_eq!(resolve_vote(Some(1), 1), VoteAction::Unchanged);
        assert_eq!(resolve_vote(Some(-1), -1), VoteAction::Unchanged);
    }

    async fn vote_on(
        app: &TestApp,
        cookie: &str,
        post: &Value,
        comment: Option<&str>,
        value: i64,
    ) -> (StatusCode, Value) {
        let response = app
            .post(
                "/api/misc/vote",
                Some(cookie),
                json!({
                    "identifier": post["identifier"],
                    "slug": post["slug"],
                    "commentIdentifier": comment,
                    "value": value,
                }),
            )
            .await;

        (response.status, response.json)
    }

    #[tokio::test]
    async fn votes_on_a_post_move_the_score() {
        let app = TestApp::new().await;
        let alice = app.login_as("alice").await;
        let bob = app.login_as("bob").await;
        app.create_sub(&alice, "rust").await;
        let post = app.create_post(&alice, "rust", "Async traits").await;

        let (status, detail) = vote_on(&app, &alice, &post, None, 1).await;
        assert_eq!(status, StatusCode::OK, "{}", detail);
        assert_eq!(detail["voteScore"], 1);
        assert_eq!(detail["userVote"], 1);
        assert_eq!(detail["comments"], json!([]));

        let (_, detail) = vote_on(&app, &bob, &post, None, -1).await;
        assert_eq!(detail["voteScore"], 0);
        assert_eq!(detail["userVote"], -1);

        // same value twice leaves the ledger alone
        let (_, detail) = vote_on(&app, &bob, &post, None, -1).await;
        assert_eq!(detail["voteScore"], 0);

        let (_, detail) = vote_on(&app, &bob, &post, None, 1).await;
        assert_eq!(detail["voteScore"], 2);
        assert_eq!(detail["userVote"], 1);

        let (_, detail) = vote_on(&app, &alice, &post, None, 0).await;
        assert_eq!(detail["voteScore"], 1);
        assert_eq!(detail["userVote"], 0);

        let (status, body) = vote_on(&app, &alice, &post, None, 0).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Vote not found");

        let seen_by_alice = app.get(&TestApp::post_path(&post), Some(&alice)).await;
        assert_eq!(seen_by_alice.json["voteScore"], 1);
        assert_eq!(seen_by_alice.json["userVote"], 0);
    }

    #[tokio::test]
    async fn votes_on_a_comment_leave_the_post_alone() {
        let app = TestApp::new().await;
        let alice = app.login_as("alice").await;
        app.create_sub(&alice, "rust").await;
        let post = app.create_post(&alice, "rust", "Pinning").await;
        let comment = app
            .post(
                &format!("{}/comments", TestApp::post_path(&post)),
                Some(&alice),
                json!({ "body": "Pin is hard" }),
            )
            .await;
        let comment_identifier = comment.json["identifier"].as_str().unwrap().to_string();

        let (status, detail) = vote_on(&app, &alice, &post, Some(&comment_identifier), -1).await;
        assert_eq!(status, StatusCode::OK, "{}", detail);
        assert_eq!(detail["voteScore"], 0);
        assert_eq!(detail["comments"][0]["voteScore"], -1);
        assert_eq!(detail["comments"][0]["userVote"], -1);

        let (status, body) = vote_on(&app, &alice, &post, Some("missing1"), 1).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Comment not found");
    }

    #[tokio::test]
    async fn vote_needs_a_valid_value_a_post_and_a_session() {
        let app = TestApp::new().await;
        let alice = app.login_as("alice").await;
        app.create_sub(&alice, "rust").await;
        let post = app.create_post(&alice, "rust", "Macros").await;

        let (status, body) = vote_on(&app, &alice, &post, None, 2).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["value"], "Value must be -1, 0 or 1");

        let missing = json!({ "identifier": "nope", "slug": "nope" });
        let (status, _) = vote_on(&app, &alice, &missing, None, 1).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let anonymous = app
            .post(
                "/api/misc/vote",
                None,
                json!({ "identifier": post["identifier"], "slug": post["slug"], "value": 1 }),
            )
            .await;
        assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn vote_value_must_be_an_integer() {
        let app = TestApp::new().await;
        let alice = app.login_as("alice").await;
        app.create_sub(&alice, "rust").await;
        let post = app.create_post(&alice, "rust", "Generics").await;

        for value in [json!("1"), json!(1.5), json!(null), json!([1])] {
            let response = app
                .post(
                    "/api/misc/vote",
                    Some(&alice),
                    json!({ "identifier": post["identifier"], "slug": post["slug"], "value": value.clone() }),
                )
                .await;
            assert_eq!(response.status, StatusCode::BAD_REQUEST, "value {}", value);
            assert_eq!(response.json["value"], "Value must be -1, 0 or 1");
        }

        let unvoted = app.get(&TestApp::post_path(&post), Some(&alice)).await;
        assert_eq!(unvoted.json["voteScore"], 0);
    }

    #[tokio::test]
    async fn empty_comment_identifier_votes_on_the_post() {
        let app = TestApp::new().await;
        let alice = app.login_as("alice").await;
        app.create_sub(&alice, "rust").await;
        let post = app.create_post(&alice, "rust", "Closures").await;

        let (status, detail) = vote_on(&app, &alice, &post, Some(""), 1).await;
        assert_eq!(status, StatusCode::OK, "{}", detail);
        assert_eq!(detail["voteScore"], 1);
        assert_eq!(detail["userVote"], 1);
    }

    #[tokio::test]
    async fn malformed_vote_body_is_a_json_400() {
        let app = TestApp::new().await;
        let alice = app.login_as("alice").await;

        let response = app
            .post("/api/misc/vote", Some(&alice), json!({ "identifier": 7, "value": 1 }))
            .await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert!(response.json["error"].is_string(), "{}", response.json);
    }

    #[tokio::test]
    async fn top_subs_rank_by_post_count() {
        let app = TestApp::new().await;
        let alice = app.login_as("alice").await;
        for name in ["go", "rust", "zig"] {
            app.create_sub(&alice, name).await;
        }
        for title in ["a", "b"] {
            app.create_post(&alice, "rust", title).await;
        }
        app.create_post(&alice, "zig", "c").await;

        let response = app.get("/api/misc/top-subs", None).await;
        assert_eq!(response.status, StatusCode::OK);

        let ranked: Vec<_> = response
            .json
            .as_array()
            .unwrap()
            .iter()
            .map(|sub| (sub["name"].clone(), sub["postCount"].clone()))
            .collect();
        assert_eq!(
            ranked,
            vec![
                (json!("rust"), json!(2)),
                (json!("zig"), json!(1)),
                (json!("go"), json!(0)),
            ]
        );
        assert!(response.json[0]["imageUrl"].as_str().unwrap().starts_with("https://"));
    }
}
