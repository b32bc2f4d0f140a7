use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_textual::DisplaySerde;
use utoipa::{IntoParams, ToSchema};

use crate::server::repository::{CommentRow, PostRow, SubRow, TopSubRow, UserRow};

pub const DEFAULT_SUB_IMAGE_URL: &str = "https://www.gravatar.com/avatar?d=mp&f=y";

pub fn timestamp(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap_or_default()
}

fn image_url(app_url: &str, urn: &str) -> String {
    format!("{}/images/{}", app_url.trim_end_matches('/'), urn)
}

// responses

#[derive(Serialize, ToSchema, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub username: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<UserRow> for UserView {
    fn from(user: UserRow) -> Self {
        Self {
            username: user.username,
            email: user.email,
            created_at: timestamp(user.created_at),
            updated_at: timestamp(user.updated_at),
        }
    }
}

#[derive(Serialize, ToSchema, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SubView {
    pub name: String,
    pub title: String,
    pub description: Option<String>,
    pub image_urn: Option<String>,
    pub banner_urn: Option<String>,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub image_url: String,
    pub banner_url: Option<String>,
}

impl SubView {
    pub fn from_row(sub: SubRow, app_url: &str) -> Self {
        Self {
            image_url: sub
                .image_urn
                .as_deref()
                .map(|urn| image_url(app_url, urn))
                .unwrap_or_else(|| DEFAULT_SUB_IMAGE_URL.to_string()),
            banner_url: sub.banner_urn.as_deref().map(|urn| image_url(app_url, urn)),
            name: sub.name,
            title: sub.title,
            description: sub.description,
            image_urn: sub.image_urn,
            banner_urn: sub.banner_urn,
            username: sub.username,
            created_at: timestamp(sub.created_at),
            updated_at: timestamp(sub.updated_at),
        }
    }
}

#[derive(Serialize, ToSchema, Clone, Debug)]
pub struct SubDetail {
    #[serde(flatten)]
    pub sub: SubView,
    pub posts: Vec<PostView>,
}

#[derive(Serialize, ToSchema, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TopSub {
    pub name: String,
    pub title: String,
    pub image_url: String,
    pub post_count: i64,
}

impl TopSub {
    pub fn from_row(sub: TopSubRow, app_url: &str) -> Self {
        Self {
            image_url: sub
                .image_urn
                .as_deref()
                .map(|urn| image_url(app_url, urn))
                .unwrap_or_else(|| DEFAULT_SUB_IMAGE_URL.to_string()),
            name: sub.name,
            title: sub.title,
            post_count: sub.post_count,
        }
    }
}

#[derive(Serialize, ToSchema, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    pub identifier: String,
    pub title: String,
    pub slug: String,
    pub body: Option<String>,
    pub sub_name: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub url: String,
    pub comment_count: i64,
    pub vote_score: i64,
    /// Only present for authenticated viewers; 0 when they have not voted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_vote: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<SubView>,
}

impl PostView {
    /// `with_sub` embeds the owning sub, which the sub page leaves out.
    pub fn from_row(post: PostRow, app_url: &str, with_sub: bool) -> Self {
        let sub = with_sub.then(|| {
            SubView::from_row(
                SubRow {
                    name: post.sub_name.clone(),
                    title: post.sub_title,
                    description: post.sub_description,
                    image_urn: post.sub_image_urn,
                    banner_urn: post.sub_banner_urn,
                    username: post.sub_username,
                    created_at: post.sub_created_at,
                    updated_at: post.sub_updated_at,
                },
                app_url,
            )
        });

        Self {
            url: format!("/r/{}/{}/{}", post.sub_name, post.identifier, post.slug),
            identifier: post.identifier,
            title: post.title,
            slug: post.slug,
            body: post.body,
            sub_name: post.sub_name,
            username: post.username,
            created_at: timestamp(post.created_at),
            updated_at: timestamp(post.updated_at),
            comment_count: post.comment_count,
            vote_score: post.vote_score,
            user_vote: post.user_vote,
            sub,
        }
    }
}

#[derive(Serialize, ToSchema, Clone, Debug)]
pub struct PostDetail {
    #[serde(flatten)]
    pub post: PostView,
    pub comments: Vec<CommentView>,
}

#[derive(Serialize, ToSchema, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CommentView {
    pub identifier: String,
    pub body: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub vote_score: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_vote: Option<i64>,
}

impl From<CommentRow> for CommentView {
    fn from(comment: CommentRow) -> Self {
        Self {
            identifier: comment.identifier,
            body: comment.body,
            username: comment.username,
            created_at: timestamp(comment.created_at),
            updated_at: timestamp(comment.updated_at),
            vote_score: comment.vote_score,
            user_vote: comment.user_vote,
        }
    }
}

#[derive(Serialize, ToSchema, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedPosts {
    pub has_more: bool,
    pub posts: Vec<PostView>,
}

#[derive(Serialize, Deserialize, ToSchema, Clone, Debug)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Serialize, ToSchema, Clone, Debug)]
pub struct ErrorBody {
    pub error: String,
}

// requests; missing fields deserialize as empty so they surface as validation errors

#[derive(Deserialize, ToSchema, Clone, Debug, Default)]
#[serde(default)]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    pub password: String,
}

#[derive(Deserialize, ToSchema, Clone, Debug, Default)]
#[serde(default)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize, ToSchema, Clone, Debug, Default)]
#[serde(default)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Deserialize, ToSchema, Clone, Debug, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub token: String,
    pub new_password: String,
}

#[derive(Deserialize, ToSchema, Clone, Debug, Default)]
#[serde(default)]
pub struct CreateSubRequest {
    pub name: String,
    pub title: String,
    pub description: Option<String>,
}

#[derive(Deserialize, ToSchema, Clone, Debug, Default)]
#[serde(default)]
pub struct UpdateSubRequest {
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Deserialize, ToSchema, Clone, Debug, Default)]
#[serde(default)]
pub struct CreatePostRequest {
    pub title: String,
    pub body: Option<String>,
    pub sub: String,
}

#[derive(Deserialize, ToSchema, Clone, Debug, Default)]
#[serde(default)]
pub struct UpdatePostRequest {
    pub title: Option<String>,
    pub body: Option<String>,
}

#[derive(Deserialize, ToSchema, Clone, Debug, Default)]
#[serde(default)]
pub struct CommentRequest {
    pub body: String,
}

#[derive(Deserialize, ToSchema, Clone, Debug, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct VoteRequest {
    pub identifier: String,
    pub slug: String,
    pub comment_identifier: Option<String>,
    /// Kept as raw JSON so a string or a fraction is answered like an out-of-range number.
    #[schema(value_type = Option<i64>)]
    pub value: Option<serde_json::Value>,
}

#[derive(Deserialize, IntoParams, Clone, Debug, Default)]
#[serde(default)]
pub struct PageQuery {
    /// Zero based page number.
    pub page: Option<u32>,
    /// Posts per page, 1 to 50.
    pub count: Option<u32>,
}

#[derive(Deserialize, IntoParams, Clone, Debug, Default)]
#[serde(default)]
pub struct CursorQuery {
    /// Posts per page, 1 to 50.
    pub limit: Option<u32>,
    /// `createdAt` of the last post already shown.
    pub cursor: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize, ToSchema, DisplaySerde, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Image,
    Banner,
}
