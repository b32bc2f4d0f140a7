use std::{
    io::ErrorKind,
    path::{Path as FsPath, PathBuf},
    sync::Arc,
};

use axum::{
    Json,
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, Path, State, multipart::MultipartError},
    http::StatusCode,
};
use tracing::{info, warn};
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::{
    infrastructure::AppState,
    server::{
        ApiError, ApiJson,
        helpers::{FieldErrors, IMAGE_NAME_LEN, is_valid_sub_name, make_id},
        repository::{
            self, SubRow, find_sub, insert_sub, list_posts_for_sub, sub_name_taken,
            update_sub_details, update_sub_images,
        },
        session::{AuthUser, Viewer},
        shared::{CreateSubRequest, ImageKind, PostView, SubDetail, SubView, UpdateSubRequest},
    },
};

const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

pub fn router() -> OpenApiRouter<Arc<AppState>> {
    OpenApiRouter::new()
        .routes(routes!(upload_sub_image))
        .layer(DefaultBodyLimit::max(MAX_IMAGE_BYTES + 64 * 1024))
        .routes(routes!(create_sub))
        .routes(routes!(get_sub, update_sub, delete_sub))
        .routes(routes!(search_subs))
}

impl From<MultipartError> for ApiError {
    fn from(error: MultipartError) -> Self {
        ApiError::BadRequest(format!("Invalid multipart body: {}", error))
    }
}

impl CreateSubRequest {
    fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::default();

        if self.name.is_empty() {
            errors.add("name", "Name must not be empty");
        } else if !is_valid_sub_name(&self.name) {
            errors.add(
                "name",
                "Name may only contain letters, digits and underscores",
            );
        }
        if self.title.is_empty() {
            errors.add("title", "Title must not be empty");
        }

        errors
    }
}

async fn owned_sub(state: &AppState, name: &str, username: &str) -> Result<SubRow, ApiError> {
    let sub = find_sub(&state.db_pool, name)
        .await?
        .ok_or_else(|| ApiError::NotFound("Sub not found".into()))?;

    if sub.username != username {
        return Err(ApiError::Forbidden("You dont own this sub".into()));
    }

    Ok(sub)
}

fn image_path(upload_dir: &str, urn: &str) -> PathBuf {
    FsPath::new(upload_dir).join(urn)
}

async fn remove_image(upload_dir: &str, urn: &str) {
    match tokio::fs::remove_file(image_path(upload_dir, urn)).await {
        Ok(()) => {}
        Err(error) if error.kind() == ErrorKind::NotFound => {}
        Err(error) => warn!("Could not remove image {}: {}", urn, error),
    }
}

/// Create a sub
#[utoipa::path(
        post,
        path = "/",
        request_body = CreateSubRequest,
        responses(
            (status = 200, description = "The new sub.", body = SubView),
            (status = 400, description = "Invalid or taken name, empty title; keyed by field."),
            (status = 401, description = "Not logged in."),
        ),
        tag = "subs"
    )]
#[axum::debug_handler(state = Arc<AppState>)]
async fn create_sub(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    ApiJson(request): ApiJson<CreateSubRequest>,
) -> Result<Json<SubView>, ApiError> {
    let mut errors = request.validate();
    if !request.name.is_empty() && sub_name_taken(&state.db_pool, &request.name).await? {
        errors.add("name", "Sub exists already");
    }
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors.into_inner()));
    }

    let description = request.description.as_deref().filter(|d| !d.is_empty());
    let sub = insert_sub(
        &state.db_pool,
        &request.name,
        &request.title,
        description,
        &user.username,
    )
    .await?;

    info!(sub = %sub.name, owner = %user.username, "sub created");

    Ok(Json(SubView::from_row(sub, &state.settings.app_url)))
}

/// A sub with its posts, newest first
#[utoipa::path(
        get,
        path = "/{name}",
        params(("name" = String, Path, description = "Sub name")),
        responses(
            (status = 200, description = "The sub and its posts.", body = SubDetail),
            (status = 404, description = "No such sub."),
        ),
        tag = "subs"
    )]
#[axum::debug_handler(state = Arc<AppState>)]
async fn get_sub(
    State(state): State<Arc<AppState>>,
    viewer: Viewer,
    Path(name): Path<String>,
) -> Result<Json<SubDetail>, ApiError> {
    let sub = find_sub(&state.db_pool, &name)
        .await?
        .ok_or_else(|| ApiError::NotFound("Sub not found".into()))?;

    let app_url = &state.settings.app_url;
    let posts = list_posts_for_sub(&state.db_pool, viewer.username(), &sub.name)
        .await?
        .into_iter()
        .map(|post| PostView::from_row(post, app_url, false))
        .collect();

    Ok(Json(SubDetail {
        sub: SubView::from_row(sub, app_url),
        posts,
    }))
}

/// Edit a sub's title or description
#[utoipa::path(
        patch,
        path = "/{name}",
        params(("name" = String, Path, description = "Sub name")),
        request_body = UpdateSubRequest,
        responses(
            (status = 200, description = "The updated sub.", body = SubView),
            (status = 400, description = "Empty title."),
            (status = 403, description = "Not the owner."),
            (status = 404, description = "No such sub."),
        ),
        tag = "subs"
    )]
#[axum::debug_handler(state = Arc<AppState>)]
async fn update_sub(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(name): Path<String>,
    ApiJson(request): ApiJson<UpdateSubRequest>,
) -> Result<Json<SubView>, ApiError> {
    let sub = owned_sub(&state, &name, &user.username).await?;

    let title = request.title.unwrap_or(sub.title);
    if title.is_empty() {
        return Err(ApiError::field("title", "Title must not be empty"));
    }
    let description = match request.description {
        Some(description) if description.is_empty() => None,
        Some(description) => Some(description),
        None => sub.description,
    };

    let sub = update_sub_details(&state.db_pool, &sub.name, &title, description.as_deref()).await?;

    Ok(Json(SubView::from_row(sub, &state.settings.app_url)))
}

/// Delete a sub with all of its posts
#[utoipa::path(
        delete,
        path = "/{name}",
        params(("name" = String, Path, description = "Sub name")),
        responses(
            (status = 204, description = "Sub deleted."),
            (status = 403, description = "Not the owner."),
            (status = 404, description = "No such sub."),
        ),
        tag = "subs"
    )]
#[axum::debug_handler(state = Arc<AppState>)]
async fn delete_sub(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    let sub = owned_sub(&state, &name, &user.username).await?;

    repository::delete_sub(&state.db_pool, &sub.name).await?;

    for urn in [&sub.image_urn, &sub.banner_urn].into_iter().flatten() {
        remove_image(&state.settings.upload_dir, urn).await;
    }

    info!(sub = %sub.name, "sub deleted");

    Ok(StatusCode::NO_CONTENT)
}

struct UploadedFile {
    extension: String,
    bytes: Bytes,
}

fn image_extension(file_name: Option<&str>, content_type: &str) -> Result<String, ApiError> {
    let default = match content_type {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        _ => return Err(ApiError::BadRequest("File not supported".into())),
    };

    let extension = file_name
        .and_then(|name| FsPath::new(name).extension())
        .and_then(|extension| extension.to_str())
        .map(str::to_ascii_lowercase)
        .filter(|extension| matches!(extension.as_str(), "jpg" | "jpeg" | "png"))
        .unwrap_or_else(|| default.to_string());

    Ok(extension)
}

/// Upload a sub's image or banner
#[utoipa::path(
        post,
        path = "/{name}/image",
        params(("name" = String, Path, description = "Sub name")),
        request_body(
            content_type = "multipart/form-data",
            description = "Field `type` (`image` or `banner`) and field `file` (JPEG or PNG)."
        ),
        responses(
            (status = 200, description = "The sub with its new image.", body = SubView),
            (status = 400, description = "Invalid type, unsupported or missing file."),
            (status = 403, description = "Not the owner."),
            (status = 404, description = "No such sub."),
        ),
        tag = "subs"
    )]
#[axum::debug_handler(state = Arc<AppState>)]
async fn upload_sub_image(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(name): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<SubView>, ApiError> {
    let sub = owned_sub(&state, &name, &user.username).await?;

    let mut kind = None;
    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("type") => kind = Some(field.text().await?),
            Some("file") => {
                let extension = image_extension(
                    field.file_name(),
                    field.content_type().unwrap_or_default(),
                )?;
                let bytes = field.bytes().await?;
                upload = Some(UploadedFile { extension, bytes });
            }
            _ => {}
        }
    }

    let kind = match kind.as_deref() {
        Some("image") => ImageKind::Image,
        Some("banner") => ImageKind::Banner,
        _ => return Err(ApiError::BadRequest("invalid type".into())),
    };
    let upload = upload.ok_or_else(|| ApiError::BadRequest("No file uploaded".into()))?;
    if upload.bytes.len() > MAX_IMAGE_BYTES {
        return Err(ApiError::BadRequest("File too large".into()));
    }

    let urn = format!("{}.{}", make_id(IMAGE_NAME_LEN), upload.extension);
    tokio::fs::write(image_path(&state.settings.upload_dir, &urn), &upload.bytes).await?;

    let (image_urn, banner_urn, old_urn) = match kind {
        ImageKind::Image => (Some(urn.as_str()), sub.banner_urn.as_deref(), &sub.image_urn),
        ImageKind::Banner => (sub.image_urn.as_deref(), Some(urn.as_str()), &sub.banner_urn),
    };
    let updated = update_sub_images(&state.db_pool, &sub.name, image_urn, banner_urn).await;
    let updated = match updated {
        Ok(updated) => updated,
        Err(error) => {
            remove_image(&state.settings.upload_dir, &urn).await;
            return Err(error);
        }
    };

    if let Some(old_urn) = old_urn {
        remove_image(&state.settings.upload_dir, old_urn).await;
    }

    info!(sub = %sub.name, %kind, %urn, "sub image uploaded");

    Ok(Json(SubView::from_row(updated, &state.settings.app_url)))
}

/// Subs whose name starts with the query, case-insensitively
#[utoipa::path(
        get,
        path = "/search/{name}",
        params(("name" = String, Path, description = "Name prefix")),
        responses(
            (status = 200, description = "Matching subs.", body = Vec<SubView>),
            (status = 400, description = "Blank query."),
        ),
        tag = "subs"
    )]
#[axum::debug_handler]
async fn search_subs(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Vec<SubView>>, ApiError> {
    let prefix = name.trim().to_lowercase();
    if prefix.is_empty() {
        return Err(ApiError::BadRequest("Name must not be empty".into()));
    }

    let subs = repository::search_subs(&state.db_pool, &prefix)
        .await?
        .into_iter()
        .map(|sub| SubView::from_row(sub, &state.settings.app_url))
        .collect();

    Ok(Json(subs))
}
