use chrono::Utc;
use sqlx::{FromRow, Pool, Sqlite, SqliteConnection, query, query_as, query_scalar};

use crate::server::ApiError;

impl From<sqlx::Error> for ApiError {
    fn from(error: sqlx::Error) -> Self {
        ApiError::InternalError(format!("SQL query error: {}", error))
    }
}

pub fn now_micros() -> i64 {
    Utc::now().timestamp_micros()
}

#[derive(FromRow, Debug, Clone)]
pub struct UserRow {
    pub email: String,
    pub username: String,
    pub password: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(FromRow, Debug, Clone)]
pub struct SubRow {
    pub name: String,
    pub title: String,
    pub description: Option<String>,
    pub image_urn: Option<String>,
    pub banner_urn: Option<String>,
    pub username: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(FromRow, Debug, Clone)]
pub struct TopSubRow {
    pub name: String,
    pub title: String,
    pub image_urn: Option<String>,
    pub post_count: i64,
}

/// A post joined with its sub, its tallies and the viewer's own vote.
#[derive(FromRow, Debug, Clone)]
pub struct PostRow {
    pub id: i64,
    pub identifier: String,
    pub title: String,
    pub slug: String,
    pub body: Option<String>,
    pub sub_name: String,
    pub username: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub comment_count: i64,
    pub vote_score: i64,
    pub user_vote: Option<i64>,
    pub sub_title: String,
    pub sub_description: Option<String>,
    pub sub_image_urn: Option<String>,
    pub sub_banner_urn: Option<String>,
    pub sub_username: String,
    pub sub_created_at: i64,
    pub sub_updated_at: i64,
}

#[derive(FromRow, Debug, Clone)]
pub struct CommentRow {
    pub id: i64,
    pub identifier: String,
    pub body: String,
    pub username: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub vote_score: i64,
    pub user_vote: Option<i64>,
}

#[derive(FromRow, Debug, Clone)]
pub struct VoteRow {
    pub id: i64,
    pub value: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteTarget {
    Post(i64),
    Comment(i64),
}

const SUB_COLUMNS: &str = r#"
    s.name,
    s.title,
    s.description,
    s.image_urn,
    s.banner_urn,
    s.username,
    s.created_at,
    s.updated_at
"#;

// ?1 is always the viewer's username (or NULL for anonymous viewers)
const POST_SELECT: &str = r#"
    SELECT
        p.id,
        p.identifier,
        p.title,
        p.slug,
        p.body,
        p.sub_name,
        p.username,
        p.created_at,
        p.updated_at,
        (SELECT COUNT(*) FROM comments c WHERE c.post_id = p.id) AS comment_count,
        COALESCE((SELECT SUM(v.value) FROM votes v WHERE v.post_id = p.id), 0) AS vote_score,
        CASE WHEN ?1 IS NULL THEN NULL ELSE COALESCE(
            (SELECT v.value FROM votes v WHERE v.post_id = p.id AND v.username = ?1), 0
        ) END AS user_vote,
        s.title AS sub_title,
        s.description AS sub_description,
        s.image_urn AS sub_image_urn,
        s.banner_urn AS sub_banner_urn,
        s.username AS sub_username,
        s.created_at AS sub_created_at,
        s.updated_at AS sub_updated_at
    FROM
        posts p
        JOIN subs s ON s.name = p.sub_name
"#;

const COMMENT_SELECT: &str = r#"
    SELECT
        c.id,
        c.identifier,
        c.body,
        c.username,
        c.created_at,
        c.updated_at,
        COALESCE((SELECT SUM(v.value) FROM votes v WHERE v.comment_id = c.id), 0) AS vote_score,
        CASE WHEN ?1 IS NULL THEN NULL ELSE COALESCE(
            (SELECT v.value FROM votes v WHERE v.comment_id = c.id AND v.username = ?1), 0
        ) END AS user_vote
    FROM
        comments c
"#;

fn expect_one_row(
    operation: &str,
    result: sqlx::sqlite::SqliteQueryResult,
) -> Result<sqlx::sqlite::SqliteQueryResult, ApiError> {
    if result.rows_affected() != 1 {
        return Err(ApiError::InternalError(format!(
            "{} rows_affected error: {:?}",
            operation, result
        )));
    }

    Ok(result)
}

// users

pub async fn find_user_by_username(
    pool: &Pool<Sqlite>,
    username: &str,
) -> Result<Option<UserRow>, ApiError> {
    let user = query_as::<_, UserRow>(
        r#"
        SELECT
            u.email, u.username, u.password, u.created_at, u.updated_at
        FROM
            users u
        WHERE
            u.username = ?;
        "#,
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;

    Ok(user)
}

pub async fn find_user_by_email(
    pool: &Pool<Sqlite>,
    email: &str,
) -> Result<Option<UserRow>, ApiError> {
    let user = query_as::<_, UserRow>(
        r#"
        SELECT
            u.email, u.username, u.password, u.created_at, u.updated_at
        FROM
            users u
        WHERE
            lower(u.email) = lower(?);
        "#,
    )
    .bind(email)
    .fetch_optional(pool)
    .await?;

    Ok(user)
}

pub async fn insert_user(
    pool: &Pool<Sqlite>,
    email: &str,
    username: &str,
    password_hash: &str,
) -> Result<UserRow, ApiError> {
    let now = now_micros();

    let user = query_as::<_, UserRow>(
        r#"
        INSERT INTO users(email, username, password, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?)
        RETURNING email, username, password, created_at, updated_at;
        "#,
    )
    .bind(email)
    .bind(username)
    .bind(password_hash)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(user)
}

pub async fn update_user_password(
    pool: &Pool<Sqlite>,
    username: &str,
    password_hash: &str,
) -> Result<(), ApiError> {
    let result = query(
        r#"
        UPDATE
            users
        SET
            password = ?,
            updated_at = ?
        WHERE
            username = ?;
        "#,
    )
    .bind(password_hash)
    .bind(now_micros())
    .bind(username)
    .execute(pool)
    .await?;

    expect_one_row("update_user_password", result)?;

    Ok(())
}

// subs

pub async fn find_sub(pool: &Pool<Sqlite>, name: &str) -> Result<Option<SubRow>, ApiError> {
    let sub = query_as::<_, SubRow>(&format!(
        "SELECT {SUB_COLUMNS} FROM subs s WHERE s.name = ?;"
    ))
    .bind(name)
    .fetch_optional(pool)
    .await?;

    Ok(sub)
}

pub async fn sub_name_taken(pool: &Pool<Sqlite>, name: &str) -> Result<bool, ApiError> {
    let taken = query_scalar::<_, bool>(
        r#"
        SELECT EXISTS (
            SELECT
                s.id
            FROM
                subs s
            WHERE
                lower(s.name) = lower(?)
            LIMIT 1
        );
        "#,
    )
    .bind(name)
    .fetch_one(pool)
    .await?;

    Ok(taken)
}

pub async fn insert_sub(
    pool: &Pool<Sqlite>,
    name: &str,
    title: &str,
    description: Option<&str>,
    username: &str,
) -> Result<SubRow, ApiError> {
    let now = now_micros();

    let sub = query_as::<_, SubRow>(
        r#"
        INSERT INTO subs(name, title, description, username, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        RETURNING name, title, description, image_urn, banner_urn, username, created_at, updated_at;
        "#,
    )
    .bind(name)
    .bind(title)
    .bind(description)
    .bind(username)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(sub)
}

pub async fn update_sub_details(
    pool: &Pool<Sqlite>,
    name: &str,
    title: &str,
    description: Option<&str>,
) -> Result<SubRow, ApiError> {
    let sub = query_as::<_, SubRow>(
        r#"
        UPDATE
            subs
        SET
            title = ?,
            description = ?,
            updated_at = ?
        WHERE
            name = ?
        RETURNING name, title, description, image_urn, banner_urn, username, created_at, updated_at;
        "#,
    )
    .bind(title)
    .bind(description)
    .bind(now_micros())
    .bind(name)
    .fetch_one(pool)
    .await?;

    Ok(sub)
}

pub async fn update_sub_images(
    pool: &Pool<Sqlite>,
    name: &str,
    image_urn: Option<&str>,
    banner_urn: Option<&str>,
) -> Result<SubRow, ApiError> {
    let sub = query_as::<_, SubRow>(
        r#"
        UPDATE
            subs
        SET
            image_urn = ?,
            banner_urn = ?,
            updated_at = ?
        WHERE
            name = ?
        RETURNING name, title, description, image_urn, banner_urn, username, created_at, updated_at;
        "#,
    )
    .bind(image_urn)
    .bind(banner_urn)
    .bind(now_micros())
    .bind(name)
    .fetch_one(pool)
    .await?;

    Ok(sub)
}

pub async fn delete_sub(pool: &Pool<Sqlite>, name: &str) -> Result<(), ApiError> {
    let result = query("DELETE FROM subs WHERE name = ?;")
        .bind(name)
        .execute(pool)
        .await?;

    expect_one_row("delete_sub", result)?;

    Ok(())
}

/// Subs whose lowercased name starts with `prefix` (already lowercased and trimmed).
pub async fn search_subs(pool: &Pool<Sqlite>, prefix: &str) -> Result<Vec<SubRow>, ApiError> {
    let pattern = format!("{}%", escape_like(prefix));

    let subs = query_as::<_, SubRow>(&format!(
        r#"
        SELECT {SUB_COLUMNS}
        FROM
            subs s
        WHERE
            lower(s.name) LIKE ? ESCAPE '\'
        ORDER BY
            s.name ASC;
        "#
    ))
    .bind(pattern)
    .fetch_all(pool)
    .await?;

    Ok(subs)
}

pub async fn top_subs(pool: &Pool<Sqlite>, limit: i64) -> Result<Vec<TopSubRow>, ApiError> {
    let subs = query_as::<_, TopSubRow>(
        r#"
        SELECT
            s.name,
            s.title,
            s.image_urn,
            COUNT(p.id) AS post_count
        FROM
            subs s
            LEFT JOIN posts p ON p.sub_name = s.name
        GROUP BY
            s.id
        ORDER BY
            post_count DESC,
            s.name ASC
        LIMIT ?;
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(subs)
}

fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

// posts

pub async fn find_post(
    pool: &Pool<Sqlite>,
    viewer: Option<&str>,
    identifier: &str,
    slug: &str,
) -> Result<Option<PostRow>, ApiError> {
    let post = query_as::<_, PostRow>(&format!(
        "{POST_SELECT} WHERE p.identifier = ?2 AND p.slug = ?3;"
    ))
    .bind(viewer)
    .bind(identifier)
    .bind(slug)
    .fetch_optional(pool)
    .await?;

    Ok(post)
}

pub async fn list_posts(
    pool: &Pool<Sqlite>,
    viewer: Option<&str>,
    offset: i64,
    limit: i64,
) -> Result<Vec<PostRow>, ApiError> {
    let posts = query_as::<_, PostRow>(&format!(
        "{POST_SELECT} ORDER BY p.created_at DESC, p.id DESC LIMIT ?2 OFFSET ?3;"
    ))
    .bind(viewer)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok(posts)
}

/// Newest posts created strictly before `cursor` (microseconds), or the newest overall.
pub async fn list_posts_before(
    pool: &Pool<Sqlite>,
    viewer: Option<&str>,
    cursor: Option<i64>,
    limit: i64,
) -> Result<Vec<PostRow>, ApiError> {
    let posts = query_as::<_, PostRow>(&format!(
        r#"
        {POST_SELECT}
        WHERE
            ?2 IS NULL OR p.created_at < ?2
        ORDER BY
            p.created_at DESC,
            p.id DESC
        LIMIT ?3;
        "#
    ))
    .bind(viewer)
    .bind(cursor)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(posts)
}

pub async fn list_posts_for_sub(
    pool: &Pool<Sqlite>,
    viewer: Option<&str>,
    sub_name: &str,
) -> Result<Vec<PostRow>, ApiError> {
    let posts = query_as::<_, PostRow>(&format!(
        "{POST_SELECT} WHERE p.sub_name = ?2 ORDER BY p.created_at DESC, p.id DESC;"
    ))
    .bind(viewer)
    .bind(sub_name)
    .fetch_all(pool)
    .await?;

    Ok(posts)
}

pub async fn insert_post(
    pool: &Pool<Sqlite>,
    identifier: &str,
    title: &str,
    slug: &str,
    body: Option<&str>,
    sub_name: &str,
    username: &str,
) -> Result<(), ApiError> {
    let now = now_micros();

    let result = query(
        r#"
        INSERT INTO posts(identifier, title, slug, body, sub_name, username, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?);
        "#,
    )
    .bind(identifier)
    .bind(title)
    .bind(slug)
    .bind(body)
    .bind(sub_name)
    .bind(username)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    expect_one_row("insert_post", result)?;

    Ok(())
}

pub async fn update_post(
    pool: &Pool<Sqlite>,
    post_id: i64,
    title: &str,
    body: Option<&str>,
) -> Result<(), ApiError> {
    let result = query(
        r#"
        UPDATE
            posts
        SET
            title = ?,
            body = ?,
            updated_at = ?
        WHERE
            id = ?;
        "#,
    )
    .bind(title)
    .bind(body)
    .bind(now_micros())
    .bind(post_id)
    .execute(pool)
    .await?;

    expect_one_row("update_post", result)?;

    Ok(())
}

pub async fn delete_post(pool: &Pool<Sqlite>, post_id: i64) -> Result<(), ApiError> {
    let result = query("DELETE FROM posts WHERE id = ?;")
        .bind(post_id)
        .execute(pool)
        .await?;

    expect_one_row("delete_post", result)?;

    Ok(())
}

// comments

pub async fn list_comments(
    pool: &Pool<Sqlite>,
    viewer: Option<&str>,
    post_id: i64,
) -> Result<Vec<CommentRow>, ApiError> {
    let comments = query_as::<_, CommentRow>(&format!(
        "{COMMENT_SELECT} WHERE c.post_id = ?2 ORDER BY c.created_at DESC, c.id DESC;"
    ))
    .bind(viewer)
    .bind(post_id)
    .fetch_all(pool)
    .await?;

    Ok(comments)
}

pub async fn find_comment(
    pool: &Pool<Sqlite>,
    viewer: Option<&str>,
    identifier: &str,
) -> Result<Option<CommentRow>, ApiError> {
    let comment = query_as::<_, CommentRow>(&format!(
        "{COMMENT_SELECT} WHERE c.identifier = ?2;"
    ))
    .bind(viewer)
    .bind(identifier)
    .fetch_optional(pool)
    .await?;

    Ok(comment)
}

pub async fn insert_comment(
    pool: &Pool<Sqlite>,
    identifier: &str,
    body: &str,
    username: &str,
    post_id: i64,
) -> Result<(), ApiError> {
    let now = now_micros();

    let result = query(
        r#"
        INSERT INTO comments(identifier, body, username, post_id, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?);
        "#,
    )
    .bind(identifier)
    .bind(body)
    .bind(username)
    .bind(post_id)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    expect_one_row("insert_comment", result)?;

    Ok(())
}

pub async fn update_comment(
    pool: &Pool<Sqlite>,
    comment_id: i64,
    body: &str,
) -> Result<(), ApiError> {
    let result = query(
        r#"
        UPDATE
            comments
        SET
            body = ?,
            updated_at = ?
        WHERE
            id = ?;
        "#,
    )
    .bind(body)
    .bind(now_micros())
    .bind(comment_id)
    .execute(pool)
    .await?;

    expect_one_row("update_comment", result)?;

    Ok(())
}

pub async fn delete_comment(pool: &Pool<Sqlite>, comment_id: i64) -> Result<(), ApiError> {
    let result = query("DELETE FROM comments WHERE id = ?;")
        .bind(comment_id)
        .execute(pool)
        .await?;

    expect_one_row("delete_comment", result)?;

    Ok(())
}

// votes, always inside the caller's transaction

pub async fn find_post_id(
    conn: &mut SqliteConnection,
    identifier: &str,
    slug: &str,
) -> Result<Option<i64>, ApiError> {
    let post_id = query_scalar::<_, i64>(
        "SELECT p.id FROM posts p WHERE p.identifier = ? AND p.slug = ?;",
    )
    .bind(identifier)
    .bind(slug)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(post_id)
}

pub async fn find_comment_id(
    conn: &mut SqliteConnection,
    identifier: &str,
    post_id: i64,
) -> Result<Option<i64>, ApiError> {
    let comment_id = query_scalar::<_, i64>(
        "SELECT c.id FROM comments c WHERE c.identifier = ? AND c.post_id = ?;",
    )
    .bind(identifier)
    .bind(post_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(comment_id)
}

pub async fn find_vote(
    conn: &mut SqliteConnection,
    username: &str,
    target: VoteTarget,
) -> Result<Option<VoteRow>, ApiError> {
    let sql = match target {
        VoteTarget::Post(_) => {
            "SELECT v.id, v.value FROM votes v WHERE v.username = ? AND v.post_id = ?;"
        }
        VoteTarget::Comment(_) => {
            "SELECT v.id, v.value FROM votes v WHERE v.username = ? AND v.comment_id = ?;"
        }
    };

    let vote = query_as::<_, VoteRow>(sql)
        .bind(username)
        .bind(target.id())
        .fetch_optional(&mut *conn)
        .await?;

    Ok(vote)
}

pub async fn insert_vote(
    conn: &mut SqliteConnection,
    username: &str,
    target: VoteTarget,
    value: i64,
) -> Result<(), ApiError> {
    let (post_id, comment_id) = match target {
        VoteTarget::Post(id) => (Some(id), None),
        VoteTarget::Comment(id) => (None, Some(id)),
    };
    let now = now_micros();

    let result = query(
        r#"
        INSERT INTO votes(value, username, post_id, comment_id, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?);
        "#,
    )
    .bind(value)
    .bind(username)
    .bind(post_id)
    .bind(comment_id)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    expect_one_row("insert_vote", result)?;

    Ok(())
}

pub async fn update_vote(
    conn: &mut SqliteConnection,
    vote_id: i64,
    value: i64,
) -> Result<(), ApiError> {
    let result = query("UPDATE votes SET value = ?, updated_at = ? WHERE id = ?;")
        .bind(value)
        .bind(now_micros())
        .bind(vote_id)
        .execute(&mut *conn)
        .await?;

    expect_one_row("update_vote", result)?;

    Ok(())
}

pub async fn delete_vote(conn: &mut SqliteConnection, vote_id: i64) -> Result<(), ApiError> {
    let result = query("DELETE FROM votes WHERE id = ?;")
        .bind(vote_id)
        .execute(&mut *conn)
        .await?;

    expect_one_row("delete_vote", result)?;

    Ok(())
}

impl VoteTarget {
    fn id(self) -> i64 {
        match self {
            VoteTarget::Post(id) | VoteTarget::Comment(id) => id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like("re_act%"), r"re\_act\%");
        assert_eq!(escape_like(r"a\b"), r"a\\b");
        assert_eq!(escape_like("rust"), "rust");
    }
}
