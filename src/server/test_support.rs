use std::{collections::HashMap, sync::Arc};

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{
        Method, Request, StatusCode,
        header::{CONTENT_TYPE, COOKIE, SET_COOKIE},
    },
};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;
use tower_sessions::{
    MemoryStore, SessionStore,
    cookie::time::{Duration, OffsetDateTime},
    session::{Id, Record},
};

use crate::{
    infrastructure::{AppState, Mailer, MemoryTokenStore, Settings},
    server::{
        server::app,
        session::{ACCESS_TOKEN_KEY, SESSION_COOKIE_NAME},
    },
};

pub const TEST_SECRET: &str = "test-secret-0123456789";
const BOUNDARY: &str = "readit-test-boundary";

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub sessions: MemoryStore,
    pub upload_dir: TempDir,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub cookie: Option<String>,
    pub json: Value,
    pub body: Vec<u8>,
}

pub enum Part<'a> {
    Text(&'a str, &'a str),
    File {
        name: &'a str,
        file_name: &'a str,
        content_type: &'a str,
        bytes: &'a [u8],
    },
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_mailer(Mailer::Log).await
    }

    pub async fn with_mailer(mailer: Mailer) -> Self {
        let upload_dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            database_url: "sqlite::memory:".into(),
            session_secret: TEST_SECRET.into(),
            redis_url: None,
            app_url: "http://localhost:5000".into(),
            client_url: "http://localhost:3000".into(),
            upload_dir: upload_dir.path().to_string_lossy().into_owned(),
            production: false,
            smtp_url: None,
            mail_from: "Readit <no-reply@localhost>".into(),
        };

        let state = AppState::new(settings, Arc::new(MemoryTokenStore::default()), mailer)
            .await
            .unwrap();
        let sessions = MemoryStore::default();
        let router = app(state.clone(), sessions.clone());

        Self {
            router,
            state,
            sessions,
            upload_dir,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();

        let status = response.status();
        let cookie = response
            .headers()
            .get(SET_COOKIE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(';').next())
            .map(str::to_string);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

        TestResponse {
            status,
            cookie,
            json,
            body: bytes.to_vec(),
        }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        cookie: Option<&str>,
        body: Option<Value>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(COOKIE, cookie);
        }

        let request = match body {
            Some(body) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        self.send(request).await
    }

    pub async fn get(&self, uri: &str, cookie: Option<&str>) -> TestResponse {
        self.request(Method::GET, uri, cookie, None).await
    }

    pub async fn post(&self, uri: &str, cookie: Option<&str>, body: Value) -> TestResponse {
        self.request(Method::POST, uri, cookie, Some(body)).await
    }

    pub async fn multipart(&self, uri: &str, cookie: &str, parts: &[Part<'_>]) -> TestResponse {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            match part {
                Part::Text(name, value) => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                            name, value
                        )
                        .as_bytes(),
                    );
                }
                Part::File {
                    name,
                    file_name,
                    content_type,
                    bytes,
                } => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                            name, file_name, content_type
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(bytes);
                    body.extend_from_slice(b"\r\n");
                }
            }
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(COOKIE, cookie)
            .header(
                CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap();

        self.send(request).await
    }

    /// Stores a session carrying `token` as its access token and returns its cookie.
    pub async fn session_with_token(&self, token: &str) -> String {
        let mut record = Record {
            id: Id::default(),
            data: HashMap::from([(
                ACCESS_TOKEN_KEY.to_string(),
                Value::String(token.to_string()),
            )]),
            expiry_date: OffsetDateTime::now_utc() + Duration::days(1),
        };
        self.sessions.create(&mut record).await.unwrap();

        format!("{}={}", SESSION_COOKIE_NAME, record.id)
    }

    /// Registers `username` (password "password123") and returns the session cookie.
    pub async fn login_as(&self, username: &str) -> String {
        let registered = self
            .post(
                "/api/auth/register",
                None,
                serde_json::json!({
                    "email": format!("{}@example.com", username),
                    "username": username,
                    "password": "password123",
                }),
            )
            .await;
        assert_eq!(registered.status, StatusCode::OK, "{}", registered.json);

        let logged_in = self
            .post(
                "/api/auth/login",
                None,
                serde_json::json!({ "username": username, "password": "password123" }),
            )
            .await;
        assert_eq!(logged_in.status, StatusCode::OK, "{}", logged_in.json);

        logged_in.cookie.expect("login sets the session cookie")
    }

    pub async fn create_sub(&self, cookie: &str, name: &str) -> Value {
        let response = self
            .post(
                "/api/subs",
                Some(cookie),
                serde_json::json!({ "name": name, "title": format!("All about {}", name) }),
            )
            .await;
        assert_eq!(response.status, StatusCode::OK, "{}", response.json);

        response.json
    }

    pub async fn create_post(&self, cookie: &str, sub: &str, title: &str) -> Value {
        let response = self
            .post(
                "/api/posts",
                Some(cookie),
                serde_json::json!({ "title": title, "body": "Body text", "sub": sub }),
            )
            .await;
        assert_eq!(response.status, StatusCode::OK, "{}", response.json);

        response.json
    }

    /// `/api/posts/<identifier>/<slug>` for a post returned by the API.
    pub fn post_path(post: &Value) -> String {
        format!(
            "/api/posts/{}/{}",
            post["identifier"].as_str().unwrap(),
            post["slug"].as_str().unwrap()
        )
    }
}
