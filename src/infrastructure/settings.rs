use std::env::{self, VarError};

use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub session_secret: String,
    pub redis_url: Option<String>,
    pub app_url: String,
    pub client_url: String,
    pub upload_dir: String,
    pub production: bool,
    pub smtp_url: Option<String>,
    pub mail_from: String,
}

impl Settings {
    pub fn new() -> Result<Self, SettingsError> {
        if let Err(error) = dotenvy::dotenv()
            && !error.not_found()
        {
            return Err(error.into());
        }

        let session_secret = env::var("SESSION_SECRET")?;
        if session_secret.len() < 16 {
            return Err(SettingsError::WeakSecret);
        }

        Ok(Self {
            database_url: env::var("DATABASE_URL")?,
            session_secret,
            redis_url: optional("REDIS_URL"),
            app_url: optional("APP_URL").unwrap_or_else(|| "http://localhost:5000".into()),
            client_url: optional("CLIENT_URL").unwrap_or_else(|| "http://localhost:3000".into()),
            upload_dir: optional("UPLOAD_DIR").unwrap_or_else(|| "public/images".into()),
            production: optional("APP_ENV").is_some_and(|env| env == "production"),
            smtp_url: optional("SMTP_URL"),
            mail_from: optional("MAIL_FROM")
                .unwrap_or_else(|| "Readit <no-reply@localhost>".into()),
        })
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Environment file error: {0}")]
    EnvFile(#[from] dotenvy::Error),
    #[error("Environment variable error: {0}")]
    ConfigError(#[from] VarError),
    #[error("SESSION_SECRET must be at least 16 characters long")]
    WeakSecret,
}
