use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use tokio::task;

use crate::server::ApiError;

impl From<argon2::password_hash::Error> for ApiError {
    fn from(error: argon2::password_hash::Error) -> Self {
        ApiError::InternalError(format!("Password hashing error: {}", error))
    }
}

impl From<task::JoinError> for ApiError {
    fn from(error: task::JoinError) -> Self {
        ApiError::InternalError(format!("Blocking task failed: {}", error))
    }
}

/// Argon2id PHC string for `password`, computed off the async executor.
pub async fn hash_password(password: String) -> Result<String, ApiError> {
    task::spawn_blocking(move || -> Result<String, ApiError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;

        Ok(hash.to_string())
    })
    .await?
}

pub async fn verify_password(hash: String, password: String) -> Result<bool, ApiError> {
    task::spawn_blocking(move || -> Result<bool, ApiError> {
        let parsed = PasswordHash::new(&hash)?;

        match Argon2::default().verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(error) => Err(error.into()),
        }
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hashes_verify_only_the_original_password() {
        let hash = hash_password("hunter22".into()).await.unwrap();

        assert!(hash.starts_with("$argon2"));
        assert!(verify_password(hash.clone(), "hunter22".into()).await.unwrap());
        assert!(!verify_password(hash, "hunter23".into()).await.unwrap());
    }

    #[tokio::test]
    async fn malformed_hash_is_an_error() {
        assert!(verify_password("plain".into(), "plain".into()).await.is_err());
    }
}
