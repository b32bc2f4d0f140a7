use std::sync::Arc;

use sqlx::SqlitePool;

use crate::infrastructure::{
    Settings,
    connect::{DbError, get_pool, run_migrations},
    mailer::Mailer,
    token_store::TokenStore,
};

#[derive(Clone)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub settings: Settings,
    pub tokens: Arc<dyn TokenStore>,
    pub mailer: Mailer,
}

impl AppState {
    pub async fn new(
        settings: Settings,
        tokens: Arc<dyn TokenStore>,
        mailer: Mailer,
    ) -> Result<Arc<Self>, DbError> {
        let db_pool = get_pool(&settings.database_url).await?;
        run_migrations(&db_pool).await?;

        Ok(Arc::new(Self {
            db_pool,
            settings,
            tokens,
            mailer,
        }))
    }
}
