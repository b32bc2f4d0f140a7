mod app_state;
mod connect;
mod mailer;
mod settings;
mod telemetry;
mod token_store;

pub use app_state::AppState;
pub use connect::{DbError, get_pool, get_redis_pool, run_migrations};
pub use mailer::{MailError, Mailer};
pub use settings::{Settings, SettingsError};
pub use telemetry::init_tracing;
pub use token_store::{MemoryTokenStore, RedisTokenStore, TokenStoreError};
