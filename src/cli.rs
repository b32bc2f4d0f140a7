use clap::{Parser, Subcommand, command};
use thiserror::Error;
use tracing::info;

use crate::{
    infrastructure::{DbError, Settings, SettingsError, get_pool, init_tracing, run_migrations},
    server::{ApiError, serve},
};

#[derive(Debug, Parser)]
#[command(name = env!("CARGO_PKG_NAME"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the API at default port 5000, can be changed with --port.
    Start {
        #[arg(long, default_value = "5000")]
        port: u16,
    },
    /// Apply pending database migrations and exit.
    Migrate,
}

impl Cli {
    pub fn initialize() -> Self {
        Cli::parse()
    }

    pub async fn handle(self) -> Result<(), CommandError> {
        init_tracing();
        let settings = Settings::new()?;

        match self.command {
            Commands::Start { port } => {
                if !(1024..=65535).contains(&port) {
                    return Err(CommandError::InvalidPort(port));
                }
                serve(port, settings).await?;
            }
            Commands::Migrate => {
                let pool = get_pool(&settings.database_url).await?;
                run_migrations(&pool).await?;
                info!("Migrations applied to {}", settings.database_url);
            }
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Invalid port number {0}")]
    InvalidPort(u16),
    #[error("Settings error: {0}")]
    SettingsError(#[from] SettingsError),
    #[error("Database error: {0}")]
    DbError(#[from] DbError),
    #[error("API error: {0}")]
    ApiError(#[from] ApiError),
}
