mod cli;
mod infrastructure;
mod server;

use std::process::ExitCode;

use cli::Cli;

#[tokio::main()]
async fn main() -> ExitCode {
    let cli = Cli::initialize();

    match cli.handle().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!("{}", error);
            ExitCode::FAILURE
        }
    }
}
