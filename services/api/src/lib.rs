mod cli;
mod forms_tool;
mod infra;
mod routes;
mod server;

use std::process::ExitCode;

use admission_forms::error::AppError;

pub async fn run() -> Result<ExitCode, AppError> {
    cli::run().await
}
