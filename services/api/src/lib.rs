mod cli;
mod demo;
mod infra;
mod routes;
mod server;

use lease_sign::error::AppError;

pub async fn run() -> Result<(), AppError> {
    cli::run().await
}
