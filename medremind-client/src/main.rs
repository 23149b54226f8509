use clap::Parser;
use medremind_client::{Cli, run};

#[tokio::main]
async fn main() -> Result<(), medremind_client::AppError> {
    run(Cli::parse()).await
}
