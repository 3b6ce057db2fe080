use std::process::ExitCode;

use clap::Parser;
use stack_engine::tracing::setup_tracing;
use webapp_stack::cli::{self, Cli};

#[tokio::main]
async fn main() -> ExitCode {
    setup_tracing();

    match cli::run(Cli::parse()).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(2)
        }
    }
}
