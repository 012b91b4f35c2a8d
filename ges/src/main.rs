use ges::cli::initialize_from_arguments;
use std::{env, process::ExitCode};

#[tokio::main]
async fn main() -> ExitCode {
    eprintln!("GES v{}", env!("CARGO_PKG_VERSION"));
    initialize_from_arguments().await
}
