use clap::Parser;
use std::process::ExitCode;

mod cli;

use cli::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    cli::execute(cli).await
}
