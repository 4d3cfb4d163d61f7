use autoapply::cli::{Cli, Commands, SubmitArgs};
use clap::Parser;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Submit(args)) => autoapply::cli::submit(args).await,
        Some(Commands::Config(args)) => autoapply::cli::config(args),
        // Bare invocation prompts for every field
        None => autoapply::cli::submit(SubmitArgs::default()).await,
    }
}
