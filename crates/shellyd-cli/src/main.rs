#![forbid(unsafe_code)]

mod commands;
mod error;
mod pidfile;

use clap::{Parser, Subcommand};

use commands::add_key::AddKeyArgs;
use commands::start::StartArgs;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "shellyd")]
#[command(about = "Remote terminal daemon for trusted mobile clients")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the daemon and block on shutdown signals.
    Start(StartArgs),
    /// Stop the running daemon.
    Stop,
    /// Report whether the daemon is running.
    Status,
    /// Add an authorized key without going through pairing.
    AddKey(AddKeyArgs),
    /// Arm the pairing controller standalone.
    Pair,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Start(args) => commands::start::run(args).await,
        Command::Stop => commands::stop::run().await,
        Command::Status => commands::status::run().await,
        Command::AddKey(args) => commands::add_key::run(args).await,
        Command::Pair => commands::pair::run().await,
    };

    let exit_code = match result {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("{err}");
            err.exit_code()
        }
    };

    std::process::exit(exit_code);
}
