//! updb Command-Line Client
//!
//! Lists and runs pending module schema updates against a data directory.

mod commands;
mod config;
mod demo;
mod error;
mod formatter;
mod prompt;

use clap::Parser;
use config::{Args, Command};
use error::CliError;
use tracing_subscriber::EnvFilter;

fn main() {
    // Logs go to stderr so JSON output on stdout stays parseable.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("updb=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn run(args: Args) -> Result<i32, CliError> {
    tracing::info!(data_path = %args.data_path.display(), "opening data directory");
    let app = demo::DemoApp::open(&args.data_path)?;
    let updater = app.updater(args.update_options());
    let formatter = formatter::create_formatter(args.format);

    match args.command {
        Command::Status { .. } => commands::status(&updater, &*formatter),
        Command::Run(_) => commands::run(&updater, &*formatter, args.assume_yes()),
        Command::EntityUpdates { .. } => {
            commands::entity_updates(&updater, &*formatter, args.assume_yes())
        }
    }
}
