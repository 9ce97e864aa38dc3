//! Command-line arguments.

use crate::formatter::OutputFormat;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use updb_core::UpdateOptions;

/// Default data directory.
pub const DEFAULT_DATA_PATH: &str = "./data";

/// Run pending module schema updates.
#[derive(Parser, Debug)]
#[command(name = "updb")]
#[command(version, about = "Run pending module schema updates")]
pub struct Args {
    /// Path to the data directory
    #[arg(short = 'd', long, default_value = DEFAULT_DATA_PATH)]
    pub data_path: PathBuf,

    /// Output format
    #[arg(long, default_value = "table", value_enum, global = true)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List pending updates without running them
    Status {
        /// Include pending entity definition changes
        #[arg(long)]
        entity_updates: bool,

        /// Leave post-updates out of the listing
        #[arg(long)]
        no_post_updates: bool,
    },

    /// Run every pending update
    Run(RunArgs),

    /// Apply pending entity definition changes only
    EntityUpdates {
        /// Do not ask for confirmation
        #[arg(short = 'y', long)]
        yes: bool,

        /// Skip the cache clear after the run
        #[arg(long)]
        no_cache_clear: bool,
    },
}

/// Flags for the run subcommand.
#[derive(clap::Args, Debug, Clone, PartialEq, Eq)]
pub struct RunArgs {
    /// Do not ask for confirmation
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Also apply pending entity definition changes
    #[arg(long)]
    pub entity_updates: bool,

    /// Skip post-updates
    #[arg(long)]
    pub no_post_updates: bool,

    /// Skip the cache clear after the run
    #[arg(long)]
    pub no_cache_clear: bool,
}

impl Args {
    /// Update options implied by the subcommand's flags.
    pub fn update_options(&self) -> UpdateOptions {
        let options = UpdateOptions::default();
        match &self.command {
            Command::Status {
                entity_updates,
                no_post_updates,
            } => options
                .with_entity_updates(*entity_updates)
                .with_post_updates(!no_post_updates),
            Command::Run(run) => options
                .with_entity_updates(run.entity_updates)
                .with_post_updates(!run.no_post_updates)
                .with_cache_clear(!run.no_cache_clear),
            Command::EntityUpdates { no_cache_clear, .. } => options
                .with_entity_updates(true)
                .with_cache_clear(!no_cache_clear),
        }
    }

    /// Whether the confirmation prompt should be skipped.
    pub fn assume_yes(&self) -> bool {
        match &self.command {
            Command::Status { .. } => true,
            Command::Run(run) => run.yes,
            Command::EntityUpdates { yes, .. } => *yes,
        }
    }
}
