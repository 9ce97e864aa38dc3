//! CLI error type.

use thiserror::Error;
use updb_core::{CatalogError, UpdateError};

/// Errors that end the command with a non-zero exit status.
#[derive(Debug, Error)]
pub enum CliError {
    /// Fatal update error.
    #[error(transparent)]
    Update(#[from] UpdateError),

    /// Update registration is inconsistent.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Store error.
    #[error(transparent)]
    Storage(#[from] updb_core::Error),

    /// Could not open the data directory.
    #[error("failed to open data directory: {0}")]
    Open(#[from] sled::Error),

    /// Confirmation prompt failed.
    #[error("prompt failed: {0}")]
    Prompt(#[from] rustyline::error::ReadlineError),
}
