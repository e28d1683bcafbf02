//! Error types and shared result alias.

use std::path::PathBuf;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("Required table not found: {}", .0.display())]
    MissingTable(PathBuf),

    #[error("Table {table} is missing required column {column}")]
    MissingColumn { table: String, column: String },

    #[error("Invalid region: {0}")]
    InvalidRegion(String),

    #[error("Region unavailable: {0}")]
    RegionUnavailable(String),

    #[error("Output directory already exists and is not empty: {}", .0.display())]
    OutputExists(PathBuf),

    #[error("Normalization failed: {0}")]
    Normalize(#[source] Box<ExtractError>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, ExtractError>;
