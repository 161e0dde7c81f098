// src/error.rs

use thiserror::Error;

/// Core error types for Gitpress
#[derive(Error, Debug)]
pub enum Error {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database initialization error
    #[error("Failed to initialize database: {0}")]
    InitError(String),

    /// Database not found
    #[error("Database not found at path: {0}")]
    DatabaseNotFound(String),

    /// I/O failure with context
    #[error("I/O error: {0}")]
    IoError(String),

    /// HTTP transfer failed
    #[error("Download failed: {0}")]
    DownloadError(String),

    /// Malformed remote document or local value
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Something that should exist does not
    #[error("Not found: {0}")]
    NotFoundError(String),

    /// Archive could not be unpacked
    #[error("Extraction failed: {0}")]
    ExtractError(String),

    /// Archive did not have the expected single-root layout
    #[error("Unexpected archive layout: {0}")]
    StructureError(String),

    /// Payload could not be copied over the installation
    #[error("Copy failed: {0}")]
    CopyError(String),

    /// Native updater failed or is unavailable
    #[error("Fallback update failed: {0}")]
    FallbackError(String),

    /// Invalid configuration key or value
    #[error("Invalid configuration: {0}")]
    ConfigError(String),
}

/// Result type alias using Gitpress's Error type
pub type Result<T> = std::result::Result<T, Error>;
