//! Error types for the graph_drive crate.

use thiserror::Error;

/// Errors that can occur when signing in or talking to the Graph drive API.
#[derive(Error, Debug)]
pub enum DriveError {
    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Invalid folder reference: {0}")]
    InvalidFolderRef(String),

    #[error("Invalid URL or ID: {0}")]
    InvalidUrlOrId(String),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid URL: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Failed to read env file: {0}")]
    EnvFileError(#[from] dotenvy::Error),
}

/// Result type alias for DriveError.
pub type Result<T> = std::result::Result<T, DriveError>;
