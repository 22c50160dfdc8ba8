//! # Error Handling
//!
//! This module defines the centralized error type for `texgit`. It uses
//! `thiserror` to derive a single `Error` enum covering every failure mode of
//! the resource registry, the repository resolver, the process cache, and the
//! build-metadata runner.
//!
//! All of these errors are fatal to the current top-level run. The only local
//! recovery happens while loading the persisted index, where stale entries are
//! dropped instead of reported, and inside the repository resolver, which
//! retries a failed GitHub clone once over SSH before raising
//! `RepositoryUnavailable`.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for texgit operations
#[derive(Error, Debug)]
pub enum Error {
    /// A realm, name, prefix, or suffix was empty, whitespace-only, or
    /// contained a character outside the allowed set.
    #[error("Invalid key {value:?}: {message}")]
    InvalidKey { value: String, message: String },

    /// An operation was attempted on a manager that has already been closed.
    #[error("Already closed: {what}")]
    AlreadyClosed { what: String },

    /// A repository could not be cloned or its metadata could not be read.
    #[error("Repository unavailable: {url} - {message}")]
    RepositoryUnavailable { url: String, message: String },

    /// A subprocess exited with a non-zero status or ran into its timeout.
    ///
    /// `code` is `None` when the process was killed, e.g. after a timeout.
    #[error("Command failed: {command} (exit code {}): {stderr}", code.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string()))]
    ExecutionFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// The on-disk cache does not agree with what the in-memory state claims.
    #[error("Inconsistent cache state: {message}")]
    InconsistentState { message: String },

    /// A path does not exist or is not of the expected kind.
    #[error("Expected {expected} at {}", path.display())]
    UnexpectedKind {
        path: PathBuf,
        expected: &'static str,
    },

    /// An argument passed to a cache operation was malformed.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// A request line in the build-metadata file could not be parsed.
    #[error("Invalid request in line {line:?}: {message}")]
    InvalidRequest { line: String, message: String },

    /// A required external tool could not be located.
    #[error("Tool validation error: {tool} - {message}")]
    ToolValidation { tool: String, message: String },

    /// An I/O error, wrapped from `std::io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The persisted index could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A URL parsing error, wrapped from `url::ParseError`.
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// A regular expression error, wrapped from `regex::Error`.
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

/// A convenient type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
