//! Error types for the category loader.
//!
//! `UnknownCategory` is a caller defect: a key that was never registered.
//! `Network` and `MalformedFeed` are recoverable and surface to the user with
//! a retry action.

use std::fmt;

use thiserror::Error;

/// Coarse classification of a load failure, carried by `LoaderState::Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UnknownCategory,
    Network,
    MalformedFeed,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorKind::UnknownCategory)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::UnknownCategory => "unknown category",
            ErrorKind::Network => "network error",
            ErrorKind::MalformedFeed => "malformed feed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoaderError {
    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed feed: {0}")]
    MalformedFeed(String),
}

impl LoaderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LoaderError::UnknownCategory(_) => ErrorKind::UnknownCategory,
            LoaderError::Network(_) => ErrorKind::Network,
            LoaderError::MalformedFeed(_) => ErrorKind::MalformedFeed,
        }
    }
}

impl From<reqwest::Error> for LoaderError {
    fn from(err: reqwest::Error) -> Self {
        LoaderError::Network(err.to_string())
    }
}

impl From<feed_rs::parser::ParseFeedError> for LoaderError {
    fn from(err: feed_rs::parser::ParseFeedError) -> Self {
        LoaderError::MalformedFeed(err.to_string())
    }
}

/// Raised when a registry is built with the same category key twice.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Duplicate category key: {0}")]
pub struct DuplicateCategory(pub String);
