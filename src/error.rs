
use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Already exists: {0}")]
    AlreadyExists(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Store unavailable during {operation}: {message}")]
    StoreUnavailable { operation: String, message: String },
    #[error("Store error during {operation}: {message}")]
    Store { operation: String, message: String },
    #[error("Index conflict on {collection}: {message}")]
    IndexConflict { collection: String, message: String },
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Sink closed after {written} matches")]
    SinkClosed { written: u64 },
    #[error("I/O error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, MatchError>;

impl MatchError {
    pub(crate) fn store(operation: impl Into<String>, error: rusqlite::Error) -> Self {
        let operation = operation.into();
        let message = error.to_string();
        match error.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::CannotOpen) => {
                Self::StoreUnavailable { operation, message }
            }
            _ => Self::Store { operation, message },
        }
    }
}

// Helper conversions
impl From<rusqlite::Error> for MatchError {
    fn from(e: rusqlite::Error) -> Self { Self::store("sqlite", e) }
}
impl From<serde_json::Error> for MatchError {
    fn from(e: serde_json::Error) -> Self { Self::Serialization(e.to_string()) }
}
impl From<config::ConfigError> for MatchError {
    fn from(e: config::ConfigError) -> Self { Self::Config(e.to_string()) }
}
impl From<std::io::Error> for MatchError {
    fn from(e: std::io::Error) -> Self { Self::Io(e.to_string()) }
}

/// Attaches the name of the store operation to a raw SQLite failure.
pub(crate) trait During<T> {
    fn during(self, operation: &str) -> Result<T>;
}

impl<T> During<T> for std::result::Result<T, rusqlite::Error> {
    fn during(self, operation: &str) -> Result<T> {
        self.map_err(|e| MatchError::store(operation, e))
    }
}
