//! Error types for chainstore
//!
//! Provides a unified error type for every backend and the database layer.

use std::fmt;

use thiserror::Error;

use crate::database::Database;
use crate::registry::PluginCategory;

/// Result type alias using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// The backend an error originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    Metadata,
    Blob,
    Graph,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Metadata => f.write_str("metadata"),
            Backend::Blob => f.write_str("blob"),
            Backend::Graph => f.write_str("graph"),
        }
    }
}

/// Unified error type for chainstore operations
#[derive(Debug, Error)]
pub enum StoreError {
    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("failed to open {backend} backend: {reason}")]
    Open { backend: Backend, reason: String },

    #[error("{0} backend is closed")]
    Closed(Backend),

    #[error("{0} backend is not configured")]
    NotConfigured(Backend),

    // -------------------------------------------------------------------------
    // Domain Errors
    // -------------------------------------------------------------------------
    #[error("record not found")]
    NotFound,

    #[error("write attempted through a read-only transaction")]
    ReadOnly,

    #[error("store inconsistency detected: {0}")]
    Inconsistency(String),

    /// A value the backend cannot represent, such as an integer above `i64::MAX` for SQLite
    #[error("invalid input: {0}")]
    InvalidInput(String),

    // -------------------------------------------------------------------------
    // Registry Errors
    // -------------------------------------------------------------------------
    #[error("duplicate plugin: {category}/{name}")]
    DuplicatePlugin { category: PluginCategory, name: String },

    #[error("plugin not found: {category}/{name}")]
    PluginNotFound { category: PluginCategory, name: String },

    // -------------------------------------------------------------------------
    // Backend Errors
    // -------------------------------------------------------------------------
    #[error("{backend} backend failed during {operation}: {reason}")]
    Backend {
        backend: Backend,
        operation: &'static str,
        reason: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAL corruption detected: {0}")]
    WalCorruption(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("metrics registration failed: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("{}", join_errors(.0))]
    Multiple(Vec<StoreError>),
}

impl StoreError {
    /// True for the "record does not exist (yet)" kind
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }

    /// Attach backend and operation context to an engine-internal error.
    ///
    /// Domain kinds (not found, read-only, inconsistency, registry) pass
    /// through untouched so callers can still match on them.
    pub fn in_backend(self, backend: Backend, operation: &'static str) -> StoreError {
        match self {
            StoreError::Io(_)
            | StoreError::WalCorruption(_)
            | StoreError::Storage(_)
            | StoreError::Serialization(_)
            | StoreError::Network(_)
            | StoreError::Protocol(_) => StoreError::Backend {
                backend,
                operation,
                reason: self.to_string(),
            },
            other => other,
        }
    }

    /// Collapse a list of errors: none → Ok, one → itself, more → Multiple
    pub fn join(mut errors: Vec<StoreError>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(StoreError::Multiple(errors)),
        }
    }
}

fn join_errors(errors: &[StoreError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<bincode::Error> for StoreError {
    fn from(e: bincode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Error returned when opening a [`Database`]
#[derive(Debug, Error)]
pub enum OpenError {
    /// A backend could not be created; no handle exists
    #[error("database open failed: {0}")]
    Failed(#[source] StoreError),

    /// Every backend opened but post-open setup failed.
    ///
    /// The database is usable and handed back for recovery.
    #[error("database initialization failed: {source}")]
    Init {
        db: Box<Database>,
        #[source]
        source: StoreError,
    },
}

impl OpenError {
    /// The underlying error, whichever stage produced it
    pub fn error(&self) -> &StoreError {
        match self {
            OpenError::Failed(e) => e,
            OpenError::Init { source, .. } => source,
        }
    }

    /// Take the partially initialized database, if one was produced
    pub fn into_database(self) -> Option<Database> {
        match self {
            OpenError::Failed(_) => None,
            OpenError::Init { db, .. } => Some(*db),
        }
    }
}

impl From<StoreError> for OpenError {
    fn from(e: StoreError) -> Self {
        OpenError::Failed(e)
    }
}
