//! Error types for Overseer Core

use thiserror::Error;

/// Main error type for Overseer operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Spawn error: {0}")]
    Spawn(#[from] SpawnError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Validation errors for agent lifecycle operations
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Agent not found: {0}")]
    NotFound(String),

    #[error("Unknown runtime: {0}")]
    UnknownRuntime(String),

    #[error("Agent already running: {0}")]
    AlreadyRunning(String),

    #[error("Agent not running: {0}")]
    NotRunning(String),

    #[error("Cannot delete system agent: {0}")]
    SystemAgent(String),

    #[error("Invalid agent profile: {0}")]
    InvalidProfile(String),
}

/// Process spawn failure, with the last captured output for diagnosis
#[derive(Error, Debug)]
#[error("Failed to start {agent_id}: {message}")]
pub struct SpawnError {
    pub agent_id: String,
    pub message: String,
    pub tail: String,
}

/// One-shot command execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Command cancelled")]
    Cancelled,

    #[error("Result channel closed before the command settled")]
    Dropped,
}

/// Tracked service errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("No tracked service on port {0}")]
    PortNotFound(u16),

    #[error("No tracked service named {0}")]
    NameNotFound(String),

    #[error("Service {0} has no recorded command or cwd")]
    NoCommand(String),

    #[error("Service {0} is already alive")]
    AlreadyAlive(String),

    #[error("Backend failure: {0}")]
    Backend(String),
}

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Connection pool error: {0}")]
    Pool(String),
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Storage(StorageError::Database(err.to_string()))
    }
}

impl From<r2d2::Error> for Error {
    fn from(err: r2d2::Error) -> Self {
        Error::Storage(StorageError::Pool(err.to_string()))
    }
}

impl serde::Serialize for Error {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;
