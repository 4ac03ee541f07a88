//! Error handling for the P1 node
//!
//! This module defines the crate error type and a Result alias. Only
//! session-level failures travel through it (driver start/config, 3A
//! bring-up, configuration loading). Per-frame problems never become
//! errors; they are recorded as flush reasons on the action instead.

use thiserror::Error;

/// Main error type for P1 node operations
#[derive(Error, Debug)]
pub enum NodeError {
    /// Errors related to configuration loading/validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors reported by the camera driver collaborator
    #[error("Driver error: {0}")]
    Driver(String),

    /// Errors reported by the 3A collaborator
    #[error("3A error: {0}")]
    Hal3A(String),

    /// Task controller/collector failures (job not ready, stale handle)
    #[error("Task error: {0}")]
    Task(String),

    /// Delivery engine failures
    #[error("Delivery error: {0}")]
    Delivery(String),

    /// Operation called in the wrong node state
    #[error("Invalid state: {0}")]
    State(String),

    /// Timeout errors
    #[error("Timeout: {0}")]
    Timeout(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<NodeError>,
    },
}

impl NodeError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        NodeError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

impl From<toml::de::Error> for NodeError {
    fn from(err: toml::de::Error) -> Self {
        NodeError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for NodeError {
    fn from(err: toml::ser::Error) -> Self {
        NodeError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(err: serde_json::Error) -> Self {
        NodeError::Serialization(err.to_string())
    }
}

/// Result type alias for P1 node operations
pub type Result<T> = std::result::Result<T, NodeError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}
