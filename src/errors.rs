//! Structured error types for the memory engine
//!
//! Per-worker failures degrade that stage's contribution instead of aborting
//! the turn; only persistence I/O failures in the graph store are fatal to
//! their operation. Each variant carries a stable machine-readable code.

use std::fmt;

/// Categorized engine errors, one variant per pipeline stage plus persistence
#[derive(Debug)]
pub enum MemoryError {
    /// Extraction worker failed or timed out
    ExtractionFailure(String),

    /// Response worker failed or timed out
    ResponseFailure(String),

    /// Reflection worker failed or timed out
    ReflectionFailure(String),

    /// Graph update rejected input or persistence I/O failed
    GraphUpdateFailure(String),

    /// External long-term store unreachable or returned garbage
    RetrievalFailure(String),

    /// Invalid caller input (empty owner id, malformed turn)
    InvalidInput { field: String, reason: String },

    /// Generic wrapper for external errors
    Internal(anyhow::Error),
}

impl MemoryError {
    /// Stable code for log filtering and client identification
    pub fn code(&self) -> &'static str {
        match self {
            Self::ExtractionFailure(_) => "EXTRACTION_FAILURE",
            Self::ResponseFailure(_) => "RESPONSE_FAILURE",
            Self::ReflectionFailure(_) => "REFLECTION_FAILURE",
            Self::GraphUpdateFailure(_) => "GRAPH_UPDATE_FAILURE",
            Self::RetrievalFailure(_) => "RETRIEVAL_FAILURE",
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Detailed human-readable message
    pub fn message(&self) -> String {
        match self {
            Self::ExtractionFailure(msg) => format!("Extraction failed: {msg}"),
            Self::ResponseFailure(msg) => format!("Response generation failed: {msg}"),
            Self::ReflectionFailure(msg) => format!("Reflection failed: {msg}"),
            Self::GraphUpdateFailure(msg) => format!("Graph update failed: {msg}"),
            Self::RetrievalFailure(msg) => format!("Long-term retrieval failed: {msg}"),
            Self::InvalidInput { field, reason } => {
                format!("Invalid input for field '{field}': {reason}")
            }
            Self::Internal(err) => format!("Internal error: {err}"),
        }
    }
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for MemoryError {}

impl From<anyhow::Error> for MemoryError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

/// Type alias for Results using MemoryError
pub type Result<T> = std::result::Result<T, MemoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            MemoryError::ExtractionFailure("boom".to_string()).code(),
            "EXTRACTION_FAILURE"
        );
        assert_eq!(
            MemoryError::GraphUpdateFailure("disk".to_string()).code(),
            "GRAPH_UPDATE_FAILURE"
        );
    }

    #[test]
    fn test_message_contains_detail() {
        let err = MemoryError::RetrievalFailure("connection refused".to_string());
        assert!(err.message().contains("connection refused"));
    }
}
