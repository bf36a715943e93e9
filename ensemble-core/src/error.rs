//! Top-level error type for ensemble-core
//!
//! Module-level errors stay precise; this enum flattens them into the
//! categories callers actually branch on.

use thiserror::Error;

use crate::client::ClientError;
use crate::mcp::McpError;
use crate::network::NetworkError;
use crate::permission::{PermissionError, SettingsError};
use crate::ports::PortError;
use crate::store::StoreError;

/// Flattened error type for orchestrator operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No free port remained for an MCP server.
    #[error("port allocation failed: {0}")]
    PortExhausted(#[from] PortError),

    /// An MCP server failed to start or was used before starting.
    #[error("MCP error: {0}")]
    Mcp(#[from] McpError),

    /// The backend child process failed to start or is unusable.
    #[error("backend process error: {0}")]
    ChildProcess(#[from] ClientError),

    /// Network/agent lifecycle violation (missing agent, protected main).
    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    /// Persistence failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Permission channel failure.
    #[error("permission error: {0}")]
    Permission(#[from] PermissionError),

    /// Settings file failure.
    #[error("settings error: {0}")]
    Settings(#[from] SettingsError),
}

impl Error {
    /// Whether this error names something the caller sent, as opposed to
    /// an internal failure.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::Network(NetworkError::AgentNotFound(_))
                | Error::Network(NetworkError::NetworkNotFound(_))
        )
    }
}

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        let err: Error = NetworkError::AgentNotFound("x".to_string()).into();
        assert!(err.is_not_found());

        let err: Error = NetworkError::MainAgentProtected.into();
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_display_includes_cause() {
        let err: Error = NetworkError::NoActiveNetwork.into();
        assert!(err.to_string().contains("no active network"));
    }
}
