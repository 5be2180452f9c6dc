//! Error kinds surfaced by every analysis.

use std::fmt;

use crate::registry::GraphHandle;

/// Why a graph handle could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleFault {
    /// No graph was ever registered under this handle, or it was destroyed.
    Unknown,
    /// The policy or permission map changed after the handle was issued.
    Stale {
        /// Epoch stamped on the handle.
        issued: u64,
        /// Current registry epoch.
        current: u64,
    },
}

impl fmt::Display for HandleFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "no such graph"),
            Self::Stale { issued, current } => {
                write!(f, "issued at epoch {issued}, current epoch is {current}")
            }
        }
    }
}

/// Error type for analysis operations.
///
/// A failed call never leaves partial state behind: no half-built graph is
/// registered and no session is advanced.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AnalysisError {
    /// No policy loaded, or no permission map for an information-flow request.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// Malformed query input.
    #[error("Query error: {0}")]
    Query(String),
    /// Handle unknown or epoch-stale.
    #[error("Invalid graph handle {handle}: {fault}")]
    InvalidHandle {
        /// The offending handle.
        handle: GraphHandle,
        /// Why it was rejected.
        fault: HandleFault,
    },
    /// Resource limit hit while building a graph or running a search.
    #[error("Allocation error: {0}")]
    Allocation(String),
}

impl AnalysisError {
    /// Create a query error.
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Create a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Error for a type name that does not resolve to a concrete type.
    pub fn unknown_type(name: &str) -> Self {
        Self::Query(format!("'{name}' is not a known type"))
    }

    /// Whether the caller can recover by re-issuing the analysis unchanged.
    ///
    /// Only handle errors qualify; configuration and query errors need the
    /// caller to fix its input first.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::InvalidHandle { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_handle_errors_are_recoverable() {
        let stale = AnalysisError::InvalidHandle {
            handle: GraphHandle::from_parts(0, 0, 1),
            fault: HandleFault::Stale { issued: 1, current: 2 },
        };
        assert!(stale.is_recoverable());
        assert!(!AnalysisError::query("bad").is_recoverable());
        assert!(!AnalysisError::configuration("missing").is_recoverable());
    }

    #[test]
    fn test_stale_message_names_both_epochs() {
        let err = AnalysisError::InvalidHandle {
            handle: GraphHandle::from_parts(3, 1, 4),
            fault: HandleFault::Stale { issued: 4, current: 5 },
        };
        let msg = err.to_string();
        assert!(msg.contains("epoch 4"));
        assert!(msg.contains("epoch is 5"));
    }
}
