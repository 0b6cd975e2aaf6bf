//! Error taxonomy for fleet actions.
//!
//! Per-node variants (`RemoteUnreachable`, `SchedulerQueryFailed`, `ExternalToolFailed`) are
//! folded into records and run summaries by the component that produced them. Everything else
//! aborts the current action before any mutation is issued.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("no target nodes resolved")]
    NoTargets,

    #[error("conflicting node selection: {0}")]
    AmbiguousFilter(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("node set spans more than one hardware shape: {}", .0.join(", "))]
    HeterogeneousShape(Vec<String>),

    #[error("could not probe {} node(s) for shape: {}", .0.len(), .0.join(", "))]
    Unreachable(Vec<String>),

    #[error("{0}")]
    FatalPrecondition(String),

    #[error("{node} is running work ({state})")]
    UnsafeState { node: String, state: String },

    #[error("{node} is unreachable: {reason}")]
    RemoteUnreachable { node: String, reason: String },

    #[error("scheduler query failed: {0}")]
    SchedulerQueryFailed(String),

    #[error("{tool} failed: {message}")]
    ExternalToolFailed { tool: String, message: String },

    #[error("failed to run {program}: {source}")]
    Command {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("aborted by operator")]
    Aborted,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FleetError {
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalToolFailed {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn spawn(program: impl Into<String>, source: std::io::Error) -> Self {
        Self::Command {
            program: program.into(),
            source,
        }
    }

    /// Whether this error ends the whole invocation rather than one node's part of it.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::UnsafeState { .. }
                | Self::RemoteUnreachable { .. }
                | Self::SchedulerQueryFailed(_)
                | Self::ExternalToolFailed { .. }
        )
    }
}

pub type FleetResult<T> = std::result::Result<T, FleetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_node_errors_are_not_fatal() {
        assert!(!FleetError::SchedulerQueryFailed("timeout".into()).is_fatal());
        assert!(!FleetError::tool("tagunhealthy", "exit 1").is_fatal());
        assert!(!FleetError::RemoteUnreachable {
            node: "gpu-1".into(),
            reason: "connect timeout".into()
        }
        .is_fatal());
    }

    #[test]
    fn preconditions_are_fatal() {
        assert!(FleetError::NoTargets.is_fatal());
        assert!(FleetError::HeterogeneousShape(vec!["a".into(), "b".into()]).is_fatal());
        assert!(FleetError::Aborted.is_fatal());
    }

    #[test]
    fn heterogeneous_shape_lists_shapes() {
        let err = FleetError::HeterogeneousShape(vec!["BM.GPU.H100.8".into(), "BM.GPU.B4.8".into()]);
        assert_eq!(
            err.to_string(),
            "node set spans more than one hardware shape: BM.GPU.H100.8, BM.GPU.B4.8"
        );
    }
}
