//! Scheduler seam: everything the orchestrator asks of Slurm.

pub mod cli;
pub mod parse;

use std::fmt;
use std::path::PathBuf;

use crate::domain::node::{NodeName, SchedulerState};
use crate::error::FleetResult;

pub use cli::SlurmCli;

/// Job state as reported by `squeue`/`sacct`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Completing,
    Completed,
    Cancelled,
    Failed,
    Timeout,
    NodeFail,
    OutOfMemory,
    /// The scheduler no longer knows the job.
    Gone,
    Unknown(String),
}

impl From<&str> for JobState {
    fn from(s: &str) -> Self {
        // sacct reports "CANCELLED by 0"
        let token = s.split_whitespace().next().unwrap_or_default();
        match token.to_uppercase().as_str() {
            "PENDING" | "PD" | "CONFIGURING" | "CF" | "REQUEUED" | "RQ" => JobState::Pending,
            "RUNNING" | "R" => JobState::Running,
            "COMPLETING" | "CG" => JobState::Completing,
            "COMPLETED" | "CD" => JobState::Completed,
            "CANCELLED" | "CA" => JobState::Cancelled,
            "FAILED" | "F" | "BOOT_FAIL" | "BF" | "DEADLINE" | "DL" => JobState::Failed,
            "TIMEOUT" | "TO" => JobState::Timeout,
            "NODE_FAIL" | "NF" => JobState::NodeFail,
            "OUT_OF_MEMORY" | "OOM" => JobState::OutOfMemory,
            other => JobState::Unknown(other.to_string()),
        }
    }
}

impl JobState {
    pub fn is_success(&self) -> bool {
        matches!(self, JobState::Completed)
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            JobState::Cancelled
                | JobState::Failed
                | JobState::Timeout
                | JobState::NodeFail
                | JobState::OutOfMemory
        )
    }
}

/// A state change applied through `scontrol update`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeUpdate {
    Resume,
    Drain,
    Down,
}

impl NodeUpdate {
    pub fn as_scontrol(self) -> &'static str {
        match self {
            NodeUpdate::Resume => "RESUME",
            NodeUpdate::Drain => "DRAIN",
            NodeUpdate::Down => "DOWN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub name: String,
    /// Expanded node names covered by the reservation.
    pub nodes: Vec<NodeName>,
    pub state: String,
}

#[derive(Debug, Clone)]
pub struct ReservationRequest {
    pub nodes: Vec<NodeName>,
    pub duration_minutes: u64,
    pub user: String,
    pub flags: String,
}

#[derive(Debug, Clone)]
pub struct BatchSubmission {
    pub job_name: String,
    pub script: String,
    pub nodes: Vec<NodeName>,
    pub reservation: Option<String>,
    pub partition: Option<String>,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStream {
    Stdout,
    Stderr,
}

impl fmt::Display for JobStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStream::Stdout => f.write_str("out"),
            JobStream::Stderr => f.write_str("err"),
        }
    }
}

pub trait Scheduler {
    /// Every node with its state, optionally limited to one partition.
    fn list_nodes(&self, partition: Option<&str>) -> FleetResult<Vec<(NodeName, SchedulerState)>>;

    /// `Ok(None)` when the scheduler does not know the node.
    fn node_state(&self, node: &str) -> FleetResult<Option<SchedulerState>>;

    fn node_reason(&self, node: &str) -> FleetResult<Option<String>>;

    fn expand_hostlist(&self, expr: &str) -> FleetResult<Vec<NodeName>>;

    fn update_node(&self, node: &str, update: NodeUpdate, reason: Option<&str>) -> FleetResult<()>;

    fn reservations(&self) -> FleetResult<Vec<Reservation>>;

    /// Returns the generated reservation name.
    fn create_reservation(&self, request: &ReservationRequest) -> FleetResult<String>;

    fn delete_reservation(&self, name: &str) -> FleetResult<()>;

    /// Returns the job id.
    fn submit_batch(&self, submission: &BatchSubmission) -> FleetResult<String>;

    fn job_state(&self, job_id: &str) -> FleetResult<JobState>;

    /// Last `lines` lines of a job's output or error file.
    fn job_output(&self, job_id: &str, stream: JobStream, lines: usize) -> FleetResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_state_from_str() {
        assert_eq!(JobState::from("RUNNING"), JobState::Running);
        assert_eq!(JobState::from("PD"), JobState::Pending);
        assert_eq!(JobState::from("CANCELLED by 0"), JobState::Cancelled);
        assert_eq!(JobState::from("node_fail"), JobState::NodeFail);
        assert!(matches!(JobState::from("WEIRD"), JobState::Unknown(_)));
    }

    #[test]
    fn terminal_classification() {
        assert!(JobState::Completed.is_success());
        assert!(!JobState::Completed.is_failure());
        assert!(JobState::Timeout.is_failure());
        assert!(!JobState::Running.is_failure());
        assert!(!JobState::Pending.is_success());
        assert!(!JobState::Gone.is_failure());
    }
}
