use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::node::{NodeName, NodeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ActionKind {
    HealthcheckFresh,
    HealthcheckLatest,
    Reboot,
    Tag,
    Benchmark,
    PairBenchmark,
    Exec,
    StateUpdate,
    Validate,
    Identify,
}

impl ActionKind {
    /// Detailed collection (reachability, serial, shape) is needed before acting.
    pub fn needs_detail(self) -> bool {
        matches!(self, Self::Benchmark | Self::Identify)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::HealthcheckFresh => "healthcheck",
            Self::HealthcheckLatest => "healthcheck-latest",
            Self::Reboot => "reboot",
            Self::Tag => "tag",
            Self::Benchmark => "benchmark",
            Self::PairBenchmark => "pair-benchmark",
            Self::Exec => "exec",
            Self::StateUpdate => "state",
            Self::Validate => "validate",
            Self::Identify => "identify",
        };
        f.write_str(s)
    }
}

/// Result of one remote operation on one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionOutcome {
    pub node: NodeName,
    /// `None` when the operation never produced an exit status (spawn or connect failure).
    pub exit_status: Option<i32>,
    pub output: String,
}

impl ExecutionOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit_status == Some(0)
    }
}

/// Per-node accounting for one action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub succeeded: BTreeSet<NodeName>,
    pub failed: BTreeSet<NodeName>,
    /// Nodes covered by a failed fan-out call that did not say which node failed.
    pub unattributed: BTreeSet<NodeName>,
}

impl RunSummary {
    pub fn from_outcomes<'a>(outcomes: impl IntoIterator<Item = &'a ExecutionOutcome>) -> Self {
        let mut summary = Self::default();
        for outcome in outcomes {
            summary.record(&outcome.node, outcome.succeeded());
        }
        summary
    }

    pub fn record(&mut self, node: &str, ok: bool) {
        if ok {
            self.succeeded.insert(node.to_string());
        } else {
            self.failed.insert(node.to_string());
        }
    }

    /// Every node in `nodes` is marked as part of a failure nobody attributed.
    pub fn unattributed(nodes: &NodeSet) -> Self {
        Self {
            unattributed: nodes.iter().cloned().collect(),
            ..Self::default()
        }
    }

    /// Fold a later run over the same nodes in. Failed beats unattributed beats succeeded,
    /// so each node ends up in exactly one set.
    pub fn absorb(&mut self, other: RunSummary) {
        self.failed.extend(other.failed);
        self.unattributed.extend(other.unattributed);
        self.succeeded.extend(other.succeeded);
        let failed = &self.failed;
        self.unattributed.retain(|n| !failed.contains(n));
        let unattributed = &self.unattributed;
        self.succeeded
            .retain(|n| !failed.contains(n) && !unattributed.contains(n));
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.unattributed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len() + self.unattributed.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobTerminalState {
    Completed,
    Failed,
    TimedOut,
    Unknown,
}

impl fmt::Display for JobTerminalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed out",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchJob {
    pub job_id: String,
    pub submitted_at: DateTime<Utc>,
    pub terminal_state: JobTerminalState,
    pub waited_seconds: u64,
    /// Output tail for completed jobs, error tail for failed ones.
    pub output: Option<String>,
    /// Average bus bandwidth reported in the output tail, GB/s.
    pub bus_bandwidth: Option<f64>,
}
