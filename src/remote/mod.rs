//! Remote execution: transports and the two execution disciplines built on them.
//!
//! `RemoteShell` reaches one host at a time, `FanOutShell` reaches many hosts in one call.
//! `RemoteExecutor` hides which of the two an action runs on.

pub mod pdsh;
pub mod ssh;

use std::collections::BTreeMap;
use std::time::Duration;

use colored::Colorize;
use tracing::warn;

use crate::domain::node::{NodeName, NodeSet};
use crate::domain::types::{ExecutionOutcome, RunSummary};
use crate::error::FleetResult;

pub use pdsh::Pdsh;
pub use ssh::Ssh;

/// Combined output and exit status of one remote command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteOutput {
    pub status: i32,
    pub output: String,
}

/// Aggregate result of a fan-out call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOutOutput {
    pub status: i32,
    /// Output lines grouped by the host that printed them.
    pub output: BTreeMap<NodeName, Vec<String>>,
    /// Non-zero exit codes the transport attributed to a host.
    pub failures: BTreeMap<NodeName, i32>,
}

pub trait RemoteShell {
    /// Run `command` on `host`. Connection failures come back as `RemoteUnreachable`.
    fn exec(&self, host: &str, command: &str) -> FleetResult<RemoteOutput>;
}

pub trait FanOutShell {
    fn exec_all(&self, hosts: &[NodeName], command: &str) -> FleetResult<FanOutOutput>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStrategy {
    Sequential,
    FanOut,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    pub outcomes: Vec<ExecutionOutcome>,
    pub summary: RunSummary,
}

pub trait RemoteExecutor {
    fn execute(&self, nodes: &NodeSet, command: &str) -> ExecutionReport;
}

/// One node at a time, in set order. A failure is recorded and iteration continues.
pub struct Sequential<'a> {
    shell: &'a dyn RemoteShell,
    echo: bool,
}

impl<'a> Sequential<'a> {
    pub fn new(shell: &'a dyn RemoteShell) -> Self {
        Self { shell, echo: true }
    }

    #[cfg(test)]
    pub fn quiet(mut self) -> Self {
        self.echo = false;
        self
    }
}

impl RemoteExecutor for Sequential<'_> {
    fn execute(&self, nodes: &NodeSet, command: &str) -> ExecutionReport {
        let mut outcomes = Vec::with_capacity(nodes.len());

        for node in nodes {
            let outcome = match self.shell.exec(node, command) {
                Ok(out) => ExecutionOutcome {
                    node: node.clone(),
                    exit_status: Some(out.status),
                    output: out.output,
                },
                Err(e) => {
                    warn!(node = %node, error = %e, "remote command failed");
                    ExecutionOutcome {
                        node: node.clone(),
                        exit_status: None,
                        output: e.to_string(),
                    }
                }
            };

            if self.echo {
                print_outcome(&outcome);
            }
            outcomes.push(outcome);
        }

        let summary = RunSummary::from_outcomes(&outcomes);
        ExecutionReport { outcomes, summary }
    }
}

/// Whole set in one transport call; per-node attribution only when the transport gives it.
pub struct FanOut<'a> {
    shell: &'a dyn FanOutShell,
    echo: bool,
}

impl<'a> FanOut<'a> {
    pub fn new(shell: &'a dyn FanOutShell) -> Self {
        Self { shell, echo: true }
    }

    #[cfg(test)]
    pub fn quiet(mut self) -> Self {
        self.echo = false;
        self
    }
}

impl RemoteExecutor for FanOut<'_> {
    fn execute(&self, nodes: &NodeSet, command: &str) -> ExecutionReport {
        let hosts = nodes.to_vec();
        let out = match self.shell.exec_all(&hosts, command) {
            Ok(out) => out,
            Err(e) => {
                warn!(error = %e, "fan-out call failed");
                return ExecutionReport {
                    outcomes: Vec::new(),
                    summary: RunSummary::unattributed(nodes),
                };
            }
        };

        if self.echo {
            for (host, lines) in &out.output {
                for line in lines {
                    println!("{}: {}", host.bold(), line);
                }
            }
        }

        let outcomes: Vec<ExecutionOutcome> = hosts
            .iter()
            .map(|host| ExecutionOutcome {
                node: host.clone(),
                exit_status: Some(out.failures.get(host).copied().unwrap_or(0)),
                output: out.output.get(host).map(|l| l.join("\n")).unwrap_or_default(),
            })
            .collect();

        let summary = if out.status != 0 && out.failures.is_empty() {
            warn!(status = out.status, "fan-out reported failure without naming nodes");
            RunSummary::unattributed(nodes)
        } else {
            RunSummary::from_outcomes(&outcomes)
        };

        ExecutionReport { outcomes, summary }
    }
}

fn print_outcome(outcome: &ExecutionOutcome) {
    let marker = if outcome.succeeded() {
        "ok".green().bold()
    } else {
        "!!".red().bold()
    };
    println!("{} {}", marker, outcome.node.bold());
    for line in outcome.output.lines() {
        println!("   {}", line);
    }
}

pub(crate) fn connect_timeout(secs: u64) -> Duration {
    Duration::from_secs(secs.max(1))
}
