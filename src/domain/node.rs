//! Node: the per-node snapshot every action starts from.
//!
//! A `NodeRecord` combines what the inventory says a node is (instance identity) with
//! what the scheduler and the node itself report right now.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

pub type NodeName = String;

/// Canonical, sorted, duplicate-free set of node names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodeSet(BTreeSet<NodeName>);

impl NodeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<NodeName>) -> bool {
        self.0.insert(name.into())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeName> {
        self.0.iter()
    }

    pub fn to_vec(&self) -> Vec<NodeName> {
        self.0.iter().cloned().collect()
    }

    /// Comma-joined form accepted by `scontrol`, `sbatch -w` and `pdsh -w`.
    pub fn joined(&self) -> String {
        self.to_vec().join(",")
    }
}

impl<S: Into<NodeName>> FromIterator<S> for NodeSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl<'a> IntoIterator for &'a NodeSet {
    type Item = &'a NodeName;
    type IntoIter = std::collections::btree_set::Iter<'a, NodeName>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for NodeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.joined())
    }
}

/// Scheduler view of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum SchedulerState {
    Idle,
    Mixed,
    Allocated,
    /// Drain requested while work is still running.
    Draining,
    /// Drain complete, nothing running.
    Drained,
    Down,
    Maintenance,
    Unknown,
}

impl SchedulerState {
    /// Parse a `sinfo`/`scontrol` state token, long or short form, with or without flag suffixes.
    pub fn parse(raw: &str) -> Self {
        let lower = raw.trim().to_ascii_lowercase();
        let mut parts = lower
            .split('+')
            .map(|p| p.trim_end_matches(['*', '~', '#', '!', '%', '$', '@', '^', '-']));
        let base = parts.next().unwrap_or_default();
        let flags: Vec<&str> = parts.collect();

        let drain_flag = flags.iter().any(|f| matches!(*f, "drain" | "draining" | "drained"));
        let maint_flag = flags.iter().any(|f| *f == "maint");

        let base = match base {
            "idle" => Self::Idle,
            "mix" | "mixed" => Self::Mixed,
            "alloc" | "allocated" | "comp" | "completing" => Self::Allocated,
            "drng" | "draining" => Self::Draining,
            "drain" | "drained" => Self::Drained,
            "down" | "fail" | "failing" | "no_respond" | "npc" => Self::Down,
            "maint" | "resv" | "reserved" => Self::Maintenance,
            _ => Self::Unknown,
        };

        match base {
            Self::Idle if drain_flag => Self::Drained,
            Self::Mixed | Self::Allocated if drain_flag => Self::Draining,
            Self::Idle if maint_flag => Self::Maintenance,
            other => other,
        }
    }

    /// Node carries a running workload.
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Mixed | Self::Allocated | Self::Draining)
    }

    /// Node is already excluded from scheduling.
    pub fn is_drain_or_down(self) -> bool {
        matches!(self, Self::Draining | Self::Drained | Self::Down)
    }
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Mixed => "mixed",
            Self::Allocated => "allocated",
            Self::Draining => "draining",
            Self::Drained => "drained",
            Self::Down => "down",
            Self::Maintenance => "maint",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum InstanceIdentity {
    Found(String),
    NotFound,
}

impl InstanceIdentity {
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Found(name) => Some(name),
            Self::NotFound => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeRecord {
    pub name: NodeName,
    pub identity: InstanceIdentity,
    pub state: SchedulerState,
    /// Only probed in detailed mode; `None` means not probed.
    pub reachable: Option<bool>,
    pub serial: Option<String>,
    pub shape: Option<String>,
    pub resource_id: Option<String>,
    pub reason: Option<String>,
}

impl NodeRecord {
    pub fn new(name: impl Into<NodeName>) -> Self {
        Self {
            name: name.into(),
            identity: InstanceIdentity::NotFound,
            state: SchedulerState::Unknown,
            reachable: None,
            serial: None,
            shape: None,
            resource_id: None,
            reason: None,
        }
    }

    pub fn is_unreachable(&self) -> bool {
        self.reachable == Some(false)
    }
}

/// Aggregate conditions over one collection. Built fresh per `collect` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FleetHealthFlags {
    pub has_allocated_nodes: bool,
    pub has_unreachable_nodes: bool,
    pub has_unknown_identity: bool,
    pub has_drain_or_down_nodes: bool,
}

impl FleetHealthFlags {
    pub fn from_records(records: &[NodeRecord]) -> Self {
        records.iter().fold(Self::default(), |mut flags, r| {
            flags.has_allocated_nodes |= matches!(r.state, SchedulerState::Mixed | SchedulerState::Allocated);
            flags.has_unreachable_nodes |= r.is_unreachable();
            flags.has_unknown_identity |= r.identity == InstanceIdentity::NotFound;
            flags.has_drain_or_down_nodes |= r.state.is_drain_or_down();
            flags
        })
    }

    pub fn any(&self) -> bool {
        self.has_allocated_nodes
            || self.has_unreachable_nodes
            || self.has_unknown_identity
            || self.has_drain_or_down_nodes
    }
}
