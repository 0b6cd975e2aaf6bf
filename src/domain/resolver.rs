//! Node set resolution: CLI-style inputs → canonical `NodeSet`.
//!
//! Per token, first match wins: an existing hostfile, a bracketed hostlist expression
//! (expanded by the scheduler), a literal node name. With no tokens, a state filter
//! enumerates nodes from the scheduler.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use tracing::{debug, warn};

use super::confirm::OperatorInput;
use super::node::{NodeName, NodeSet, SchedulerState};
use crate::error::{FleetError, FleetResult};
use crate::slurm::Scheduler;

pub const FILTER_KEYWORDS: &str = "all, idle, drain, down, down+drain, maintenance, partition:<name>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateFilter {
    All,
    Idle,
    Drain,
    Down,
    DownOrDrain,
    Maintenance,
    Partition(String),
}

impl StateFilter {
    pub fn matches(&self, state: SchedulerState) -> bool {
        match self {
            StateFilter::All | StateFilter::Partition(_) => true,
            StateFilter::Idle => state == SchedulerState::Idle,
            StateFilter::Drain => matches!(state, SchedulerState::Draining | SchedulerState::Drained),
            StateFilter::Down => state == SchedulerState::Down,
            StateFilter::DownOrDrain => state.is_drain_or_down(),
            StateFilter::Maintenance => state == SchedulerState::Maintenance,
        }
    }

    pub fn partition(&self) -> Option<&str> {
        match self {
            StateFilter::Partition(p) => Some(p),
            _ => None,
        }
    }
}

impl FromStr for StateFilter {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        if let Some(name) = lower.strip_prefix("partition:") {
            if name.is_empty() {
                return Err(FleetError::InvalidArgument("partition filter needs a name".into()));
            }
            // partition names are case-sensitive
            return Ok(StateFilter::Partition(s.trim()["partition:".len()..].to_string()));
        }
        match lower.as_str() {
            "all" => Ok(StateFilter::All),
            "idle" => Ok(StateFilter::Idle),
            "drain" | "drained" | "draining" => Ok(StateFilter::Drain),
            "down" => Ok(StateFilter::Down),
            "down+drain" | "drain+down" | "downdrain" | "down,drain" => {
                Ok(StateFilter::DownOrDrain)
            }
            "maintenance" | "maint" => Ok(StateFilter::Maintenance),
            other => Err(FleetError::InvalidArgument(format!(
                "unknown filter '{other}' (expected one of: {FILTER_KEYWORDS})"
            ))),
        }
    }
}

impl fmt::Display for StateFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateFilter::All => f.write_str("all"),
            StateFilter::Idle => f.write_str("idle"),
            StateFilter::Drain => f.write_str("drain"),
            StateFilter::Down => f.write_str("down"),
            StateFilter::DownOrDrain => f.write_str("down+drain"),
            StateFilter::Maintenance => f.write_str("maintenance"),
            StateFilter::Partition(p) => write!(f, "partition:{p}"),
        }
    }
}

pub struct NodeSetResolver<'a> {
    scheduler: &'a dyn Scheduler,
    input: &'a dyn OperatorInput,
    interactive: bool,
}

impl<'a> NodeSetResolver<'a> {
    pub fn new(scheduler: &'a dyn Scheduler, input: &'a dyn OperatorInput, interactive: bool) -> Self {
        Self {
            scheduler,
            input,
            interactive,
        }
    }

    pub fn resolve(&self, inputs: &[String], filters: &[StateFilter]) -> FleetResult<NodeSet> {
        let tokens: Vec<String> = inputs.iter().flat_map(|i| split_tokens(i)).collect();

        let set = match (tokens.is_empty(), filters) {
            (false, [_, ..]) => {
                return Err(FleetError::AmbiguousFilter(format!(
                    "node names and --filter {} given together",
                    filters[0]
                )))
            }
            (true, [first, rest @ ..]) => {
                for ignored in rest {
                    warn!(filter = %ignored, kept = %first, "more than one filter given, ignoring");
                }
                self.enumerate(first)?
            }
            (true, []) => match self.prompt_filter()? {
                Some(filter) => self.enumerate(&filter)?,
                None => return Err(FleetError::NoTargets),
            },
            (false, []) => {
                let mut set = NodeSet::new();
                for token in &tokens {
                    for name in self.expand_token(token, true)? {
                        set.insert(name);
                    }
                }
                set
            }
        };

        if set.is_empty() {
            return Err(FleetError::NoTargets);
        }
        debug!(nodes = set.len(), "resolved node set");
        Ok(set)
    }

    fn enumerate(&self, filter: &StateFilter) -> FleetResult<NodeSet> {
        let nodes = self.scheduler.list_nodes(filter.partition())?;
        Ok(nodes
            .into_iter()
            .filter(|(_, state)| filter.matches(*state))
            .map(|(name, _)| name)
            .collect())
    }

    fn prompt_filter(&self) -> FleetResult<Option<StateFilter>> {
        if !self.interactive {
            return Ok(None);
        }
        loop {
            let question = format!("No nodes given. Select by state ({FILTER_KEYWORDS}) or leave empty to exit:");
            let Some(answer) = self.input.ask(&question)? else {
                return Ok(None);
            };
            if answer.trim().is_empty() {
                return Ok(None);
            }
            match answer.parse() {
                Ok(filter) => return Ok(Some(filter)),
                Err(e) => println!("   {e}"),
            }
        }
    }

    fn expand_token(&self, token: &str, allow_file: bool) -> FleetResult<Vec<NodeName>> {
        let path = Path::new(token);
        if allow_file && path.is_file() {
            return self.read_hostfile(path);
        }
        if token.contains('/') {
            return Err(FleetError::InvalidArgument(format!("hostfile {token} does not exist")));
        }
        if token.contains('[') || token.contains(']') {
            if !brackets_balanced(token) {
                return Err(FleetError::InvalidArgument(format!("unbalanced brackets in '{token}'")));
            }
            let names = self.scheduler.expand_hostlist(token)?;
            return Ok(names.into_iter().filter(|n| valid_name(n)).collect());
        }
        if valid_name(token) {
            Ok(vec![token.to_string()])
        } else {
            warn!(token, "skipping malformed node name");
            Ok(Vec::new())
        }
    }

    fn read_hostfile(&self, path: &Path) -> FleetResult<Vec<NodeName>> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            FleetError::InvalidArgument(format!("cannot read hostfile {}: {e}", path.display()))
        })?;
        let mut names = Vec::new();
        for line in content.lines() {
            let line = line.split('#').next().unwrap_or_default().trim();
            for token in split_tokens(line) {
                names.extend(self.expand_token(&token, false)?);
            }
        }
        Ok(names)
    }
}

/// Split on commas and whitespace outside brackets: `a,b c[1,3]` → `a`, `b`, `c[1,3]`.
fn split_tokens(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;

    for c in input.chars() {
        match c {
            '[' => {
                depth += 1;
                current.push(c);
            }
            ']' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => tokens.push(std::mem::take(&mut current)),
            c if c.is_whitespace() && depth == 0 => tokens.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    tokens.push(current);
    tokens.retain(|t| !t.is_empty());
    tokens
}

fn brackets_balanced(token: &str) -> bool {
    let mut depth = 0i32;
    for c in token.chars() {
        match c {
            '[' => depth += 1,
            ']' => depth -= 1,
            _ => {}
        }
        if depth < 0 || depth > 1 {
            return false;
        }
    }
    depth == 0
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}
