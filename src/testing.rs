//! In-memory collaborators for unit tests.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;

use crate::cloud::{CapacityHost, ControlPlane};
use crate::domain::confirm::OperatorInput;
use crate::domain::node::{NodeName, SchedulerState};
use crate::error::{FleetError, FleetResult};
use crate::remote::{FanOutOutput, FanOutShell, RemoteOutput, RemoteShell};
use crate::slurm::{
    BatchSubmission, JobState, JobStream, NodeUpdate, Reservation, ReservationRequest, Scheduler,
};
use crate::tools::{ExternalTools, ToolRun};

// ── Operator input ─────────────────────────────────────────

pub struct ScriptedInput {
    answers: RefCell<VecDeque<String>>,
    asked: Cell<usize>,
}

impl ScriptedInput {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: RefCell::new(answers.into_iter().map(Into::into).collect()),
            asked: Cell::new(0),
        }
    }

    pub fn asked(&self) -> usize {
        self.asked.get()
    }
}

impl OperatorInput for ScriptedInput {
    fn ask(&self, _prompt: &str) -> FleetResult<Option<String>> {
        self.asked.set(self.asked.get() + 1);
        Ok(self.answers.borrow_mut().pop_front())
    }
}

// ── Scheduler ──────────────────────────────────────────────

#[derive(Default)]
pub struct FakeScheduler {
    nodes: Vec<(NodeName, SchedulerState)>,
    partitions: HashMap<String, Vec<NodeName>>,
    hostlists: HashMap<String, Vec<NodeName>>,
    failing_state: HashSet<NodeName>,
    failing_update: HashSet<NodeName>,
    failing_delete: HashSet<String>,
    reasons: HashMap<NodeName, String>,
    reservations: RefCell<Vec<Reservation>>,
    job_scripts: RefCell<VecDeque<Vec<JobState>>>,
    jobs: RefCell<BTreeMap<String, VecDeque<JobState>>>,
    outputs: HashMap<(String, JobStream), String>,
    next_job: Cell<u32>,

    partitions_queried: RefCell<Vec<Option<String>>>,
    reason_queries: RefCell<Vec<NodeName>>,
    updates: RefCell<Vec<(NodeName, NodeUpdate, Option<String>)>>,
    created: RefCell<Vec<ReservationRequest>>,
    deleted: RefCell<Vec<String>>,
    submissions: RefCell<Vec<BatchSubmission>>,
    polls: RefCell<Vec<String>>,
}

impl FakeScheduler {
    pub fn new() -> Self {
        Self {
            next_job: Cell::new(1001),
            ..Self::default()
        }
    }

    pub fn node(mut self, name: &str, state: SchedulerState) -> Self {
        self.nodes.push((name.to_string(), state));
        self
    }

    pub fn partition(mut self, name: &str, nodes: &[&str]) -> Self {
        self.partitions
            .insert(name.to_string(), nodes.iter().map(|n| n.to_string()).collect());
        self
    }

    pub fn hostlist(mut self, expr: &str, names: &[&str]) -> Self {
        self.hostlists
            .insert(expr.to_string(), names.iter().map(|n| n.to_string()).collect());
        self
    }

    pub fn failing_state(mut self, name: &str) -> Self {
        self.failing_state.insert(name.to_string());
        self
    }

    pub fn failing_update(mut self, name: &str) -> Self {
        self.failing_update.insert(name.to_string());
        self
    }

    pub fn failing_delete(mut self, reservation: &str) -> Self {
        self.failing_delete.insert(reservation.to_string());
        self
    }

    pub fn reason(mut self, name: &str, reason: &str) -> Self {
        self.reasons.insert(name.to_string(), reason.to_string());
        self
    }

    pub fn reservation(self, name: &str, nodes: &[&str]) -> Self {
        self.reservations.borrow_mut().push(Reservation {
            name: name.to_string(),
            nodes: nodes.iter().map(|n| n.to_string()).collect(),
            state: "ACTIVE".to_string(),
        });
        self
    }

    /// States returned by successive polls of the next submitted job; the last one repeats.
    pub fn job(self, states: Vec<JobState>) -> Self {
        self.job_scripts.borrow_mut().push_back(states);
        self
    }

    pub fn output(mut self, job_id: &str, stream: JobStream, text: &str) -> Self {
        self.outputs
            .insert((job_id.to_string(), stream), text.to_string());
        self
    }

    pub fn partitions_queried(&self) -> Vec<Option<String>> {
        self.partitions_queried.borrow().clone()
    }

    pub fn reason_queries(&self) -> Vec<NodeName> {
        self.reason_queries.borrow().clone()
    }

    pub fn updates(&self) -> Vec<(NodeName, NodeUpdate, Option<String>)> {
        self.updates.borrow().clone()
    }

    /// Every state-changing call: node updates, reservation creates and deletes.
    pub fn mutation_count(&self) -> usize {
        self.updates.borrow().len() + self.created.borrow().len() + self.deleted.borrow().len()
    }

    pub fn created(&self) -> Vec<ReservationRequest> {
        self.created.borrow().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.borrow().clone()
    }

    pub fn submissions(&self) -> Vec<BatchSubmission> {
        self.submissions.borrow().clone()
    }

    pub fn polls(&self) -> Vec<String> {
        self.polls.borrow().clone()
    }
}

impl Scheduler for FakeScheduler {
    fn list_nodes(&self, partition: Option<&str>) -> FleetResult<Vec<(NodeName, SchedulerState)>> {
        self.partitions_queried
            .borrow_mut()
            .push(partition.map(String::from));
        let members = partition.and_then(|p| self.partitions.get(p));
        Ok(self
            .nodes
            .iter()
            .filter(|(name, _)| members.map_or(true, |m| m.contains(name)))
            .cloned()
            .collect())
    }

    fn node_state(&self, node: &str) -> FleetResult<Option<SchedulerState>> {
        if self.failing_state.contains(node) {
            return Err(FleetError::SchedulerQueryFailed(format!("sinfo -n {node}: timed out")));
        }
        Ok(self
            .nodes
            .iter()
            .find(|(name, _)| name == node)
            .map(|(_, state)| *state))
    }

    fn node_reason(&self, node: &str) -> FleetResult<Option<String>> {
        self.reason_queries.borrow_mut().push(node.to_string());
        Ok(self.reasons.get(node).cloned())
    }

    fn expand_hostlist(&self, expr: &str) -> FleetResult<Vec<NodeName>> {
        self.hostlists
            .get(expr)
            .cloned()
            .ok_or_else(|| FleetError::SchedulerQueryFailed(format!("cannot expand {expr}")))
    }

    fn update_node(&self, node: &str, update: NodeUpdate, reason: Option<&str>) -> FleetResult<()> {
        self.updates
            .borrow_mut()
            .push((node.to_string(), update, reason.map(String::from)));
        if self.failing_update.contains(node) {
            return Err(FleetError::SchedulerQueryFailed(format!("scontrol update {node}: denied")));
        }
        Ok(())
    }

    fn reservations(&self) -> FleetResult<Vec<Reservation>> {
        Ok(self.reservations.borrow().clone())
    }

    fn create_reservation(&self, request: &ReservationRequest) -> FleetResult<String> {
        self.created.borrow_mut().push(request.clone());
        Ok(format!("{}_{}", request.user, self.created.borrow().len()))
    }

    fn delete_reservation(&self, name: &str) -> FleetResult<()> {
        self.deleted.borrow_mut().push(name.to_string());
        if self.failing_delete.contains(name) {
            return Err(FleetError::SchedulerQueryFailed(format!("delete {name}: denied")));
        }
        self.reservations.borrow_mut().retain(|r| r.name != name);
        Ok(())
    }

    fn submit_batch(&self, submission: &BatchSubmission) -> FleetResult<String> {
        self.submissions.borrow_mut().push(submission.clone());
        let id = self.next_job.get().to_string();
        self.next_job.set(self.next_job.get() + 1);
        let script = self
            .job_scripts
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| vec![JobState::Pending]);
        self.jobs.borrow_mut().insert(id.clone(), script.into());
        Ok(id)
    }

    fn job_state(&self, job_id: &str) -> FleetResult<JobState> {
        self.polls.borrow_mut().push(job_id.to_string());
        let mut jobs = self.jobs.borrow_mut();
        let states = jobs
            .get_mut(job_id)
            .ok_or_else(|| FleetError::SchedulerQueryFailed(format!("no job {job_id}")))?;
        let state = if states.len() > 1 {
            states.pop_front()
        } else {
            states.front().cloned()
        };
        Ok(state.unwrap_or(JobState::Gone))
    }

    fn job_output(&self, job_id: &str, stream: JobStream, _lines: usize) -> FleetResult<String> {
        Ok(self
            .outputs
            .get(&(job_id.to_string(), stream))
            .cloned()
            .unwrap_or_default())
    }
}

// ── Remote shells ──────────────────────────────────────────

#[derive(Clone)]
enum Reply {
    Exit(i32, String),
    Unreachable,
}

#[derive(Default)]
pub struct FakeShell {
    replies: HashMap<NodeName, Reply>,
    calls: RefCell<Vec<(NodeName, String)>>,
}

impl FakeShell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exit(self, host: &str, status: i32) -> Self {
        self.respond(host, status, "")
    }

    pub fn respond(mut self, host: &str, status: i32, output: &str) -> Self {
        self.replies
            .insert(host.to_string(), Reply::Exit(status, output.to_string()));
        self
    }

    pub fn unreachable(mut self, host: &str) -> Self {
        self.replies.insert(host.to_string(), Reply::Unreachable);
        self
    }

    pub fn calls(&self) -> Vec<NodeName> {
        self.calls.borrow().iter().map(|(h, _)| h.clone()).collect()
    }

    pub fn commands(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|(_, c)| c.clone()).collect()
    }
}

impl RemoteShell for FakeShell {
    fn exec(&self, host: &str, command: &str) -> FleetResult<RemoteOutput> {
        self.calls
            .borrow_mut()
            .push((host.to_string(), command.to_string()));
        match self.replies.get(host).cloned() {
            Some(Reply::Unreachable) => Err(FleetError::RemoteUnreachable {
                node: host.to_string(),
                reason: "Connection timed out".to_string(),
            }),
            Some(Reply::Exit(status, output)) => Ok(RemoteOutput { status, output }),
            None => Ok(RemoteOutput {
                status: 0,
                output: String::new(),
            }),
        }
    }
}

pub struct FakeFanOut {
    result: Option<FanOutOutput>,
    calls: RefCell<Vec<(Vec<NodeName>, String)>>,
}

impl FakeFanOut {
    /// Annotated per-host exit codes, as pdsh reports them.
    pub fn from_exits<'a>(exits: impl IntoIterator<Item = (&'a str, i32)>) -> Self {
        let mut out = FanOutOutput::default();
        for (host, code) in exits {
            if code != 0 {
                out.failures.insert(host.to_string(), code);
                out.status = out.status.max(code);
            }
        }
        Self {
            result: Some(out),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn unannotated(status: i32) -> Self {
        Self {
            result: Some(FanOutOutput {
                status,
                ..FanOutOutput::default()
            }),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn broken() -> Self {
        Self {
            result: None,
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(Vec<NodeName>, String)> {
        self.calls.borrow().clone()
    }
}

impl FanOutShell for FakeFanOut {
    fn exec_all(&self, hosts: &[NodeName], command: &str) -> FleetResult<FanOutOutput> {
        self.calls
            .borrow_mut()
            .push((hosts.to_vec(), command.to_string()));
        self.result.clone().ok_or_else(|| {
            FleetError::spawn("pdsh", std::io::Error::new(std::io::ErrorKind::NotFound, "pdsh"))
        })
    }
}

// ── Control plane ──────────────────────────────────────────

#[derive(Default)]
pub struct FakeControlPlane {
    instances: HashMap<String, String>,
    failing_reset: HashSet<String>,
    capacity: Vec<CapacityHost>,
    resets: RefCell<Vec<String>>,
}

impl FakeControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instance(mut self, name: &str, id: &str) -> Self {
        self.instances.insert(name.to_string(), id.to_string());
        self
    }

    pub fn failing_reset(mut self, id: &str) -> Self {
        self.failing_reset.insert(id.to_string());
        self
    }

    pub fn capacity(mut self, hosts: Vec<CapacityHost>) -> Self {
        self.capacity = hosts;
        self
    }

    pub fn resets(&self) -> Vec<String> {
        self.resets.borrow().clone()
    }
}

impl ControlPlane for FakeControlPlane {
    fn resource_id(&self, instance_name: &str) -> FleetResult<Option<String>> {
        Ok(self.instances.get(instance_name).cloned())
    }

    fn hard_reset(&self, resource_id: &str) -> FleetResult<()> {
        self.resets.borrow_mut().push(resource_id.to_string());
        if self.failing_reset.contains(resource_id) {
            return Err(FleetError::tool("oci", "InternalError: reset rejected"));
        }
        Ok(())
    }

    fn capacity_hosts(&self) -> FleetResult<Vec<CapacityHost>> {
        Ok(self.capacity.clone())
    }
}

// ── External tools ─────────────────────────────────────────

#[derive(Default)]
pub struct FakeTools {
    failing_tag: HashSet<String>,
    pairwise_status: i32,
    namespace_status: i32,
    validate: Option<ToolRun>,
    tagged: RefCell<Vec<String>>,
    namespace_calls: RefCell<Vec<&'static str>>,
    node_lists: RefCell<Vec<Vec<String>>>,
}

impl FakeTools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_tag(mut self, id: &str) -> Self {
        self.failing_tag.insert(id.to_string());
        self
    }

    pub fn pairwise_status(mut self, status: i32) -> Self {
        self.pairwise_status = status;
        self
    }

    /// Exit status of both tag namespace modes.
    pub fn namespace_status(mut self, status: i32) -> Self {
        self.namespace_status = status;
        self
    }

    pub fn validate_output(mut self, status: i32, output: &str) -> Self {
        self.validate = Some(ToolRun {
            status,
            output: output.to_string(),
        });
        self
    }

    pub fn tagged(&self) -> Vec<String> {
        self.tagged.borrow().clone()
    }

    pub fn namespace_calls(&self) -> Vec<&'static str> {
        self.namespace_calls.borrow().clone()
    }

    /// Contents of every node list file handed to a tool, read at call time.
    pub fn node_lists(&self) -> Vec<Vec<String>> {
        self.node_lists.borrow().clone()
    }

    fn capture(&self, path: &Path) {
        let content = std::fs::read_to_string(path).unwrap_or_default();
        self.node_lists
            .borrow_mut()
            .push(content.lines().map(String::from).collect());
    }
}

impl ExternalTools for FakeTools {
    fn tag_unhealthy(&self, resource_id: &str) -> FleetResult<()> {
        self.tagged.borrow_mut().push(resource_id.to_string());
        if self.failing_tag.contains(resource_id) {
            return Err(FleetError::tool("tagunhealthy", "ServiceError 404"));
        }
        Ok(())
    }

    fn tag_check(&self) -> FleetResult<ToolRun> {
        self.namespace_calls.borrow_mut().push("check");
        Ok(ToolRun {
            status: self.namespace_status,
            output: "Correct Tag Namespace Found...".to_string(),
        })
    }

    fn tag_setup(&self) -> FleetResult<ToolRun> {
        self.namespace_calls.borrow_mut().push("setup");
        Ok(ToolRun {
            status: self.namespace_status,
            output: "Created Tag: CustomerReportedHostStatus".to_string(),
        })
    }

    fn pairwise_benchmark(&self, node_list: &Path) -> FleetResult<ToolRun> {
        self.capture(node_list);
        Ok(ToolRun {
            status: self.pairwise_status,
            output: String::new(),
        })
    }

    fn validate(&self, node_list: &Path) -> FleetResult<ToolRun> {
        self.capture(node_list);
        Ok(self.validate.clone().unwrap_or(ToolRun {
            status: 0,
            output: String::new(),
        }))
    }
}
