//! Action dispatch: display, confirm, execute.
//!
//! Every action starts by collecting and printing the node table, asks the operator (unless
//! quiet), then runs. Per-node failures end up in the returned `RunSummary`; only fatal
//! preconditions and an operator quit come back as errors.

use std::io::Write;

use colored::Colorize;
use tracing::{info, warn};

use super::batch::BatchJobOrchestrator;
use super::collector::{Collection, NodeStatusCollector};
use super::confirm::{choose, confirm, ConfirmState, OperatorInput};
use super::node::{InstanceIdentity, NodeRecord, NodeSet};
use super::transition::{SlurmStateTransitioner, Transition, TransitionReport};
use super::types::{ActionKind, JobTerminalState, RunSummary};
use crate::cloud::{ControlPlane, Inventory};
use crate::config::Config;
use crate::error::{FleetError, FleetResult};
use crate::remote::{
    ExecutionStrategy, FanOut, FanOutShell, RemoteExecutor, RemoteShell, Sequential,
};
use crate::slurm::Scheduler;
use crate::telemetry::ActionLog;
use crate::tools::{parse_play_recap, ExternalTools};

/// Everything an action may talk to.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub scheduler: &'a dyn Scheduler,
    pub inventory: &'a Inventory,
    pub shell: &'a dyn RemoteShell,
    pub fanout: &'a dyn FanOutShell,
    pub control: &'a dyn ControlPlane,
    pub tools: &'a dyn ExternalTools,
    pub input: &'a dyn OperatorInput,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Healthcheck {
        latest: bool,
        /// Forced by the operator; otherwise picked from the set size.
        strategy: Option<ExecutionStrategy>,
    },
    Reboot,
    Tag,
    Benchmark {
        repetitions: u32,
    },
    PairBenchmark,
    Exec {
        command: Option<String>,
    },
    State {
        transition: Transition,
        reason: Option<String>,
    },
    Validate,
    Identify,
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Healthcheck { latest: false, .. } => ActionKind::HealthcheckFresh,
            Action::Healthcheck { latest: true, .. } => ActionKind::HealthcheckLatest,
            Action::Reboot => ActionKind::Reboot,
            Action::Tag => ActionKind::Tag,
            Action::Benchmark { .. } => ActionKind::Benchmark,
            Action::PairBenchmark => ActionKind::PairBenchmark,
            Action::Exec { .. } => ActionKind::Exec,
            Action::State { .. } => ActionKind::StateUpdate,
            Action::Validate => ActionKind::Validate,
            Action::Identify => ActionKind::Identify,
        }
    }

    /// Destructive actions take only full-word answers and warn about busy nodes.
    pub fn is_destructive(&self) -> bool {
        match self {
            Action::Reboot | Action::Tag => true,
            Action::State { transition, .. } => transition.is_destructive(),
            _ => false,
        }
    }

    fn question(&self, count: usize) -> String {
        match self {
            Action::Healthcheck { latest: false, .. } => format!("Run healthchecks on {count} node(s)?"),
            Action::Healthcheck { latest: true, .. } => {
                format!("Fetch the latest healthcheck from {count} node(s)?")
            }
            Action::Reboot => format!("Hard reboot {count} node(s)?"),
            Action::Tag => format!("Tag {count} node(s) unhealthy?"),
            Action::Benchmark { repetitions } => {
                format!("Submit {repetitions} NCCL benchmark job(s) over {count} node(s)?")
            }
            Action::PairBenchmark => format!("Run the pairwise benchmark over {count} node(s)?"),
            Action::Exec { .. } => format!("Run commands on {count} node(s)?"),
            Action::State {
                transition: Transition::ClearReservations,
                ..
            } => "Delete every active reservation in the cluster?".to_string(),
            Action::State { transition, .. } => format!("Apply {transition} to {count} node(s)?"),
            Action::Validate => format!("Validate {count} node(s) with the playbook?"),
            Action::Identify => String::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub action: Action,
    pub nodes: NodeSet,
    pub quiet: bool,
}

pub struct ActionDispatcher<'a> {
    with: Collaborators<'a>,
    config: &'a Config,
    log: Option<&'a ActionLog>,
}

impl<'a> ActionDispatcher<'a> {
    pub fn new(with: Collaborators<'a>, config: &'a Config) -> Self {
        Self {
            with,
            config,
            log: None,
        }
    }

    pub fn with_log(mut self, log: &'a ActionLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn dispatch(&self, request: &ActionRequest) -> FleetResult<RunSummary> {
        let kind = request.action.kind();
        info!(action = %kind, nodes = request.nodes.len(), quiet = request.quiet, "dispatching");

        // cluster-wide, no node table to show
        if let Action::State {
            transition: Transition::ClearReservations,
            ..
        } = &request.action
        {
            return self.clear_reservations(request);
        }

        let collection = NodeStatusCollector::new(
            self.with.scheduler,
            self.with.inventory,
            self.with.shell,
            self.with.control,
        )
        .collect(&request.nodes, kind.needs_detail())?;

        if request.action == Action::Identify {
            return Ok(RunSummary::default());
        }

        if collection.flags.any() {
            warn!(flags = ?collection.flags, "selection includes degraded nodes");
        }
        let mut warnings = collection.warnings();
        if request.action.is_destructive() {
            for record in collection.busy() {
                let unsafe_state = FleetError::UnsafeState {
                    node: record.name.clone(),
                    state: record.state.to_string(),
                };
                println!("{} {}", "!!".yellow().bold(), unsafe_state);
                warnings.push(unsafe_state.to_string());
            }
        }

        self.preconditions(&request.action, &collection)?;

        let reason = match &request.action {
            Action::State { transition, reason } if transition.needs_reason() => {
                Some(self.reason(reason.as_deref(), request.quiet)?)
            }
            _ => None,
        };

        if !self.confirmed(request, collection.records.len())? {
            println!("{} Nothing done.", "::".blue().bold());
            return Ok(RunSummary::default());
        }

        let (summary, detail) = match &request.action {
            Action::Healthcheck { latest, strategy } => {
                self.healthcheck(&collection, *latest, *strategy, request.quiet, &mut warnings)?
            }
            Action::Reboot => (self.reboot(&collection.records)?, String::new()),
            Action::Tag => (self.tag(&collection.records)?, String::new()),
            Action::Benchmark { repetitions } => self.benchmark(&collection, *repetitions)?,
            Action::PairBenchmark => (self.pair_benchmark(&collection.nodes())?, String::new()),
            Action::Exec { command } => self.exec(&collection.nodes(), command.as_deref(), request.quiet)?,
            Action::State { transition, .. } => {
                let report = SlurmStateTransitioner::new(self.with.scheduler, &self.config.reservation)
                    .apply(&collection.records, *transition, reason.as_deref())?;
                let detail = format!("{transition}{}", reason.map(|r| format!(": {r}")).unwrap_or_default());
                (state_summary(&report), detail)
            }
            Action::Validate => (self.validate(&collection.nodes())?, String::new()),
            Action::Identify => (RunSummary::default(), String::new()),
        };

        self.finish(kind, &collection.nodes(), &summary, &warnings, &detail);
        Ok(summary)
    }

    fn preconditions(&self, action: &Action, collection: &Collection) -> FleetResult<()> {
        let Action::Benchmark { .. } = action else {
            return Ok(());
        };
        let blocked: Vec<String> = collection
            .records
            .iter()
            .filter(|r| r.state.is_busy() || r.state.is_drain_or_down())
            .map(|r| format!("{} ({})", r.name, r.state))
            .collect();
        if !blocked.is_empty() {
            return Err(FleetError::FatalPrecondition(format!(
                "benchmark needs every node idle; not idle: {}",
                blocked.join(", ")
            )));
        }
        let orchestrator = BatchJobOrchestrator::new(self.with.scheduler, &self.config.benchmark);
        orchestrator.select_profile(&collection.records)?;
        orchestrator.overlapping_reservation(&collection.nodes())?;
        Ok(())
    }

    fn confirmed(&self, request: &ActionRequest, count: usize) -> FleetResult<bool> {
        if request.quiet {
            return Ok(true);
        }
        let question = request.action.question(count);
        match confirm(self.with.input, &question, request.action.is_destructive())? {
            ConfirmState::Confirmed => Ok(true),
            ConfirmState::Declined => Ok(false),
            ConfirmState::Aborted | ConfirmState::Prompting => Err(FleetError::Aborted),
        }
    }

    fn reason(&self, given: Option<&str>, quiet: bool) -> FleetResult<String> {
        if let Some(reason) = given.map(str::trim).filter(|r| !r.is_empty()) {
            return Ok(reason.to_string());
        }
        if quiet {
            return Err(FleetError::InvalidArgument("--reason is required in quiet mode".into()));
        }
        loop {
            match self.with.input.ask("Reason:")? {
                None => return Err(FleetError::Aborted),
                Some(answer) if answer.trim() == "quit" => return Err(FleetError::Aborted),
                Some(answer) if !answer.trim().is_empty() => return Ok(answer.trim().to_string()),
                Some(_) => println!("   A reason is required."),
            }
        }
    }

    // ── Execute steps ──────────────────────────────────────

    fn healthcheck(
        &self,
        collection: &Collection,
        latest: bool,
        forced: Option<ExecutionStrategy>,
        quiet: bool,
        warnings: &mut Vec<String>,
    ) -> FleetResult<(RunSummary, String)> {
        let nodes = collection.nodes();
        let hc = &self.config.healthcheck;

        let (strategy, command) = if latest {
            (ExecutionStrategy::Sequential, format!("cat {}", hc.latest_path))
        } else {
            let strategy = match forced {
                Some(strategy) => strategy,
                None if nodes.len() <= hc.sequential_threshold => ExecutionStrategy::Sequential,
                None if quiet => ExecutionStrategy::FanOut,
                None => {
                    let question = format!("{} nodes selected. Run sequentially or in parallel?", nodes.len());
                    match choose(self.with.input, &question, &["sequential", "parallel"])? {
                        "parallel" => ExecutionStrategy::FanOut,
                        _ => ExecutionStrategy::Sequential,
                    }
                }
            };
            (strategy, hc.fresh_command.clone())
        };

        println!("{} running `{}` ({:?})", ">>".cyan().bold(), command, strategy);
        let report = match strategy {
            ExecutionStrategy::Sequential => Sequential::new(self.with.shell).execute(&nodes, &command),
            ExecutionStrategy::FanOut => FanOut::new(self.with.fanout).execute(&nodes, &command),
        };
        for outcome in report.outcomes.iter().filter(|o| !o.succeeded()) {
            let last = outcome.output.lines().rev().find(|l| !l.trim().is_empty());
            warnings.push(match last {
                Some(line) => format!("{}: {}", outcome.node, line.trim()),
                None => format!("{}: healthcheck failed", outcome.node),
            });
        }
        let summary = report.summary;

        if summary.is_clean() {
            println!(
                "{} Healthchecks gathered on {} nodes",
                "ok".green().bold(),
                summary.succeeded.len()
            );
        } else {
            println!(
                "{} Healthchecks completed with errors on {} of {} nodes",
                "!!".red().bold(),
                summary.failed.len() + summary.unattributed.len(),
                summary.total()
            );
            if !summary.unattributed.is_empty() {
                warnings.push(format!(
                    "parallel run failed without naming nodes; any of {} node(s) may have failed",
                    summary.unattributed.len()
                ));
            }
        }

        let mut detail = format!("{strategy:?}").to_ascii_lowercase();

        if !latest && summary.is_clean() && !quiet {
            let offer = confirm(self.with.input, "All healthchecks passed. Run the pairwise benchmark?", false)?;
            match offer {
                ConfirmState::Confirmed => {
                    let pair = self.pair_benchmark(&nodes)?;
                    if pair.is_clean() {
                        detail.push_str(" pairwise=ok");
                    } else {
                        detail.push_str(" pairwise=failed");
                        warnings.push("pairwise benchmark exited with an error".to_string());
                    }
                }
                ConfirmState::Aborted => {
                    // the healthcheck already ran; record it before quitting
                    self.finish(ActionKind::HealthcheckFresh, &nodes, &summary, &warnings[..], &detail);
                    return Err(FleetError::Aborted);
                }
                _ => {}
            }
        }

        Ok((summary, detail))
    }

    fn reboot(&self, records: &[NodeRecord]) -> FleetResult<RunSummary> {
        self.per_resource(records, "reset", |id| self.with.control.hard_reset(id))
    }

    fn tag(&self, records: &[NodeRecord]) -> FleetResult<RunSummary> {
        self.per_resource(records, "tagged", |id| self.with.tools.tag_unhealthy(id))
    }

    /// Resolve each node's cloud resource id, then run `op` on it. Per-node errors are
    /// recorded; fatal ones (missing configuration, missing binary) stop the loop.
    fn per_resource(
        &self,
        records: &[NodeRecord],
        verb: &str,
        op: impl Fn(&str) -> FleetResult<()>,
    ) -> FleetResult<RunSummary> {
        let mut summary = RunSummary::default();

        for record in records {
            let result = self.resource_id(record).and_then(|id| {
                op(&id)?;
                Ok(id)
            });
            match result {
                Ok(id) => {
                    info!(node = %record.name, resource_id = %id, verb, "done");
                    println!("{} {} {}", "ok".green().bold(), record.name, verb);
                    summary.record(&record.name, true);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(node = %record.name, error = %e, "per-node action failed");
                    println!("{} {}: {}", "!!".red().bold(), record.name, e);
                    summary.record(&record.name, false);
                }
            }
        }
        Ok(summary)
    }

    fn resource_id(&self, record: &NodeRecord) -> FleetResult<String> {
        if let Some(id) = &record.resource_id {
            return Ok(id.clone());
        }
        let InstanceIdentity::Found(instance) = &record.identity else {
            return Err(FleetError::tool("inventory", format!("{} has no instance", record.name)));
        };
        self.with
            .control
            .resource_id(instance)?
            .ok_or_else(|| FleetError::tool("oci", format!("no resource found for instance {instance}")))
    }

    fn benchmark(&self, collection: &Collection, repetitions: u32) -> FleetResult<(RunSummary, String)> {
        let jobs = BatchJobOrchestrator::new(self.with.scheduler, &self.config.benchmark)
            .run(&collection.records, repetitions)?;

        let nodes = collection.nodes();
        let all_completed = jobs
            .iter()
            .all(|j| j.terminal_state == JobTerminalState::Completed);
        let summary = if all_completed {
            nodes.iter().fold(RunSummary::default(), |mut s, n| {
                s.record(n, true);
                s
            })
        } else {
            RunSummary::unattributed(&nodes)
        };

        let detail = jobs
            .iter()
            .map(|j| format!("{}={}", j.job_id, j.terminal_state))
            .collect::<Vec<_>>()
            .join(",");
        Ok((summary, detail))
    }

    fn pair_benchmark(&self, nodes: &NodeSet) -> FleetResult<RunSummary> {
        let list = node_list(nodes)?;
        println!("{} pairwise benchmark over {} node(s)", ">>".cyan().bold(), nodes.len());
        let run = self.with.tools.pairwise_benchmark(list.path())?;
        if run.success() {
            println!("{} pairwise benchmark finished", "ok".green().bold());
            Ok(nodes.iter().fold(RunSummary::default(), |mut s, n| {
                s.record(n, true);
                s
            }))
        } else {
            println!("{} pairwise benchmark exited with {}", "!!".red().bold(), run.status);
            Ok(RunSummary::unattributed(nodes))
        }
    }

    fn exec(&self, nodes: &NodeSet, command: Option<&str>, quiet: bool) -> FleetResult<(RunSummary, String)> {
        let executor = FanOut::new(self.with.fanout);

        if let Some(command) = command {
            let report = executor.execute(nodes, command);
            return Ok((report.summary, command.to_string()));
        }
        if quiet {
            return Err(FleetError::InvalidArgument("exec needs --command in quiet mode".into()));
        }

        let mut summary = RunSummary::default();
        let mut commands = Vec::new();
        loop {
            let Some(line) = self.with.input.ask("command (exit to finish):")? else {
                break;
            };
            let line = line.trim();
            match line {
                "" => continue,
                "exit" | "quit" => break,
                _ => {}
            }
            let report = executor.execute(nodes, line);
            summary.absorb(report.summary);
            commands.push(line.to_string());
        }
        Ok((summary, commands.join("; ")))
    }

    fn validate(&self, nodes: &NodeSet) -> FleetResult<RunSummary> {
        let list = node_list(nodes)?;
        println!("{} validating {} node(s)", ">>".cyan().bold(), nodes.len());
        let run = self.with.tools.validate(list.path())?;
        for line in run.output.lines() {
            println!("   {line}");
        }

        let recap = parse_play_recap(&run.output);
        if recap.is_empty() {
            if run.success() {
                return Ok(nodes.iter().fold(RunSummary::default(), |mut s, n| {
                    s.record(n, true);
                    s
                }));
            }
            return Ok(RunSummary::unattributed(nodes));
        }

        let mut summary = RunSummary::default();
        for node in nodes {
            match recap.get(node) {
                Some(ok) => summary.record(node, *ok),
                None if run.success() => summary.record(node, true),
                None => {
                    summary.unattributed.insert(node.clone());
                }
            }
        }
        Ok(summary)
    }

    fn clear_reservations(&self, request: &ActionRequest) -> FleetResult<RunSummary> {
        println!(
            "{} clear-reservations is cluster-wide; node selection is ignored",
            "!!".yellow().bold()
        );
        if !self.confirmed(request, 0)? {
            println!("{} Nothing done.", "::".blue().bold());
            return Ok(RunSummary::default());
        }
        let report = SlurmStateTransitioner::new(self.with.scheduler, &self.config.reservation)
            .apply(&[], Transition::ClearReservations, None)?;

        // reservation names stand in for nodes; a failed delete makes the run unclean
        let mut summary = RunSummary::default();
        for name in &report.cleared {
            summary.record(name, true);
        }
        let mut warnings = Vec::new();
        for (name, e) in &report.failed {
            summary.record(name, false);
            warnings.push(format!("reservation {name}: {e}"));
        }
        self.finish(
            ActionKind::StateUpdate,
            &NodeSet::new(),
            &summary,
            &warnings,
            &format!("clear-reservations: {}", report.cleared.join(",")),
        );
        Ok(summary)
    }

    fn finish(&self, kind: ActionKind, nodes: &NodeSet, summary: &RunSummary, warnings: &[String], detail: &str) {
        if kind != ActionKind::HealthcheckFresh && kind != ActionKind::HealthcheckLatest && summary.total() > 0 {
            if summary.is_clean() {
                println!("{} {} finished on {} node(s)", "ok".green().bold(), kind, summary.total());
            } else {
                println!(
                    "{} {} completed with errors: {} failed, {} unattributed, {} succeeded",
                    "!!".red().bold(),
                    kind,
                    summary.failed.len(),
                    summary.unattributed.len(),
                    summary.succeeded.len()
                );
            }
        }
        if !summary.failed.is_empty() {
            println!("   failed: {}", summary.failed.iter().cloned().collect::<Vec<_>>().join(","));
        }

        if !warnings.is_empty() {
            println!("{} Warnings:", "!!".yellow().bold());
            for warning in warnings {
                println!("   - {warning}");
            }
        }

        if let Some(log) = self.log {
            log.record(kind, nodes, summary, detail);
        }
    }
}

fn state_summary(report: &TransitionReport) -> RunSummary {
    let mut summary = RunSummary::default();
    for node in &report.applied {
        summary.record(node, true);
    }
    for (node, _) in &report.skipped {
        summary.record(node, true);
    }
    for (node, _) in &report.failed {
        summary.record(node, false);
    }
    if let Some(name) = &report.reservation {
        println!("{} reservation: {}", "::".blue().bold(), name.bold());
    }
    let marker = if report.is_clean() {
        "::".blue().bold()
    } else {
        "!!".red().bold()
    };
    println!(
        "{} {} applied, {} skipped, {} failed",
        marker,
        report.applied.len(),
        report.skipped.len(),
        report.failed.len()
    );
    summary
}

/// Run-scoped node list file handed to external tools; removed on drop.
fn node_list(nodes: &NodeSet) -> FleetResult<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new().prefix("gpufleet-nodes-").tempfile()?;
    for node in nodes {
        writeln!(file, "{node}")?;
    }
    file.flush()?;
    Ok(file)
}
