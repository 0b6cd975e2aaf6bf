//! Subcommand entry points. `Context` wires the production collaborators from the loaded
//! configuration; each subcommand turns its flags into an `Action` for the dispatcher.

pub mod benchmark;
pub mod capacity;
pub mod config;
pub mod exec;
pub mod healthcheck;
pub mod identify;
pub mod pair_benchmark;
pub mod reboot;
pub mod state;
pub mod tag;
pub mod validate;

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args;
use tracing::debug;

use crate::cloud::{Inventory, OciCli};
use crate::config::Config;
use crate::domain::confirm::StdinInput;
use crate::domain::dispatcher::{Action, ActionDispatcher, ActionRequest, Collaborators};
use crate::domain::node::NodeSet;
use crate::domain::resolver::{NodeSetResolver, StateFilter, FILTER_KEYWORDS};
use crate::remote::{Pdsh, Ssh};
use crate::slurm::SlurmCli;
use crate::telemetry::ActionLog;
use crate::tools::LocalTools;

/// Node selection shared by every node-targeting subcommand.
#[derive(Debug, Clone, Default, Args)]
pub struct Targets {
    /// Node names, comma lists, bracketed hostlists (gpu-[1-4]) or files of names
    pub nodes: Vec<String>,

    /// Select nodes by scheduler state instead of by name
    #[arg(long = "filter", value_name = "KEYWORD", long_help = format!("Select nodes by scheduler state: {FILTER_KEYWORDS}"))]
    pub filters: Vec<String>,
}

/// Process-wide settings from the global flags.
#[derive(Debug, Clone, Default)]
pub struct Globals {
    pub quiet: bool,
    pub config: Option<PathBuf>,
}

/// Loaded configuration plus the production collaborators built from it.
pub struct Context {
    pub config: Config,
    pub quiet: bool,
    log: ActionLog,
    scheduler: SlurmCli,
    inventory: Inventory,
    shell: Ssh,
    fanout: Pdsh,
    control: OciCli,
    tools: LocalTools,
    input: StdinInput,
}

impl Context {
    pub fn from_config(config: Config, quiet: bool) -> Result<Self> {
        let inventory = Inventory::load(&config.inventory.path)
            .with_context(|| format!("loading inventory {}", config.inventory.path.display()))?;

        let log = ActionLog::new(&config.log.action_log);
        debug!(path = %log.path().display(), "action log");

        Ok(Self {
            log,
            scheduler: SlurmCli::new(),
            shell: Ssh::new(&config.ssh),
            fanout: Pdsh::new(&config.fanout, config.ssh.user.clone()),
            control: OciCli::new(&config.cloud),
            tools: LocalTools::new(&config.tools),
            input: StdinInput,
            inventory,
            config,
            quiet,
        })
    }

    pub fn collaborators(&self) -> Collaborators<'_> {
        Collaborators {
            scheduler: &self.scheduler,
            inventory: &self.inventory,
            shell: &self.shell,
            fanout: &self.fanout,
            control: &self.control,
            tools: &self.tools,
            input: &self.input,
        }
    }

    pub fn control(&self) -> &OciCli {
        &self.control
    }

    pub fn tools(&self) -> &LocalTools {
        &self.tools
    }

    pub fn resolve(&self, targets: &Targets) -> Result<NodeSet> {
        let filters = targets
            .filters
            .iter()
            .map(|f| f.parse::<StateFilter>())
            .collect::<Result<Vec<_>, _>>()?;
        let nodes = NodeSetResolver::new(&self.scheduler, &self.input, !self.quiet)
            .resolve(&targets.nodes, &filters)?;
        Ok(nodes)
    }

    /// Resolve, then dispatch. `Ok(false)` when the action finished with per-node failures.
    pub fn run(&self, action: Action, targets: &Targets) -> Result<bool> {
        let nodes = self.resolve(targets)?;
        self.run_on(action, nodes)
    }

    pub fn run_on(&self, action: Action, nodes: NodeSet) -> Result<bool> {
        let request = ActionRequest {
            action,
            nodes,
            quiet: self.quiet,
        };
        let summary = ActionDispatcher::new(self.collaborators(), &self.config)
            .with_log(&self.log)
            .dispatch(&request)?;
        Ok(summary.is_clean())
    }
}
