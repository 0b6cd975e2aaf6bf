//! External utilities the orchestrator drives: unhealthy tagging, the pairwise bandwidth
//! driver and the readiness playbook.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, instrument};

use crate::config::ToolsConfig;
use crate::domain::node::NodeName;
use crate::error::{FleetError, FleetResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRun {
    pub status: i32,
    pub output: String,
}

impl ToolRun {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

pub trait ExternalTools {
    fn tag_unhealthy(&self, resource_id: &str) -> FleetResult<()>;

    /// Whether the tag namespace and tag exist.
    fn tag_check(&self) -> FleetResult<ToolRun>;

    fn tag_setup(&self) -> FleetResult<ToolRun>;

    /// Streams to the terminal; the driver leaves its own log artifacts.
    fn pairwise_benchmark(&self, node_list: &Path) -> FleetResult<ToolRun>;

    fn validate(&self, node_list: &Path) -> FleetResult<ToolRun>;
}

/// Search PATH for a tool, or accept an explicit path that exists.
pub fn find(name: &str) -> Option<PathBuf> {
    if name.contains('/') {
        let p = PathBuf::from(name);
        return p.is_file().then_some(p);
    }
    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths)
            .map(|dir| dir.join(name))
            .find(|path| path.is_file())
    })
}

#[derive(Debug, Clone)]
pub struct LocalTools {
    config: ToolsConfig,
}

impl LocalTools {
    pub fn new(config: &ToolsConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    fn locate(&self, tool: &str) -> FleetResult<PathBuf> {
        find(tool).ok_or_else(|| {
            FleetError::FatalPrecondition(format!("{tool} not found (check the tools section of the config)"))
        })
    }

    fn capture(&self, program: &Path, args: &[&str]) -> FleetResult<ToolRun> {
        debug!(program = %program.display(), ?args, "running tool");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| FleetError::spawn(program.display().to_string(), e))?;
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(ToolRun {
            status: output.status.code().unwrap_or(-1),
            output: text,
        })
    }
}

impl ExternalTools for LocalTools {
    #[instrument(skip(self))]
    fn tag_unhealthy(&self, resource_id: &str) -> FleetResult<()> {
        let program = self.locate(&self.config.tag_utility)?;
        let run = self.capture(&program, &["--instance-id", resource_id])?;
        if run.success() {
            Ok(())
        } else {
            Err(FleetError::tool(&self.config.tag_utility, run.output.trim().to_string()))
        }
    }

    fn tag_check(&self) -> FleetResult<ToolRun> {
        let program = self.locate(&self.config.tag_utility)?;
        self.capture(&program, &["--check"])
    }

    fn tag_setup(&self) -> FleetResult<ToolRun> {
        let program = self.locate(&self.config.tag_utility)?;
        self.capture(&program, &["--setup"])
    }

    fn pairwise_benchmark(&self, node_list: &Path) -> FleetResult<ToolRun> {
        let program = self.locate(&self.config.pairwise_driver)?;
        let status = Command::new(&program)
            .arg(node_list)
            .stdin(Stdio::null())
            .status()
            .map_err(|e| FleetError::spawn(program.display().to_string(), e))?;
        Ok(ToolRun {
            status: status.code().unwrap_or(-1),
            output: String::new(),
        })
    }

    fn validate(&self, node_list: &Path) -> FleetResult<ToolRun> {
        let program = self.locate(&self.config.ansible_playbook)?;
        let inventory = node_list.display().to_string();
        self.capture(&program, &["-i", &inventory, &self.config.validate_playbook])
    }
}

/// Per-host verdicts from an ansible `PLAY RECAP` block; `true` means ready.
///
/// ```text
/// gpu-1   : ok=12  changed=0  unreachable=0  failed=0  skipped=3
/// gpu-2   : ok=4   changed=0  unreachable=1  failed=0  skipped=0
/// ```
pub fn parse_play_recap(output: &str) -> BTreeMap<NodeName, bool> {
    let mut verdicts = BTreeMap::new();
    let Some(start) = output.find("PLAY RECAP") else {
        return verdicts;
    };
    for line in output[start..].lines().skip(1) {
        let Some((host, counters)) = line.split_once(" : ") else {
            continue;
        };
        let counter = |key: &str| -> u32 {
            counters
                .split_whitespace()
                .find_map(|kv| kv.strip_prefix(key)?.strip_prefix('='))
                .and_then(|v| v.parse().ok())
                .unwrap_or(0)
        };
        let ready = counter("failed") == 0 && counter("unreachable") == 0;
        verdicts.insert(host.trim().to_string(), ready);
    }
    verdicts
}
