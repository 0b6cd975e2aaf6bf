use std::collections::BTreeMap;
use std::process::Command;

use tracing::debug;

use super::{connect_timeout, FanOutOutput, FanOutShell};
use crate::config::FanOutConfig;
use crate::domain::node::NodeName;
use crate::error::{FleetError, FleetResult};

#[derive(Debug, Clone)]
pub struct Pdsh {
    program: String,
    connect_timeout_secs: u64,
    command_timeout_secs: u64,
    user: Option<String>,
}

impl Pdsh {
    pub fn new(config: &FanOutConfig, user: Option<String>) -> Self {
        Self {
            program: config.program.clone(),
            connect_timeout_secs: config.connect_timeout_secs,
            command_timeout_secs: config.command_timeout_secs,
            user,
        }
    }
}

impl FanOutShell for Pdsh {
    fn exec_all(&self, hosts: &[NodeName], command: &str) -> FleetResult<FanOutOutput> {
        let mut cmd = Command::new(&self.program);
        cmd.args(["-R", "ssh", "-S"])
            .args(["-t", &connect_timeout(self.connect_timeout_secs).as_secs().to_string()])
            .args(["-u", &self.command_timeout_secs.to_string()])
            .args(["-w", &hosts.join(",")]);
        if let Some(user) = &self.user {
            cmd.args(["-l", user]);
        }
        cmd.arg(command);

        debug!(program = %self.program, hosts = hosts.len(), command, "fan-out");
        let output = cmd
            .output()
            .map_err(|e| FleetError::spawn(&self.program, e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        Ok(parse_output(
            output.status.code().unwrap_or(-1),
            &stdout,
            &stderr,
        ))
    }
}

/// Group `host: line` output by host and collect the per-host annotations pdsh
/// writes to stderr:
///
/// ```text
/// pdsh@login: gpu-2: ssh exited with exit code 1
/// pdsh@login: gpu-3: connect: Connection timed out
/// ```
pub fn parse_output(status: i32, stdout: &str, stderr: &str) -> FanOutOutput {
    let mut output: BTreeMap<NodeName, Vec<String>> = BTreeMap::new();
    let mut failures: BTreeMap<NodeName, i32> = BTreeMap::new();

    for line in stderr.lines() {
        let Some(rest) = line.strip_prefix("pdsh@") else {
            if let Some((host, text)) = split_host_line(line) {
                output.entry(host).or_default().push(text);
            }
            continue;
        };
        // "login: gpu-2: ssh exited with exit code 1"
        let mut parts = rest.splitn(3, ": ");
        let (Some(_origin), Some(host), Some(message)) = (parts.next(), parts.next(), parts.next()) else {
            continue;
        };
        let code = message
            .rsplit_once("exit code ")
            .and_then(|(_, c)| c.trim().parse::<i32>().ok())
            .unwrap_or(SSH_CONNECT_FAILURE);
        if code != 0 {
            failures.insert(host.to_string(), code);
        }
        output.entry(host.to_string()).or_default().push(message.to_string());
    }

    for line in stdout.lines() {
        if let Some((host, text)) = split_host_line(line) {
            output.entry(host).or_default().push(text);
        }
    }

    FanOutOutput {
        status,
        output,
        failures,
    }
}

const SSH_CONNECT_FAILURE: i32 = 255;

fn split_host_line(line: &str) -> Option<(NodeName, String)> {
    let (host, text) = line.split_once(": ")?;
    if host.is_empty() || host.contains(char::is_whitespace) {
        return None;
    }
    Some((host.to_string(), text.to_string()))
}
