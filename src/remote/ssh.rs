use std::process::Command;

use tracing::debug;

use super::{connect_timeout, RemoteOutput, RemoteShell};
use crate::config::SshConfig;
use crate::error::{FleetError, FleetResult};

/// ssh reserves 255 for its own failures (refused, timed out, auth).
const SSH_FAILURE: i32 = 255;

#[derive(Debug, Clone)]
pub struct Ssh {
    user: Option<String>,
    options: Vec<String>,
    connect_timeout_secs: u64,
}

impl Ssh {
    pub fn new(config: &SshConfig) -> Self {
        Self {
            user: config.user.clone(),
            options: config.options.clone(),
            connect_timeout_secs: config.connect_timeout_secs,
        }
    }

    fn args(&self, host: &str, command: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            format!("ConnectTimeout={}", connect_timeout(self.connect_timeout_secs).as_secs()),
        ];
        for opt in &self.options {
            args.push("-o".to_string());
            args.push(opt.clone());
        }
        args.push(match &self.user {
            Some(user) => format!("{user}@{host}"),
            None => host.to_string(),
        });
        args.push(command.to_string());
        args
    }
}

impl RemoteShell for Ssh {
    fn exec(&self, host: &str, command: &str) -> FleetResult<RemoteOutput> {
        debug!(host, command, "ssh");
        let output = Command::new("ssh")
            .args(self.args(host, command))
            .output()
            .map_err(|e| FleetError::spawn("ssh", e))?;

        let status = output.status.code().unwrap_or(-1);
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);

        if status == SSH_FAILURE {
            return Err(FleetError::RemoteUnreachable {
                node: host.to_string(),
                reason: stderr.trim().to_string(),
            });
        }

        if !stderr.trim().is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&stderr);
        }

        Ok(RemoteOutput {
            status,
            output: text.trim_end().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_carry_timeout_options_and_user() {
        let ssh = Ssh::new(&SshConfig {
            connect_timeout_secs: 3,
            user: Some("opc".into()),
            options: vec!["BatchMode=yes".into()],
        });
        assert_eq!(
            ssh.args("gpu-1", "hostname"),
            vec!["-o", "ConnectTimeout=3", "-o", "BatchMode=yes", "opc@gpu-1", "hostname"]
        );
    }

    #[test]
    fn zero_timeout_is_clamped() {
        let ssh = Ssh::new(&SshConfig {
            connect_timeout_secs: 0,
            user: None,
            options: vec![],
        });
        assert_eq!(ssh.args("gpu-1", "true")[1], "ConnectTimeout=1");
    }
}
