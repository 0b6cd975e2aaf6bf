//! Append-only record of executed actions. Never read back.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use tracing::warn;

use crate::domain::node::NodeSet;
use crate::domain::types::{ActionKind, RunSummary};

pub struct ActionLog {
    path: PathBuf,
}

impl ActionLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line. A write failure is logged and otherwise ignored.
    pub fn record(&self, kind: ActionKind, nodes: &NodeSet, summary: &RunSummary, detail: &str) {
        let line = format_line(kind, nodes, summary, detail);
        if let Err(e) = self.append(&line) {
            warn!(path = %self.path.display(), error = %e, "could not append to action log");
        }
    }

    fn append(&self, line: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        writeln!(file, "{line}").context("writing action log")?;
        Ok(())
    }
}

fn format_line(kind: ActionKind, nodes: &NodeSet, summary: &RunSummary, detail: &str) -> String {
    let nodes = if nodes.is_empty() {
        "-".to_string()
    } else {
        nodes.joined()
    };
    let mut line = format!(
        "{} {} nodes={} ok={} failed={} unattributed={}",
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        kind,
        nodes,
        summary.succeeded.len(),
        summary.failed.len(),
        summary.unattributed.len(),
    );
    let detail = detail.trim();
    if !detail.is_empty() {
        line.push(' ');
        line.push_str(&detail.replace('\n', " "));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_one_line_per_action() {
        let dir = tempfile::tempdir().unwrap();
        let log = ActionLog::new(dir.path().join("state/actions.log"));
        let nodes: NodeSet = ["gpu-1", "gpu-2"].into_iter().collect();
        let mut summary = RunSummary::default();
        summary.record("gpu-1", true);
        summary.record("gpu-2", false);

        log.record(ActionKind::Reboot, &nodes, &summary, "");
        log.record(ActionKind::StateUpdate, &nodes, &RunSummary::default(), "drain: xid\n79");

        let content = fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("reboot nodes=gpu-1,gpu-2 ok=1 failed=1 unattributed=0"));
        assert!(lines[1].ends_with("state nodes=gpu-1,gpu-2 ok=0 failed=0 unattributed=0 drain: xid 79"));
        assert!(chrono::DateTime::parse_from_rfc3339(lines[0].split(' ').next().unwrap()).is_ok());
    }

    #[test]
    fn unwritable_path_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "").unwrap();
        let log = ActionLog::new(blocker.join("actions.log"));
        log.record(ActionKind::Identify, &NodeSet::new(), &RunSummary::default(), "");
        assert!(!log.path().exists());
    }
}
