//! Parsers for Slurm command output.

use crate::domain::node::{NodeName, SchedulerState};

/// Parse `sinfo -N -h -o "%N %T"` lines. A node in several partitions appears once.
pub fn parse_node_states(output: &str) -> Vec<(NodeName, SchedulerState)> {
    let mut nodes: Vec<(NodeName, SchedulerState)> = Vec::new();
    for line in output.lines() {
        let mut fields = line.split_whitespace();
        let (Some(name), Some(state)) = (fields.next(), fields.next()) else {
            continue;
        };
        if nodes.iter().any(|(n, _)| n == name) {
            continue;
        }
        nodes.push((name.to_string(), SchedulerState::parse(state)));
    }
    nodes
}

/// Split a `--oneliner` record into `key=value` pairs. Values containing spaces
/// (e.g. `Reason=Not responding [slurm@...]`) run up to the next `Key=` token.
pub fn parse_oneliner(line: &str) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = Vec::new();
    for token in line.split_whitespace() {
        match token.split_once('=') {
            Some((key, value)) if is_key(key) => pairs.push((key.to_string(), value.to_string())),
            _ => {
                if let Some((_, value)) = pairs.last_mut() {
                    value.push(' ');
                    value.push_str(token);
                }
            }
        }
    }
    pairs
}

fn is_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ':' | '/' | '_' | '.'))
}

fn field<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// Reason annotation from `scontrol show node <n> --oneliner`.
pub fn parse_node_reason(output: &str) -> Option<String> {
    let line = output.lines().find(|l| !l.trim().is_empty())?;
    let pairs = parse_oneliner(line);
    let reason = field(&pairs, "Reason")?.trim();
    if reason.is_empty() || reason == "(null)" || reason == "None" {
        None
    } else {
        Some(reason.to_string())
    }
}

/// One `scontrol show reservation --oneliner` line → (name, compressed node list, state).
pub fn parse_reservations(output: &str) -> Vec<(String, String, String)> {
    output
        .lines()
        .filter(|l| l.contains("ReservationName="))
        .filter_map(|line| {
            let pairs = parse_oneliner(line);
            let name = field(&pairs, "ReservationName")?.to_string();
            let nodes = field(&pairs, "Nodes").unwrap_or_default().to_string();
            let state = field(&pairs, "State").unwrap_or("UNKNOWN").to_string();
            Some((name, nodes, state))
        })
        .collect()
}

/// `Reservation created: root_12`
pub fn parse_reservation_created(output: &str) -> Option<String> {
    output
        .lines()
        .find_map(|l| l.trim().strip_prefix("Reservation created:"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// `Submitted batch job 11` or the bare id printed by `sbatch --parsable`.
pub fn parse_job_id(output: &str) -> Option<String> {
    let line = output.lines().map(str::trim).find(|l| !l.is_empty())?;
    let id = match line.find("job ") {
        Some(idx) => line[idx + 4..].trim(),
        // --parsable prints "id" or "id;cluster"
        None => line.split(';').next().unwrap_or(line),
    };
    if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) {
        Some(id.to_string())
    } else {
        None
    }
}

/// Last `lines` lines of `text`.
pub fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}
