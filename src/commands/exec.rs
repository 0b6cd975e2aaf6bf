//! `gpufleet exec [--command CMD]`: one command, or an interactive loop until `exit`.

use anyhow::Result;

use super::{Context, Targets};
use crate::domain::dispatcher::Action;

pub fn run(ctx: &Context, targets: &Targets, command: Option<String>) -> Result<bool> {
    let command = command.filter(|c| !c.trim().is_empty());
    ctx.run(Action::Exec { command }, targets)
}
