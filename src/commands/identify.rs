//! `gpufleet identify`: detailed node table, nothing else.

use anyhow::Result;

use super::{Context, Targets};
use crate::domain::dispatcher::Action;

pub fn run(ctx: &Context, targets: &Targets) -> Result<bool> {
    ctx.run(Action::Identify, targets)
}
