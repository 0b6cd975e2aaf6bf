//! `gpufleet healthcheck [--latest] [--parallel|--sequential]`

use anyhow::Result;

use super::{Context, Targets};
use crate::domain::dispatcher::Action;
use crate::remote::ExecutionStrategy;

pub fn run(ctx: &Context, targets: &Targets, latest: bool, parallel: bool, sequential: bool) -> Result<bool> {
    let strategy = match (parallel, sequential) {
        (true, _) => Some(ExecutionStrategy::FanOut),
        (_, true) => Some(ExecutionStrategy::Sequential),
        _ => None,
    };
    ctx.run(Action::Healthcheck { latest, strategy }, targets)
}
