//! `gpufleet benchmark [--repetitions N]`

use anyhow::{bail, Result};

use super::{Context, Targets};
use crate::domain::dispatcher::Action;

pub fn run(ctx: &Context, targets: &Targets, repetitions: Option<u32>) -> Result<bool> {
    let repetitions = repetitions.unwrap_or(ctx.config.benchmark.repetitions);
    if repetitions == 0 {
        bail!("--repetitions must be at least 1");
    }
    ctx.run(Action::Benchmark { repetitions }, targets)
}
