//! `gpufleet pair-benchmark`: hand the node list to the pairwise bandwidth driver.

use anyhow::Result;

use super::{Context, Targets};
use crate::domain::dispatcher::Action;

pub fn run(ctx: &Context, targets: &Targets) -> Result<bool> {
    ctx.run(Action::PairBenchmark, targets)
}
