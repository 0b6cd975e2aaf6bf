//! `gpufleet state <resume|drain|down|reserve|clear-reservations> [--reason R]`

use anyhow::Result;

use super::{Context, Targets};
use crate::domain::dispatcher::Action;
use crate::domain::node::NodeSet;
use crate::domain::transition::Transition;

pub fn run(ctx: &Context, targets: &Targets, transition: &str, reason: Option<String>) -> Result<bool> {
    let transition: Transition = transition.parse()?;
    let action = Action::State { transition, reason };

    // cluster-wide; the node selection is not consulted
    if transition == Transition::ClearReservations {
        return ctx.run_on(action, NodeSet::new());
    }
    ctx.run(action, targets)
}
