//! `gpufleet tag [--check|--setup]`
//!
//! Without a mode flag, tags every selected node unhealthy. `--check` and `--setup` forward
//! to the tagging utility's own configuration modes and need no nodes.

use anyhow::Result;
use colored::Colorize;

use super::{Context, Targets};
use crate::domain::dispatcher::Action;
use crate::tools::{ExternalTools, ToolRun};

pub fn run(ctx: &Context, targets: &Targets, check: bool, setup: bool) -> Result<bool> {
    if check || setup {
        return namespace(ctx.tools(), setup);
    }
    ctx.run(Action::Tag, targets)
}

/// Check the tag namespace, or create it when `setup` is set.
fn namespace(tools: &dyn ExternalTools, setup: bool) -> Result<bool> {
    let run = if setup {
        println!("{} creating tag namespace", ">>".cyan().bold());
        tools.tag_setup()?
    } else {
        println!("{} checking tag namespace", ">>".cyan().bold());
        tools.tag_check()?
    };
    Ok(report(run))
}

fn report(run: ToolRun) -> bool {
    for line in run.output.lines() {
        println!("   {line}");
    }
    if run.success() {
        println!("{} done", "ok".green().bold());
    } else {
        println!("{} tagging utility exited with {}", "!!".red().bold(), run.status);
    }
    run.success()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTools;

    #[test]
    fn check_runs_only_the_check_mode() {
        let tools = FakeTools::new();
        assert!(namespace(&tools, false).unwrap());
        assert_eq!(tools.namespace_calls(), vec!["check"]);
        assert!(tools.tagged().is_empty());
    }

    #[test]
    fn failed_setup_is_reported() {
        let tools = FakeTools::new().namespace_status(1);
        assert!(!namespace(&tools, true).unwrap());
        assert_eq!(tools.namespace_calls(), vec!["setup"]);
    }
}
