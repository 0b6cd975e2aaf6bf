//! `gpufleet capacity`: host counts per state in the capacity topology.

use anyhow::{Context as _, Result};
use colored::Colorize;

use super::Context;
use crate::cloud::{CapacitySummary, ControlPlane};

pub fn run(ctx: &Context) -> Result<bool> {
    show(ctx.control())?;
    Ok(true)
}

fn show(control: &dyn ControlPlane) -> Result<CapacitySummary> {
    let hosts = control
        .capacity_hosts()
        .context("listing capacity topology hosts")?;
    let summary = CapacitySummary::from_hosts(&hosts);
    print(&summary);
    Ok(summary)
}

fn print(summary: &CapacitySummary) {
    println!("{}", "Capacity topology".bold());
    println!("  {:<22} {}", "TOTAL", summary.total);
    for (category, count) in &summary.counts {
        let label = format!("{category:<22}");
        let label = match category.as_str() {
            "RUNNING" => label.green(),
            c if c.ends_with("DEGRADED") => label.red(),
            _ => label.normal(),
        };
        println!("  {label} {count}");
    }

    if !summary.degraded_instances.is_empty() {
        println!();
        println!("{} running on degraded hosts:", "!!".yellow().bold());
        for instance in &summary.degraded_instances {
            println!("   {instance}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::CapacityHost;
    use crate::testing::FakeControlPlane;

    fn host(details: &str, id: Option<&str>, name: Option<&str>) -> CapacityHost {
        CapacityHost {
            lifecycle_details: details.to_string(),
            instance_id: id.map(String::from),
            instance_name: name.map(String::from),
        }
    }

    #[test]
    fn counts_hosts_from_the_control_plane() {
        let control = FakeControlPlane::new().capacity(vec![
            host("AVAILABLE", Some("ocid1.instance.1"), Some("inst-1")),
            host("AVAILABLE", None, None),
            host("DEGRADED", Some("ocid1.instance.3"), Some("inst-3")),
            host("DEGRADED", None, None),
        ]);
        let summary = show(&control).unwrap();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.counts["RUNNING"], 1);
        assert_eq!(summary.counts["AVAILABLE"], 1);
        assert_eq!(summary.counts["RUNNING_DEGRADED"], 1);
        assert_eq!(summary.counts["UNAVAILABLE_DEGRADED"], 1);
        assert_eq!(summary.degraded_instances, vec!["inst-3"]);
    }

    #[test]
    fn empty_topology_is_not_an_error() {
        let summary = show(&FakeControlPlane::new()).unwrap();
        assert_eq!(summary.total, 0);
        assert!(summary.counts.is_empty());
    }
}
