//! Node status collector. Builds a fresh `NodeRecord` per node from the inventory, the
//! scheduler and (in detailed mode) the node itself.
//!
//! Every source may fail independently per node. A failure degrades that node's record and
//! feeds the aggregate flags; it never stops the rest of the collection.

use colored::Colorize;
use tracing::warn;

use super::node::{FleetHealthFlags, InstanceIdentity, NodeRecord, NodeSet, SchedulerState};
use crate::cloud::{ControlPlane, Inventory};
use crate::error::{FleetError, FleetResult};
use crate::remote::RemoteShell;
use crate::slurm::Scheduler;

/// Serial and shape in one round trip; shape comes from the instance metadata service.
pub const PROBE_COMMAND: &str = concat!(
    r#"echo "serial=$(sudo dmidecode -s system-serial-number 2>/dev/null)"; "#,
    r#"echo "shape=$(curl -sH 'Authorization: Bearer Oracle' -L http://169.254.169.254/opc/v2/instance/ 2>/dev/null | jq -r .shape)""#,
);

#[derive(Debug, Clone)]
pub struct Collection {
    pub records: Vec<NodeRecord>,
    pub flags: FleetHealthFlags,
}

impl Collection {
    pub fn nodes(&self) -> NodeSet {
        self.records.iter().map(|r| r.name.clone()).collect()
    }

    pub fn busy(&self) -> Vec<&NodeRecord> {
        self.records
            .iter()
            .filter(|r| matches!(r.state, SchedulerState::Mixed | SchedulerState::Allocated))
            .collect()
    }

    /// Degraded conditions worth repeating once the action is done.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.flags.has_allocated_nodes {
            warnings.push(format!(
                "{} node(s) were running jobs",
                self.count_where(|r| matches!(r.state, SchedulerState::Mixed | SchedulerState::Allocated))
            ));
        }
        if self.flags.has_drain_or_down_nodes {
            warnings.push(format!(
                "{} node(s) were already drained or down",
                self.count_where(|r| r.state.is_drain_or_down())
            ));
        }
        if self.flags.has_unreachable_nodes {
            warnings.push(format!("{} node(s) were unreachable", self.count_where(|r| r.is_unreachable())));
        }
        if self.flags.has_unknown_identity {
            warnings.push(format!(
                "{} node(s) have no instance in the inventory",
                self.count_where(|r| r.identity == InstanceIdentity::NotFound)
            ));
        }
        let unknown_state = self.count_where(|r| r.state == SchedulerState::Unknown);
        if unknown_state > 0 {
            warnings.push(format!("{unknown_state} node(s) have no scheduler state"));
        }
        warnings
    }

    fn count_where(&self, pred: impl Fn(&NodeRecord) -> bool) -> usize {
        self.records.iter().filter(|&r| pred(r)).count()
    }
}

pub struct NodeStatusCollector<'a> {
    scheduler: &'a dyn Scheduler,
    inventory: &'a Inventory,
    shell: &'a dyn RemoteShell,
    control: &'a dyn ControlPlane,
    echo: bool,
}

impl<'a> NodeStatusCollector<'a> {
    pub fn new(
        scheduler: &'a dyn Scheduler,
        inventory: &'a Inventory,
        shell: &'a dyn RemoteShell,
        control: &'a dyn ControlPlane,
    ) -> Self {
        Self {
            scheduler,
            inventory,
            shell,
            control,
            echo: true,
        }
    }

    #[cfg(test)]
    pub fn quiet(mut self) -> Self {
        self.echo = false;
        self
    }

    /// Collect one record per node, in set order, printing each row as it arrives.
    pub fn collect(&self, nodes: &NodeSet, detail: bool) -> FleetResult<Collection> {
        if nodes.is_empty() {
            return Err(FleetError::NoTargets);
        }

        if self.echo {
            print_header(detail);
        }

        let mut records = Vec::with_capacity(nodes.len());
        for name in nodes {
            let record = self.collect_one(name, detail);
            if self.echo {
                print_row(&record, detail);
            }
            records.push(record);
        }

        let flags = FleetHealthFlags::from_records(&records);
        Ok(Collection { records, flags })
    }

    fn collect_one(&self, name: &str, detail: bool) -> NodeRecord {
        let mut record = NodeRecord::new(name);

        record.identity = match self.inventory.instance(name) {
            Some(instance) => InstanceIdentity::Found(instance.to_string()),
            None => InstanceIdentity::NotFound,
        };

        record.state = match self.scheduler.node_state(name) {
            Ok(Some(state)) => state,
            Ok(None) => SchedulerState::Unknown,
            Err(e) => {
                warn!(node = name, error = %e, "scheduler state query failed");
                SchedulerState::Unknown
            }
        };

        if record.state.is_drain_or_down() {
            record.reason = self.scheduler.node_reason(name).unwrap_or_else(|e| {
                warn!(node = name, error = %e, "reason query failed");
                None
            });
        }

        if detail {
            self.probe(&mut record);
            if let InstanceIdentity::Found(instance) = &record.identity {
                record.resource_id = self.control.resource_id(instance).unwrap_or_else(|e| {
                    warn!(node = name, error = %e, "resource id lookup failed");
                    None
                });
            }
        }

        record
    }

    fn probe(&self, record: &mut NodeRecord) {
        match self.shell.exec(&record.name, PROBE_COMMAND) {
            Ok(out) => {
                record.reachable = Some(true);
                for line in out.output.lines() {
                    match line.split_once('=') {
                        Some(("serial", v)) => record.serial = non_empty(v),
                        Some(("shape", v)) => record.shape = non_empty(v),
                        _ => {}
                    }
                }
            }
            Err(e) => {
                warn!(node = %record.name, error = %e, "probe failed");
                record.reachable = Some(false);
            }
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty() && value != "null").then(|| value.to_string())
}

fn print_header(detail: bool) {
    if detail {
        println!(
            "{}",
            format!(
                "{:<20} {:<28} {:<11} {:<6} {:<14} {:<18} {}",
                "HOSTNAME", "INSTANCE", "STATE", "SSH", "SERIAL", "SHAPE", "RESOURCE"
            )
            .bold()
        );
    } else {
        println!(
            "{}",
            format!("{:<20} {:<28} {}", "HOSTNAME", "INSTANCE", "STATE").bold()
        );
    }
}

fn print_row(record: &NodeRecord, detail: bool) {
    let instance = record.identity.name().unwrap_or("-");
    let state = format!("{:<11}", record.state.to_string());
    let state = match record.state {
        SchedulerState::Idle => state.green(),
        SchedulerState::Mixed | SchedulerState::Allocated => state.yellow(),
        SchedulerState::Unknown => state.dimmed(),
        _ => state.red(),
    };

    if detail {
        let ssh = match record.reachable {
            Some(true) => format!("{:<6}", "ok").green(),
            _ => format!("{:<6}", "!!").red(),
        };
        println!(
            "{:<20} {:<28} {} {} {:<14} {:<18} {}",
            record.name,
            instance,
            state,
            ssh,
            record.serial.as_deref().unwrap_or("-"),
            record.shape.as_deref().unwrap_or("-"),
            record.resource_id.as_deref().unwrap_or("-"),
        );
    } else {
        println!("{:<20} {:<28} {}", record.name, instance, state);
    }

    if let Some(reason) = &record.reason {
        println!("   {} {}", "reason:".dimmed(), reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeControlPlane, FakeScheduler, FakeShell};

    fn set(names: &[&str]) -> NodeSet {
        names.iter().copied().collect()
    }

    #[test]
    fn empty_set_is_fatal() {
        let sched = FakeScheduler::new();
        let inv = Inventory::default();
        let shell = FakeShell::new();
        let cp = FakeControlPlane::new();
        let err = NodeStatusCollector::new(&sched, &inv, &shell, &cp)
            .quiet()
            .collect(&NodeSet::new(), false)
            .unwrap_err();
        assert!(matches!(err, FleetError::NoTargets));
    }

    #[test]
    fn one_unreachable_node_does_not_abort() {
        let sched = FakeScheduler::new()
            .node("gpu-1", SchedulerState::Idle)
            .node("gpu-2", SchedulerState::Idle)
            .node("gpu-3", SchedulerState::Idle);
        let inv = Inventory::default();
        let shell = FakeShell::new()
            .respond("gpu-1", 0, "serial=2117XLK01\nshape=BM.GPU.H100.8")
            .unreachable("gpu-2")
            .respond("gpu-3", 0, "serial=2117XLK03\nshape=BM.GPU.H100.8");
        let cp = FakeControlPlane::new();

        let collection = NodeStatusCollector::new(&sched, &inv, &shell, &cp)
            .quiet()
            .collect(&set(&["gpu-1", "gpu-2", "gpu-3"]), true)
            .unwrap();

        assert_eq!(collection.records.len(), 3);
        let unreachable: Vec<_> = collection.records.iter().filter(|r| r.is_unreachable()).collect();
        assert_eq!(unreachable.len(), 1);
        assert_eq!(unreachable[0].name, "gpu-2");
        assert!(collection.flags.has_unreachable_nodes);
        assert_eq!(collection.records[0].serial.as_deref(), Some("2117XLK01"));
        assert_eq!(collection.records[2].shape.as_deref(), Some("BM.GPU.H100.8"));
    }

    #[test]
    fn degraded_sources_stay_per_node() {
        let sched = FakeScheduler::new()
            .node("gpu-1", SchedulerState::Allocated)
            .failing_state("gpu-2");
        let inv: Inventory = [("gpu-1", "inst-a")].into_iter().collect();
        let shell = FakeShell::new();
        let cp = FakeControlPlane::new();

        let collection = NodeStatusCollector::new(&sched, &inv, &shell, &cp)
            .quiet()
            .collect(&set(&["gpu-1", "gpu-2", "gpu-9"]), false)
            .unwrap();

        let states: Vec<_> = collection.records.iter().map(|r| r.state).collect();
        assert_eq!(
            states,
            vec![SchedulerState::Allocated, SchedulerState::Unknown, SchedulerState::Unknown]
        );
        assert_eq!(collection.records[0].identity, InstanceIdentity::Found("inst-a".into()));
        assert!(collection.flags.has_allocated_nodes);
        assert!(collection.flags.has_unknown_identity);
        assert!(!collection.flags.has_unreachable_nodes);
        // summary mode never probes
        assert!(shell.calls().is_empty());
        assert!(collection.records.iter().all(|r| r.reachable.is_none()));
    }

    #[test]
    fn drained_and_down_nodes_carry_reason() {
        let sched = FakeScheduler::new()
            .node("gpu-1", SchedulerState::Down)
            .node("gpu-2", SchedulerState::Idle)
            .reason("gpu-1", "Not responding");
        let inv = Inventory::default();
        let shell = FakeShell::new();
        let cp = FakeControlPlane::new();

        let collection = NodeStatusCollector::new(&sched, &inv, &shell, &cp)
            .quiet()
            .collect(&set(&["gpu-1", "gpu-2"]), false)
            .unwrap();
        assert_eq!(collection.records[0].reason.as_deref(), Some("Not responding"));
        assert_eq!(collection.records[1].reason, None);
        assert_eq!(sched.reason_queries(), vec!["gpu-1"]);
    }

    #[test]
    fn detail_resolves_resource_ids() {
        let sched = FakeScheduler::new().node("gpu-1", SchedulerState::Idle);
        let inv: Inventory = [("gpu-1", "inst-a")].into_iter().collect();
        let shell = FakeShell::new().respond("gpu-1", 0, "serial=\nshape=null");
        let cp = FakeControlPlane::new().instance("inst-a", "ocid1.instance.oc1..a");

        let collection = NodeStatusCollector::new(&sched, &inv, &shell, &cp)
            .quiet()
            .collect(&set(&["gpu-1"]), true)
            .unwrap();
        let record = &collection.records[0];
        assert_eq!(record.resource_id.as_deref(), Some("ocid1.instance.oc1..a"));
        assert_eq!(record.serial, None);
        assert_eq!(record.shape, None);
        assert_eq!(record.reachable, Some(true));
    }

    #[test]
    fn warnings_summarise_flags() {
        let mut busy = NodeRecord::new("gpu-1");
        busy.state = SchedulerState::Mixed;
        busy.identity = InstanceIdentity::Found("inst-a".into());
        let records = vec![busy];
        let collection = Collection {
            flags: FleetHealthFlags::from_records(&records),
            records,
        };
        assert_eq!(collection.warnings(), vec!["1 node(s) were running jobs"]);
    }
}
