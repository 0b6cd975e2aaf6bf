//! Scheduler state changes over a collected node set.
//!
//! Each node is one `scontrol update` call. Nodes whose current state makes the change a
//! no-op are skipped without calling the scheduler at all.

use std::fmt;
use std::str::FromStr;

use colored::Colorize;
use tracing::{info, warn};

use super::node::{NodeName, NodeRecord, SchedulerState};
use crate::config::ReservationConfig;
use crate::error::{FleetError, FleetResult};
use crate::slurm::{NodeUpdate, ReservationRequest, Scheduler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Resume,
    Drain,
    Down,
    Reserve,
    ClearReservations,
}

impl Transition {
    /// Drain and Down annotate the node with an operator reason.
    pub fn needs_reason(self) -> bool {
        matches!(self, Self::Drain | Self::Down)
    }

    pub fn is_destructive(self) -> bool {
        matches!(self, Self::Drain | Self::Down | Self::ClearReservations)
    }

    /// Whether `state` already satisfies this transition.
    fn skips(self, state: SchedulerState) -> bool {
        match self {
            Self::Resume => !matches!(state, SchedulerState::Down | SchedulerState::Drained),
            Self::Drain => state.is_drain_or_down(),
            Self::Down => state == SchedulerState::Down,
            Self::Reserve | Self::ClearReservations => false,
        }
    }
}

impl FromStr for Transition {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "resume" => Ok(Self::Resume),
            "drain" => Ok(Self::Drain),
            "down" => Ok(Self::Down),
            "reserve" => Ok(Self::Reserve),
            "clear-reservations" | "clear" => Ok(Self::ClearReservations),
            other => Err(FleetError::InvalidArgument(format!("unknown state transition: {other}"))),
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Resume => "resume",
            Self::Drain => "drain",
            Self::Down => "down",
            Self::Reserve => "reserve",
            Self::ClearReservations => "clear-reservations",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransitionReport {
    pub applied: Vec<NodeName>,
    pub skipped: Vec<(NodeName, SchedulerState)>,
    pub failed: Vec<(String, String)>,
    /// Reservation created by `Reserve`.
    pub reservation: Option<String>,
    /// Reservations removed by `ClearReservations`.
    pub cleared: Vec<String>,
}

impl TransitionReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct SlurmStateTransitioner<'a> {
    scheduler: &'a dyn Scheduler,
    reservation: &'a ReservationConfig,
}

impl<'a> SlurmStateTransitioner<'a> {
    pub fn new(scheduler: &'a dyn Scheduler, reservation: &'a ReservationConfig) -> Self {
        Self {
            scheduler,
            reservation,
        }
    }

    pub fn apply(
        &self,
        records: &[NodeRecord],
        transition: Transition,
        reason: Option<&str>,
    ) -> FleetResult<TransitionReport> {
        let reason = reason.map(str::trim).filter(|r| !r.is_empty());
        if transition.needs_reason() && reason.is_none() {
            return Err(FleetError::InvalidArgument(format!(
                "{transition} needs a reason"
            )));
        }

        let mut report = TransitionReport::default();
        match transition {
            Transition::Resume => self.update_each(records, transition, NodeUpdate::Resume, None, &mut report),
            Transition::Drain => self.update_each(records, transition, NodeUpdate::Drain, reason, &mut report),
            Transition::Down => self.update_each(records, transition, NodeUpdate::Down, reason, &mut report),
            Transition::Reserve => self.reserve(records, &mut report)?,
            Transition::ClearReservations => self.clear(&mut report)?,
        }
        Ok(report)
    }

    fn update_each(
        &self,
        records: &[NodeRecord],
        transition: Transition,
        update: NodeUpdate,
        reason: Option<&str>,
        report: &mut TransitionReport,
    ) {
        for record in records {
            if transition.skips(record.state) {
                println!(
                    "{} {} already {}, skipped",
                    "::".blue().bold(),
                    record.name,
                    record.state
                );
                report.skipped.push((record.name.clone(), record.state));
                continue;
            }
            match self.scheduler.update_node(&record.name, update, reason) {
                Ok(()) => {
                    info!(node = %record.name, update = update.as_scontrol(), "node updated");
                    println!("{} {} {}", "ok".green().bold(), record.name, update.as_scontrol().to_ascii_lowercase());
                    report.applied.push(record.name.clone());
                }
                Err(e) => {
                    warn!(node = %record.name, error = %e, "node update failed");
                    println!("{} {}: {}", "!!".red().bold(), record.name, e);
                    report.failed.push((record.name.clone(), e.to_string()));
                }
            }
        }
    }

    fn reserve(&self, records: &[NodeRecord], report: &mut TransitionReport) -> FleetResult<()> {
        if records.is_empty() {
            return Err(FleetError::NoTargets);
        }
        let request = ReservationRequest {
            nodes: records.iter().map(|r| r.name.clone()).collect(),
            duration_minutes: self.reservation.duration_minutes,
            user: self.reservation.user.clone(),
            flags: self.reservation.flags.clone(),
        };
        let name = self.scheduler.create_reservation(&request)?;
        info!(reservation = %name, nodes = request.nodes.len(), "reservation created");
        println!("{} reservation {} created", "ok".green().bold(), name.bold());
        report.reservation = Some(name);

        // previously excluded nodes become schedulable inside the reservation
        self.update_each(records, Transition::Resume, NodeUpdate::Resume, None, report);
        Ok(())
    }

    fn clear(&self, report: &mut TransitionReport) -> FleetResult<()> {
        let reservations = self.scheduler.reservations()?;
        if reservations.is_empty() {
            println!("{} no active reservations", "::".blue().bold());
        }
        for reservation in reservations {
            match self.scheduler.delete_reservation(&reservation.name) {
                Ok(()) => {
                    info!(reservation = %reservation.name, "reservation deleted");
                    println!("{} deleted reservation {}", "ok".green().bold(), reservation.name);
                    report.cleared.push(reservation.name);
                }
                Err(e) => {
                    warn!(reservation = %reservation.name, error = %e, "reservation delete failed");
                    println!("{} {}: {}", "!!".red().bold(), reservation.name, e);
                    report.failed.push((reservation.name, e.to_string()));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeScheduler;

    fn record(name: &str, state: SchedulerState) -> NodeRecord {
        let mut r = NodeRecord::new(name);
        r.state = state;
        r
    }

    #[test]
    fn resume_on_active_nodes_makes_no_calls() {
        let sched = FakeScheduler::new();
        let cfg = ReservationConfig::default();
        let records = vec![
            record("gpu-1", SchedulerState::Idle),
            record("gpu-2", SchedulerState::Allocated),
            record("gpu-3", SchedulerState::Draining),
        ];
        let report = SlurmStateTransitioner::new(&sched, &cfg)
            .apply(&records, Transition::Resume, None)
            .unwrap();
        assert_eq!(sched.mutation_count(), 0);
        assert_eq!(report.skipped.len(), 3);
        assert!(report.applied.is_empty());
    }

    #[test]
    fn resume_applies_only_to_down_and_drained() {
        let sched = FakeScheduler::new();
        let cfg = ReservationConfig::default();
        let records = vec![
            record("gpu-1", SchedulerState::Down),
            record("gpu-2", SchedulerState::Idle),
            record("gpu-3", SchedulerState::Drained),
        ];
        let report = SlurmStateTransitioner::new(&sched, &cfg)
            .apply(&records, Transition::Resume, None)
            .unwrap();
        assert_eq!(report.applied, vec!["gpu-1", "gpu-3"]);
        assert_eq!(
            sched.updates(),
            vec![
                ("gpu-1".to_string(), NodeUpdate::Resume, None),
                ("gpu-3".to_string(), NodeUpdate::Resume, None),
            ]
        );
    }

    #[test]
    fn drain_skips_restricted_nodes_and_carries_reason() {
        let sched = FakeScheduler::new();
        let cfg = ReservationConfig::default();
        let records = vec![
            record("gpu-1", SchedulerState::Idle),
            record("gpu-2", SchedulerState::Down),
            record("gpu-3", SchedulerState::Drained),
            record("gpu-4", SchedulerState::Mixed),
        ];
        let report = SlurmStateTransitioner::new(&sched, &cfg)
            .apply(&records, Transition::Drain, Some("xid 79"))
            .unwrap();
        assert_eq!(report.applied, vec!["gpu-1", "gpu-4"]);
        assert!(sched
            .updates()
            .iter()
            .all(|(_, u, r)| *u == NodeUpdate::Drain && r.as_deref() == Some("xid 79")));
    }

    #[test]
    fn down_without_reason_is_rejected() {
        let sched = FakeScheduler::new();
        let cfg = ReservationConfig::default();
        let records = vec![record("gpu-1", SchedulerState::Idle)];
        let err = SlurmStateTransitioner::new(&sched, &cfg)
            .apply(&records, Transition::Down, Some("  "))
            .unwrap_err();
        assert!(matches!(err, FleetError::InvalidArgument(_)));
        assert_eq!(sched.mutation_count(), 0);
    }

    #[test]
    fn per_node_failure_is_accounted() {
        let sched = FakeScheduler::new().failing_update("gpu-2");
        let cfg = ReservationConfig::default();
        let records = vec![
            record("gpu-1", SchedulerState::Idle),
            record("gpu-2", SchedulerState::Idle),
        ];
        let report = SlurmStateTransitioner::new(&sched, &cfg)
            .apply(&records, Transition::Down, Some("bad ib"))
            .unwrap();
        assert_eq!(report.applied, vec!["gpu-1"]);
        assert_eq!(report.failed.len(), 1);
        assert!(!report.is_clean());
    }

    #[test]
    fn reserve_creates_then_resumes_excluded_nodes() {
        let sched = FakeScheduler::new();
        let cfg = ReservationConfig::default();
        let records = vec![
            record("gpu-1", SchedulerState::Drained),
            record("gpu-2", SchedulerState::Idle),
        ];
        let report = SlurmStateTransitioner::new(&sched, &cfg)
            .apply(&records, Transition::Reserve, None)
            .unwrap();

        let created = sched.created();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].nodes, vec!["gpu-1", "gpu-2"]);
        assert_eq!(created[0].duration_minutes, 1440);
        assert_eq!(report.reservation.as_deref(), Some("root_1"));
        assert_eq!(report.applied, vec!["gpu-1"]);
    }

    #[test]
    fn clear_removes_every_reservation() {
        let sched = FakeScheduler::new()
            .reservation("root_1", &["gpu-1"])
            .reservation("root_2", &["gpu-9"]);
        let cfg = ReservationConfig::default();
        let report = SlurmStateTransitioner::new(&sched, &cfg)
            .apply(&[], Transition::ClearReservations, None)
            .unwrap();
        assert_eq!(report.cleared, vec!["root_1", "root_2"]);
        assert_eq!(sched.deleted(), vec!["root_1", "root_2"]);
    }

    #[test]
    fn failed_delete_keeps_going() {
        let sched = FakeScheduler::new()
            .reservation("root_1", &["gpu-1"])
            .reservation("root_2", &["gpu-9"])
            .failing_delete("root_1");
        let cfg = ReservationConfig::default();
        let report = SlurmStateTransitioner::new(&sched, &cfg)
            .apply(&[], Transition::ClearReservations, None)
            .unwrap();
        assert_eq!(report.cleared, vec!["root_2"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "root_1");
        assert!(!report.is_clean());
    }

    #[test]
    fn parses_transition_names() {
        assert_eq!("Drain".parse::<Transition>().unwrap(), Transition::Drain);
        assert_eq!(
            "clear-reservations".parse::<Transition>().unwrap(),
            Transition::ClearReservations
        );
        assert!("reboot".parse::<Transition>().is_err());
    }
}
