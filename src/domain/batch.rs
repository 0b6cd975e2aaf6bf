//! Benchmark batch jobs: shape-based script selection, submission and bounded polling.

use std::collections::BTreeSet;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use colored::Colorize;
use tracing::{debug, info, warn};

use super::node::{NodeRecord, NodeSet};
use super::types::{BatchJob, JobTerminalState};
use crate::config::{BenchmarkConfig, ShapeProfile};
use crate::error::{FleetError, FleetResult};
use crate::slurm::{BatchSubmission, JobState, JobStream, Scheduler};

pub struct BatchJobOrchestrator<'a> {
    scheduler: &'a dyn Scheduler,
    config: &'a BenchmarkConfig,
}

impl<'a> BatchJobOrchestrator<'a> {
    pub fn new(scheduler: &'a dyn Scheduler, config: &'a BenchmarkConfig) -> Self {
        Self { scheduler, config }
    }

    /// Submit `repetitions` jobs over the whole set, one after another, each polled to an end.
    ///
    /// All preconditions are checked before the first submission.
    pub fn run(&self, records: &[NodeRecord], repetitions: u32) -> FleetResult<Vec<BatchJob>> {
        if records.is_empty() {
            return Err(FleetError::NoTargets);
        }
        let profile = self.select_profile(records)?;
        let nodes: NodeSet = records.iter().map(|r| r.name.clone()).collect();
        let reservation = self.overlapping_reservation(&nodes)?;

        println!(
            "{} {} benchmark on {} node(s), {} run(s){}",
            ">>".cyan().bold(),
            profile.model,
            nodes.len(),
            repetitions,
            reservation
                .as_deref()
                .map(|r| format!(" in reservation {r}"))
                .unwrap_or_default()
        );

        let mut jobs = Vec::with_capacity(repetitions as usize);
        for run in 1..=repetitions {
            let submission = BatchSubmission {
                job_name: format!("nccl-{}-{run}", profile.model.to_ascii_lowercase()),
                script: profile.script.clone(),
                nodes: nodes.to_vec(),
                reservation: reservation.clone(),
                partition: self.config.partition.clone(),
                output_dir: self.config.output_dir.clone(),
            };
            let job_id = self.scheduler.submit_batch(&submission)?;
            let submitted_at = Utc::now();
            info!(job_id = %job_id, run, "benchmark submitted");
            println!("{} submitted job {}", "::".blue().bold(), job_id.bold());

            let job = self.wait(job_id, submitted_at);
            report(&job, profile);
            jobs.push(job);
        }
        Ok(jobs)
    }

    /// The one script variant every node in the set can run.
    pub fn select_profile(&self, records: &[NodeRecord]) -> FleetResult<&'a ShapeProfile> {
        let unreachable: Vec<String> = records
            .iter()
            .filter(|r| r.reachable != Some(true))
            .map(|r| r.name.clone())
            .collect();
        if !unreachable.is_empty() {
            return Err(FleetError::Unreachable(unreachable));
        }

        let unknown: Vec<&str> = records
            .iter()
            .filter(|r| r.shape.is_none())
            .map(|r| r.name.as_str())
            .collect();
        if !unknown.is_empty() {
            return Err(FleetError::FatalPrecondition(format!(
                "could not determine the shape of {}",
                unknown.join(", ")
            )));
        }

        let shapes: BTreeSet<&str> = records.iter().filter_map(|r| r.shape.as_deref()).collect();
        let mut shapes = shapes.into_iter();
        let (Some(shape), None) = (shapes.next(), shapes.next()) else {
            let all: BTreeSet<String> = records.iter().filter_map(|r| r.shape.clone()).collect();
            return Err(FleetError::HeterogeneousShape(all.into_iter().collect()));
        };

        self.config.profile_for(shape).ok_or_else(|| {
            FleetError::FatalPrecondition(format!("no benchmark defined for shape {shape}"))
        })
    }

    /// At most one active reservation may cover the set; its name goes to `sbatch`.
    pub fn overlapping_reservation(&self, nodes: &NodeSet) -> FleetResult<Option<String>> {
        let overlapping: Vec<String> = self
            .scheduler
            .reservations()?
            .into_iter()
            .filter(|r| r.state.eq_ignore_ascii_case("ACTIVE"))
            .filter(|r| r.nodes.iter().any(|n| nodes.contains(n)))
            .map(|r| r.name)
            .collect();

        match overlapping.as_slice() {
            [] => Ok(None),
            [one] => Ok(Some(one.clone())),
            many => Err(FleetError::FatalPrecondition(format!(
                "{} reservations overlap the node set ({}); cannot pick one",
                many.len(),
                many.join(", ")
            ))),
        }
    }

    fn wait(&self, job_id: String, submitted_at: chrono::DateTime<Utc>) -> BatchJob {
        let interval = Duration::from_secs(self.config.poll_interval_secs);
        let started = Instant::now();
        let mut terminal = JobTerminalState::TimedOut;
        let mut output = None;

        for poll in 1..=self.config.max_polls {
            let state = match self.scheduler.job_state(&job_id) {
                Ok(state) => state,
                Err(e) => {
                    warn!(job_id = %job_id, error = %e, "job state query failed");
                    JobState::Unknown(e.to_string())
                }
            };
            debug!(job_id = %job_id, poll, ?state, "polled");

            if state.is_success() {
                terminal = JobTerminalState::Completed;
                output = self.tail(&job_id, JobStream::Stdout);
                break;
            }
            if state.is_failure() {
                terminal = JobTerminalState::Failed;
                output = self.tail(&job_id, JobStream::Stderr);
                break;
            }
            if state == JobState::Gone {
                terminal = JobTerminalState::Unknown;
                break;
            }
            if poll < self.config.max_polls {
                thread::sleep(interval);
            }
        }

        if terminal == JobTerminalState::TimedOut {
            warn!(
                job_id = %job_id,
                polls = self.config.max_polls,
                "job did not finish within the wait budget; moving on"
            );
        }

        let bus_bandwidth = match terminal {
            JobTerminalState::Completed => output.as_deref().and_then(bus_bandwidth),
            _ => None,
        };

        BatchJob {
            job_id,
            submitted_at,
            terminal_state: terminal,
            waited_seconds: started.elapsed().as_secs(),
            output,
            bus_bandwidth,
        }
    }

    fn tail(&self, job_id: &str, stream: JobStream) -> Option<String> {
        match self.scheduler.job_output(job_id, stream, self.config.tail_lines) {
            Ok(text) if !text.trim().is_empty() => Some(text),
            Ok(_) => None,
            Err(e) => {
                warn!(job_id, %stream, error = %e, "could not read job output");
                None
            }
        }
    }
}

/// Average bus bandwidth from nccl-tests output. Prefers the summary line, falls back to the
/// `busbw` column of the last data row.
pub fn bus_bandwidth(output: &str) -> Option<f64> {
    let summary = output.lines().find_map(|line| {
        let (_, value) = line.split_once("Avg bus bandwidth")?;
        value.trim_start_matches([' ', ':']).split_whitespace().next()?.parse().ok()
    });
    summary.or_else(|| {
        output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .filter_map(|l| {
                let cols: Vec<&str> = l.split_whitespace().collect();
                if cols.len() < 2 {
                    return None;
                }
                cols[cols.len() - 2].parse::<f64>().ok()
            })
            .last()
    })
}

fn report(job: &BatchJob, profile: &ShapeProfile) {
    let state = job.terminal_state.to_string();
    let marker = match job.terminal_state {
        JobTerminalState::Completed => "ok".green().bold(),
        _ => "!!".red().bold(),
    };
    println!(
        "{} job {} {} after {}s",
        marker,
        job.job_id.bold(),
        state,
        job.waited_seconds
    );
    if let Some(output) = &job.output {
        for line in output.lines() {
            println!("   {line}");
        }
    }
    if let Some(bw) = job.bus_bandwidth {
        let figure = format!("{bw:.2} GB/s");
        let figure = if bw >= profile.threshold_gbps {
            figure.green()
        } else {
            figure.red()
        };
        println!(
            "{} average bus bandwidth {} (threshold {:.0} GB/s)",
            "::".blue().bold(),
            figure,
            profile.threshold_gbps
        );
    }
}
