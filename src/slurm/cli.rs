//! Slurm CLI integration: sinfo, scontrol, sbatch, squeue and sacct.

use std::process::Command;

use tracing::{debug, instrument};

use super::parse;
use super::{BatchSubmission, JobState, JobStream, NodeUpdate, Reservation, ReservationRequest, Scheduler};
use crate::domain::node::{NodeName, SchedulerState};
use crate::error::{FleetError, FleetResult};

#[derive(Debug, Clone, Default)]
pub struct SlurmCli;

impl SlurmCli {
    pub fn new() -> Self {
        Self
    }

    fn run(&self, program: &str, args: &[&str]) -> FleetResult<String> {
        debug!(program, ?args, "running scheduler command");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| FleetError::spawn(program, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FleetError::SchedulerQueryFailed(format!(
                "{} {}: {}",
                program,
                args.join(" "),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn output_path(&self, job_id: &str, stream: JobStream) -> FleetResult<String> {
        let out = self.run("scontrol", &["show", "job", job_id, "--oneliner"])?;
        let key = match stream {
            JobStream::Stdout => "StdOut",
            JobStream::Stderr => "StdErr",
        };
        let pairs = parse::parse_oneliner(out.lines().next().unwrap_or_default());
        pairs
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
            .ok_or_else(|| FleetError::SchedulerQueryFailed(format!("job {job_id} has no {key} path")))
    }
}

impl Scheduler for SlurmCli {
    #[instrument(skip(self))]
    fn list_nodes(&self, partition: Option<&str>) -> FleetResult<Vec<(NodeName, SchedulerState)>> {
        let mut args = vec!["-N", "-h", "-o", "%N %T"];
        if let Some(p) = partition {
            args.extend(["-p", p]);
        }
        let out = self.run("sinfo", &args)?;
        Ok(parse::parse_node_states(&out))
    }

    fn node_state(&self, node: &str) -> FleetResult<Option<SchedulerState>> {
        let out = self.run("sinfo", &["-N", "-h", "-n", node, "-o", "%N %T"])?;
        Ok(parse::parse_node_states(&out)
            .into_iter()
            .find(|(name, _)| name == node)
            .map(|(_, state)| state))
    }

    fn node_reason(&self, node: &str) -> FleetResult<Option<String>> {
        let out = self.run("scontrol", &["show", "node", node, "--oneliner"])?;
        Ok(parse::parse_node_reason(&out))
    }

    fn expand_hostlist(&self, expr: &str) -> FleetResult<Vec<NodeName>> {
        let out = self.run("scontrol", &["show", "hostnames", expr])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    #[instrument(skip(self))]
    fn update_node(&self, node: &str, update: NodeUpdate, reason: Option<&str>) -> FleetResult<()> {
        let nodename = format!("nodename={node}");
        let state = format!("state={}", update.as_scontrol());
        let mut args = vec!["update", nodename.as_str(), state.as_str()];
        let reason_arg = reason.map(|r| format!("reason={r}"));
        args.extend(reason_arg.as_deref());
        self.run("scontrol", &args)?;
        Ok(())
    }

    fn reservations(&self) -> FleetResult<Vec<Reservation>> {
        let out = self.run("scontrol", &["show", "reservation", "--oneliner"])?;
        parse::parse_reservations(&out)
            .into_iter()
            .map(|(name, nodes, state)| {
                let nodes = if nodes.is_empty() || nodes == "(null)" {
                    Vec::new()
                } else {
                    self.expand_hostlist(&nodes)?
                };
                Ok(Reservation { name, nodes, state })
            })
            .collect()
    }

    #[instrument(skip(self, request), fields(nodes = request.nodes.len()))]
    fn create_reservation(&self, request: &ReservationRequest) -> FleetResult<String> {
        let nodes = format!("nodes={}", request.nodes.join(","));
        let duration = format!("duration={}", request.duration_minutes);
        let user = format!("user={}", request.user);
        let flags = format!("flags={}", request.flags);
        let out = self.run(
            "scontrol",
            &[
                "create",
                "reservation",
                "starttime=now",
                duration.as_str(),
                user.as_str(),
                flags.as_str(),
                nodes.as_str(),
            ],
        )?;
        parse::parse_reservation_created(&out).ok_or_else(|| {
            FleetError::SchedulerQueryFailed(format!("unexpected scontrol output: {}", out.trim()))
        })
    }

    fn delete_reservation(&self, name: &str) -> FleetResult<()> {
        let target = format!("reservationname={name}");
        self.run("scontrol", &["delete", target.as_str()])?;
        Ok(())
    }

    #[instrument(skip(self, submission), fields(script = %submission.script))]
    fn submit_batch(&self, submission: &BatchSubmission) -> FleetResult<String> {
        let dir = submission.output_dir.display();
        let job_name = format!("--job-name={}", submission.job_name);
        let nodes = format!("--nodelist={}", submission.nodes.join(","));
        let count = format!("--nodes={}", submission.nodes.len());
        let output = format!("--output={dir}/%x-%j.out");
        let error = format!("--error={dir}/%x-%j.err");
        let reservation = submission.reservation.as_ref().map(|r| format!("--reservation={r}"));
        let partition = submission.partition.as_ref().map(|p| format!("--partition={p}"));

        let mut args: Vec<&str> = vec![
            "--parsable",
            job_name.as_str(),
            nodes.as_str(),
            count.as_str(),
            output.as_str(),
            error.as_str(),
        ];
        args.extend(reservation.as_deref());
        args.extend(partition.as_deref());
        args.push(submission.script.as_str());

        let out = self.run("sbatch", &args)?;
        parse::parse_job_id(&out).ok_or_else(|| {
            FleetError::SchedulerQueryFailed(format!("unexpected sbatch output: {}", out.trim()))
        })
    }

    fn job_state(&self, job_id: &str) -> FleetResult<JobState> {
        // squeue forgets finished jobs after MinJobAge; sacct covers the rest when accounting is on
        let queued = self.run("squeue", &["-h", "-j", job_id, "-o", "%T"]);
        if let Ok(out) = &queued {
            if let Some(state) = out.lines().map(str::trim).find(|l| !l.is_empty()) {
                return Ok(JobState::from(state));
            }
        }

        match self.run("sacct", &["-n", "-X", "-P", "-j", job_id, "-o", "State"]) {
            Ok(out) => Ok(out
                .lines()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .map(JobState::from)
                .unwrap_or(JobState::Gone)),
            Err(e) => match queued {
                // squeue answered with nothing and sacct is unavailable
                Ok(_) => {
                    debug!(job_id, error = %e, "sacct unavailable");
                    Ok(JobState::Gone)
                }
                Err(queued_err) => Err(queued_err),
            },
        }
    }

    fn job_output(&self, job_id: &str, stream: JobStream, lines: usize) -> FleetResult<String> {
        let path = self.output_path(job_id, stream)?;
        let text = std::fs::read_to_string(&path)
            .map_err(|e| FleetError::tool("job output", format!("reading {path}: {e}")))?;
        Ok(parse::tail(&text, lines))
    }
}
