mod cloud;
mod commands;
mod config;
mod domain;
mod error;
mod remote;
mod slurm;
mod telemetry;
#[cfg(test)]
mod testing;
mod tools;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::Colorize;

use commands::{Context, Globals, Targets};
use telemetry::LogFormat;

#[derive(Parser)]
#[command(name = "gpufleet", version, about = "Operator console for a Slurm-scheduled GPU cluster")]
struct Cli {
    /// Skip confirmations and interactive prompts
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to config file (default: ~/.config/gpufleet/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (overrides config; RUST_LOG wins over both)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Diagnostic log format: text or json
    #[arg(long, global = true, default_value = "text")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the GPU healthcheck on each node, or fetch the last result
    Healthcheck {
        #[command(flatten)]
        targets: Targets,

        /// Read the latest stored healthcheck instead of running a new one
        #[arg(long)]
        latest: bool,

        /// Run on every node at once
        #[arg(long, conflicts_with = "sequential")]
        parallel: bool,

        /// Run one node at a time
        #[arg(long)]
        sequential: bool,
    },

    /// Hard reset nodes through the cloud control plane
    Reboot {
        #[command(flatten)]
        targets: Targets,
    },

    /// Tag nodes unhealthy for the cloud provider
    Tag {
        #[command(flatten)]
        targets: Targets,

        /// Check that the tag namespace exists
        #[arg(long, conflicts_with = "setup")]
        check: bool,

        /// Create the tag namespace (one-time)
        #[arg(long)]
        setup: bool,
    },

    /// Submit NCCL all-reduce benchmark jobs over the node set
    Benchmark {
        #[command(flatten)]
        targets: Targets,

        /// Number of jobs to submit, one after another (default from config)
        #[arg(long)]
        repetitions: Option<u32>,
    },

    /// Run the pairwise bandwidth benchmark driver
    PairBenchmark {
        #[command(flatten)]
        targets: Targets,
    },

    /// Run a command on every node; interactive loop without --command
    Exec {
        #[command(flatten)]
        targets: Targets,

        #[arg(long)]
        command: Option<String>,
    },

    /// Change scheduler state of nodes
    State {
        #[arg(value_parser = ["resume", "drain", "down", "reserve", "clear-reservations"])]
        transition: String,

        #[command(flatten)]
        targets: Targets,

        /// Reason shown by the scheduler (drain and down)
        #[arg(long)]
        reason: Option<String>,
    },

    /// Check nodes are ready for configuration with the validation playbook
    Validate {
        #[command(flatten)]
        targets: Targets,
    },

    /// Show hostname, instance, state, serial, shape and resource id
    Identify {
        #[command(flatten)]
        targets: Targets,
    },

    /// Summarise the capacity topology
    Capacity,

    /// Print the effective configuration
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            eprintln!("{} {:#}", "!!".red().bold(), e);
            eprintln!("Exiting...");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<bool> {
    let globals = Globals {
        quiet: cli.quiet,
        config: cli.config,
    };

    if let Commands::Config = cli.command {
        return commands::config::run(&globals);
    }

    let config = config::load(globals.config.as_deref())?;
    let level = cli.log_level.unwrap_or_else(|| config.log.level.clone());
    telemetry::init(&level, cli.log_format.parse::<LogFormat>()?);
    let ctx = Context::from_config(config, globals.quiet)?;

    match cli.command {
        Commands::Healthcheck {
            targets,
            latest,
            parallel,
            sequential,
        } => commands::healthcheck::run(&ctx, &targets, latest, parallel, sequential),
        Commands::Reboot { targets } => commands::reboot::run(&ctx, &targets),
        Commands::Tag {
            targets,
            check,
            setup,
        } => commands::tag::run(&ctx, &targets, check, setup),
        Commands::Benchmark {
            targets,
            repetitions,
        } => commands::benchmark::run(&ctx, &targets, repetitions),
        Commands::PairBenchmark { targets } => commands::pair_benchmark::run(&ctx, &targets),
        Commands::Exec { targets, command } => commands::exec::run(&ctx, &targets, command),
        Commands::State {
            transition,
            targets,
            reason,
        } => commands::state::run(&ctx, &targets, &transition, reason),
        Commands::Validate { targets } => commands::validate::run(&ctx, &targets),
        Commands::Identify { targets } => commands::identify::run(&ctx, &targets),
        Commands::Capacity => commands::capacity::run(&ctx),
        Commands::Config => commands::config::run(&globals),
    }
}
