use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ssh: SshConfig,
    pub fanout: FanOutConfig,
    pub inventory: InventoryConfig,
    pub healthcheck: HealthcheckConfig,
    pub benchmark: BenchmarkConfig,
    pub reservation: ReservationConfig,
    pub tools: ToolsConfig,
    pub cloud: CloudConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub connect_timeout_secs: u64,
    pub user: Option<String>,
    pub options: Vec<String>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 5,
            user: None,
            options: vec![
                "BatchMode=yes".to_string(),
                "StrictHostKeyChecking=no".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FanOutConfig {
    pub program: String,
    pub connect_timeout_secs: u64,
    pub command_timeout_secs: u64,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            program: "pdsh".to_string(),
            connect_timeout_secs: 10,
            command_timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryConfig {
    pub path: PathBuf,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/etc/opt/oci-hpc/hostfile.instances"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthcheckConfig {
    pub fresh_command: String,
    pub latest_path: String,
    /// Fresh checks on more nodes than this ask whether to fan out.
    pub sequential_threshold: usize,
}

impl Default for HealthcheckConfig {
    fn default() -> Self {
        Self {
            fresh_command: "sudo python3 /opt/oci-hpc/healthchecks/check_gpu_setup.py".to_string(),
            latest_path: "/tmp/latest_healthcheck.log".to_string(),
            sequential_threshold: 8,
        }
    }
}

/// A GPU model the benchmark knows how to drive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeProfile {
    pub model: String,
    pub shapes: Vec<String>,
    pub script: String,
    /// Minimum acceptable bus bandwidth in GB/s.
    pub threshold_gbps: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    pub profiles: Vec<ShapeProfile>,
    pub poll_interval_secs: u64,
    pub max_polls: u32,
    pub output_dir: PathBuf,
    pub tail_lines: usize,
    pub repetitions: u32,
    pub partition: Option<String>,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            profiles: vec![
                ShapeProfile {
                    model: "A100".to_string(),
                    shapes: vec!["BM.GPU.B4.8".to_string(), "BM.GPU.A100-v2.8".to_string()],
                    script: "/opt/oci-hpc/samples/gpu/nccl_run_allreduce.sh".to_string(),
                    threshold_gbps: 185.0,
                },
                ShapeProfile {
                    model: "H100".to_string(),
                    shapes: vec!["BM.GPU.H100.8".to_string()],
                    script: "/opt/oci-hpc/samples/gpu/nccl_run_allreduce_H100_200.sh".to_string(),
                    threshold_gbps: 365.0,
                },
                ShapeProfile {
                    model: "H200".to_string(),
                    shapes: vec!["BM.GPU.H200.8".to_string()],
                    script: "/opt/oci-hpc/samples/gpu/nccl_run_allreduce_H100_200.sh".to_string(),
                    threshold_gbps: 365.0,
                },
            ],
            poll_interval_secs: 10,
            max_polls: 90,
            output_dir: std::env::temp_dir().join("gpufleet"),
            tail_lines: 20,
            repetitions: 1,
            partition: None,
        }
    }
}

impl BenchmarkConfig {
    pub fn profile_for(&self, shape: &str) -> Option<&ShapeProfile> {
        self.profiles
            .iter()
            .find(|p| p.shapes.iter().any(|s| s == shape))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReservationConfig {
    pub duration_minutes: u64,
    pub user: String,
    pub flags: String,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            duration_minutes: 1440,
            user: "root".to_string(),
            flags: "maint,ignore_jobs".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub tag_utility: String,
    pub pairwise_driver: String,
    pub validate_playbook: String,
    pub ansible_playbook: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            tag_utility: "/opt/oci-hpc/bin/tagunhealthy.py".to_string(),
            pairwise_driver: "/opt/oci-hpc/bin/ncclscout.py".to_string(),
            validate_playbook: "/opt/oci-hpc/playbooks/validate.yml".to_string(),
            ansible_playbook: "ansible-playbook".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    pub oci: String,
    pub compartment_id: Option<String>,
    pub capacity_topology_id: Option<String>,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            oci: "oci".to_string(),
            compartment_id: None,
            capacity_topology_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub action_log: PathBuf,
}

impl Default for LogConfig {
    fn default() -> Self {
        let base = dirs::state_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(std::env::temp_dir);
        Self {
            level: "warn".to_string(),
            action_log: base.join("gpufleet").join("actions.log"),
        }
    }
}

impl Config {
    pub fn path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("could not determine config directory")?;
        Ok(config_dir.join("gpufleet").join("config.yaml"))
    }
}

/// Layer defaults, the YAML file (if present) and `GPUFLEET_*` environment variables.
pub fn load(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => Config::path()?,
    };
    figment(&path)
        .extract()
        .with_context(|| format!("loading configuration from {}", path.display()))
}

fn figment(path: &Path) -> Figment {
    Figment::from(Serialized::defaults(Config::default()))
        .merge(Yaml::file(path))
        .merge(Env::prefixed("GPUFLEET_").split("__"))
}
