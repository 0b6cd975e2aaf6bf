//! Cloud control plane seam.

pub mod inventory;
pub mod oci;

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::FleetResult;

pub use inventory::Inventory;
pub use oci::OciCli;

/// One bare-metal host in a capacity topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapacityHost {
    pub lifecycle_details: String,
    pub instance_id: Option<String>,
    pub instance_name: Option<String>,
}

impl CapacityHost {
    /// Fold lifecycle details and instance presence into the reporting category.
    pub fn category(&self) -> String {
        let running = self.instance_id.is_some();
        match (self.lifecycle_details.as_str(), running) {
            ("AVAILABLE", true) => "RUNNING".to_string(),
            ("DEGRADED", true) => "RUNNING_DEGRADED".to_string(),
            ("DEGRADED", false) => "UNAVAILABLE_DEGRADED".to_string(),
            (other, _) => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CapacitySummary {
    pub total: usize,
    pub counts: BTreeMap<String, usize>,
    /// Running instances on degraded hosts, by display name when known.
    pub degraded_instances: Vec<String>,
}

impl CapacitySummary {
    pub fn from_hosts(hosts: &[CapacityHost]) -> Self {
        let mut summary = Self {
            total: hosts.len(),
            ..Self::default()
        };
        for host in hosts {
            let category = host.category();
            if category == "RUNNING_DEGRADED" {
                let label = host
                    .instance_name
                    .clone()
                    .or_else(|| host.instance_id.clone())
                    .unwrap_or_default();
                summary.degraded_instances.push(label);
            }
            *summary.counts.entry(category).or_default() += 1;
        }
        summary
    }
}

pub trait ControlPlane {
    /// Cloud resource identifier for an instance display name, `None` if there is no such instance.
    fn resource_id(&self, instance_name: &str) -> FleetResult<Option<String>>;

    fn hard_reset(&self, resource_id: &str) -> FleetResult<()>;

    fn capacity_hosts(&self) -> FleetResult<Vec<CapacityHost>>;
}
