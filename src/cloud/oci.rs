//! OCI control plane through the `oci` CLI, authenticated as the instance principal.

use std::process::Command;

use serde::Deserialize;
use tracing::{debug, instrument, warn};

use super::{CapacityHost, ControlPlane};
use crate::config::CloudConfig;
use crate::error::{FleetError, FleetResult};

#[derive(Debug, Clone)]
pub struct OciCli {
    program: String,
    compartment_id: Option<String>,
    capacity_topology_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Listing<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct Items<T> {
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Instance {
    id: String,
    #[serde(rename = "display-name")]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BareMetalHost {
    #[serde(rename = "lifecycle-details")]
    lifecycle_details: Option<String>,
    #[serde(rename = "instance-id")]
    instance_id: Option<String>,
}

impl OciCli {
    pub fn new(config: &CloudConfig) -> Self {
        Self {
            program: config.oci.clone(),
            compartment_id: config.compartment_id.clone(),
            capacity_topology_id: config.capacity_topology_id.clone(),
        }
    }

    fn run(&self, args: &[&str]) -> FleetResult<String> {
        debug!(program = %self.program, ?args, "control plane call");
        let output = Command::new(&self.program)
            .args(args)
            .args(["--auth", "instance_principal"])
            .output()
            .map_err(|e| FleetError::spawn(&self.program, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FleetError::tool(&self.program, stderr.trim().to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn parse<T: for<'de> Deserialize<'de>>(&self, out: &str) -> FleetResult<T> {
        serde_json::from_str(out)
            .map_err(|e| FleetError::tool(&self.program, format!("unexpected response: {e}")))
    }

    fn instance_name(&self, instance_id: &str) -> Option<String> {
        let out = self
            .run(&["compute", "instance", "get", "--instance-id", instance_id])
            .ok()?;
        self.parse::<Listing<Instance>>(&out).ok()?.data.display_name
    }
}

impl ControlPlane for OciCli {
    fn resource_id(&self, instance_name: &str) -> FleetResult<Option<String>> {
        let compartment = self.compartment_id.as_deref().ok_or_else(|| {
            FleetError::FatalPrecondition("cloud.compartment_id is not configured".to_string())
        })?;
        let out = self.run(&[
            "compute",
            "instance",
            "list",
            "--compartment-id",
            compartment,
            "--display-name",
            instance_name,
            "--lifecycle-state",
            "RUNNING",
        ])?;
        // the CLI prints nothing at all for an empty result
        if out.trim().is_empty() {
            return Ok(None);
        }
        let listing: Listing<Vec<Instance>> = self.parse(&out)?;
        Ok(listing.data.into_iter().next().map(|i| i.id))
    }

    #[instrument(skip(self))]
    fn hard_reset(&self, resource_id: &str) -> FleetResult<()> {
        self.run(&[
            "compute",
            "instance",
            "action",
            "--instance-id",
            resource_id,
            "--action",
            "RESET",
        ])?;
        Ok(())
    }

    fn capacity_hosts(&self) -> FleetResult<Vec<CapacityHost>> {
        let topology = self.capacity_topology_id.as_deref().ok_or_else(|| {
            FleetError::FatalPrecondition("cloud.capacity_topology_id is not configured".to_string())
        })?;
        let out = self.run(&[
            "compute",
            "compute-capacity-topology",
            "compute-bare-metal-host",
            "list",
            "--compute-capacity-topology-id",
            topology,
            "--all",
        ])?;
        if out.trim().is_empty() {
            return Ok(Vec::new());
        }
        let listing: Listing<Items<BareMetalHost>> = self.parse(&out)?;

        Ok(listing
            .data
            .items
            .into_iter()
            .map(|h| {
                let lifecycle_details = h.lifecycle_details.unwrap_or_else(|| "UNKNOWN".to_string());
                let instance_name = match (&h.instance_id, lifecycle_details.as_str()) {
                    (Some(id), "DEGRADED") => self.instance_name(id).or_else(|| {
                        warn!(instance_id = %id, "could not resolve instance name");
                        None
                    }),
                    _ => None,
                };
                CapacityHost {
                    lifecycle_details,
                    instance_id: h.instance_id,
                    instance_name,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_instance_listing() {
        let oci = OciCli::new(&CloudConfig::default());
        let out = r#"{"data":[{"id":"ocid1.instance.oc1..aaa","display-name":"inst-a","shape":"BM.GPU.H100.8"}]}"#;
        let listing: Listing<Vec<Instance>> = oci.parse(out).expect("parse");
        assert_eq!(listing.data[0].id, "ocid1.instance.oc1..aaa");
        assert_eq!(listing.data[0].display_name.as_deref(), Some("inst-a"));
    }

    #[test]
    fn parses_capacity_listing() {
        let oci = OciCli::new(&CloudConfig::default());
        let out = r#"{"data":{"items":[
            {"lifecycle-details":"AVAILABLE","instance-id":"ocid1.instance.oc1..a"},
            {"lifecycle-details":"DEGRADED","instance-id":null}
        ]}}"#;
        let listing: Listing<Items<BareMetalHost>> = oci.parse(out).expect("parse");
        assert_eq!(listing.data.items.len(), 2);
        assert!(listing.data.items[1].instance_id.is_none());
    }

    #[test]
    fn resource_lookup_needs_compartment() {
        let oci = OciCli::new(&CloudConfig::default());
        assert!(matches!(
            oci.resource_id("inst-a"),
            Err(FleetError::FatalPrecondition(_))
        ));
    }
}
