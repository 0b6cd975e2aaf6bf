//! Static hostname → cloud instance mapping.
//!
//! One entry per line, `hostname instance-name`, extra columns ignored:
//!
//! ```text
//! # generated by the cluster stack
//! gpu-1  inst-9xk2a-compute-1
//! gpu-2  inst-0pl1q-compute-2
//! ```

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct Inventory {
    instances: HashMap<String, String>,
}

impl Inventory {
    /// A missing file yields an empty inventory: every node resolves to "not found".
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "inventory file not found, instance identities unavailable");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let inventory = Self::parse(&content);
        if inventory.is_empty() {
            warn!(path = %path.display(), "inventory file has no entries");
        } else {
            debug!(path = %path.display(), entries = inventory.len(), "inventory loaded");
        }
        Ok(inventory)
    }

    pub fn parse(content: &str) -> Self {
        let instances = content
            .lines()
            .map(|l| l.split('#').next().unwrap_or_default().trim())
            .filter(|l| !l.is_empty())
            .filter_map(|l| {
                let mut cols = l.split_whitespace();
                let host = cols.next()?;
                let instance = cols.next()?;
                Some((host.to_string(), instance.to_string()))
            })
            .collect();
        Self { instances }
    }

    pub fn instance(&self, hostname: &str) -> Option<&str> {
        self.instances.get(hostname).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

impl<H: Into<String>, I: Into<String>> FromIterator<(H, I)> for Inventory {
    fn from_iter<T: IntoIterator<Item = (H, I)>>(iter: T) -> Self {
        Self {
            instances: iter.into_iter().map(|(h, i)| (h.into(), i.into())).collect(),
        }
    }
}
