//! `gpufleet config`: print the effective configuration after all layers are applied.

use anyhow::{Context as _, Result};
use colored::Colorize;

use super::Globals;
use crate::config::Config;

pub fn run(globals: &Globals) -> Result<bool> {
    let path = match &globals.config {
        Some(p) => p.clone(),
        None => Config::path()?,
    };
    let config = crate::config::load(Some(&path))?;

    let marker = if path.exists() { "" } else { " (not found, defaults only)" };
    println!("{} {}{}", "::".blue().bold(), path.display(), marker);
    print!("{}", serde_yaml::to_string(&config).context("serializing configuration")?);
    Ok(true)
}
