//! Presence and version checks for the external tools the pipeline shells
//! out to.

use anyhow::{anyhow, Result};
use log::info;
use tokio::process::Command;

use crate::config::defs::{RSCRIPT_TAG, TOOL_VERSIONS};

/// Runs every required tool's presence check and enforces the minimum
/// version recorded in `TOOL_VERSIONS`. All tools are checked before any
/// task is built.
pub async fn check_tool_versions() -> Result<()> {
    for (tool, minimum) in TOOL_VERSIONS.iter() {
        let version = match *tool {
            RSCRIPT_TAG => rscript_presence_check().await?,
            other => return Err(anyhow!("No presence check registered for {}", other)),
        };
        if !meets_minimum(&version, *minimum) {
            return Err(anyhow!(
                "{} {} found, {} or newer is required",
                tool,
                version,
                minimum
            ));
        }
        info!("Found {} {}", tool, version);
    }
    Ok(())
}

/// Compares on the major.minor prefix; patch releases never gate.
fn meets_minimum(version: &str, minimum: f32) -> bool {
    let mut parts = version.split('.');
    let major = match parts.next().and_then(|p| p.parse::<u32>().ok()) {
        Some(m) => m,
        None => return false,
    };
    let minor = parts.next().and_then(|p| p.parse::<u32>().ok()).unwrap_or(0);
    match format!("{}.{}", major, minor).parse::<f32>() {
        Ok(v) => v >= minimum,
        Err(_) => false,
    }
}

pub async fn rscript_presence_check() -> Result<String> {
    let output = Command::new(RSCRIPT_TAG)
        .arg("--version")
        .output()
        .await
        .map_err(|e| anyhow!("Failed to spawn {}: {}. Is R installed?", RSCRIPT_TAG, e))?;

    // older R releases print the version banner on stderr
    let text = if output.stdout.is_empty() {
        String::from_utf8_lossy(&output.stderr).into_owned()
    } else {
        String::from_utf8_lossy(&output.stdout).into_owned()
    };
    let first_line = text
        .lines()
        .next()
        .ok_or_else(|| anyhow!("No output from {} --version", RSCRIPT_TAG))?;
    let version = first_line
        .split_whitespace()
        .find(|w| w.chars().next().is_some_and(|c| c.is_ascii_digit()))
        .ok_or_else(|| anyhow!("Invalid {} --version output: {}", RSCRIPT_TAG, first_line))?
        .to_string();
    Ok(version)
}
