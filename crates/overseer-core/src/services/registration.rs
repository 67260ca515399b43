//! `.services.json` registration lines

use crate::error::Result;
use crate::types::{ServiceRegistration, TrackedService};
use std::io::Write;
use std::path::Path;
use tracing::debug;

/// Parse every line independently, skipping blank and malformed ones
pub fn parse_registrations(content: &str) -> Vec<ServiceRegistration> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match serde_json::from_str::<ServiceRegistration>(line) {
            Ok(reg) => Some(reg),
            Err(e) => {
                debug!("Skipping malformed registration line: {}", e);
                None
            }
        })
        .collect()
}

/// Append one registration line, creating the file if needed
pub fn append_registration(path: &Path, reg: &ServiceRegistration) -> Result<()> {
    let mut line = serde_json::to_string(reg)?;
    line.push('\n');

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(line.as_bytes())?;
    Ok(())
}

/// Collapse a scan's entries so names and ports are both unique
///
/// Entries are applied oldest first. Each one evicts any earlier entry with
/// the same name or the same port.
pub fn dedupe(mut entries: Vec<TrackedService>) -> Vec<TrackedService> {
    entries.sort_by_key(|s| s.started_at);

    let mut kept: Vec<TrackedService> = Vec::with_capacity(entries.len());
    for service in entries {
        kept.retain(|s| s.name != service.name && s.port != service.port);
        kept.push(service);
    }
    kept
}
