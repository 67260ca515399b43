//! Service registration and tracking types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One line of a `.services.json` registration file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRegistration {
    pub port: u16,
    pub name: String,
    pub command: String,
    pub cwd: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
}

/// A service discovered in an agent's workspace
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackedService {
    pub agent_id: String,
    pub port: u16,
    pub name: String,
    pub log_file: Option<String>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub alive: bool,
    pub command: Option<String>,
    pub cwd: Option<String>,
    /// Registration file the entry was read from
    #[serde(skip)]
    pub source_file: Option<PathBuf>,
}

impl TrackedService {
    pub fn from_registration(
        agent_id: impl Into<String>,
        reg: ServiceRegistration,
        source_file: Option<PathBuf>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            port: reg.port,
            name: reg.name,
            log_file: reg.log_file,
            started_at: reg.started_at,
            alive: false,
            command: Some(reg.command).filter(|c| !c.trim().is_empty()),
            cwd: Some(reg.cwd).filter(|c| !c.trim().is_empty()),
            source_file,
        }
    }

    /// Registration line describing this service as it runs now
    pub fn to_registration(&self) -> Option<ServiceRegistration> {
        Some(ServiceRegistration {
            port: self.port,
            name: self.name.clone(),
            command: self.command.clone()?,
            cwd: self.cwd.clone()?,
            started_at: self.started_at,
            log_file: self.log_file.clone(),
        })
    }
}
