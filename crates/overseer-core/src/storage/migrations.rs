//! Schema migrations
//!
//! The schema version lives in SQLite's `user_version` pragma. Each step in
//! [`STEPS`] moves the schema forward by one version inside its own
//! transaction, so a failed step leaves the previous version intact.

use crate::error::{Error, Result, StorageError};
use rusqlite::Connection;
use tracing::{debug, info};

const STEPS: &[(&str, &str)] = &[
    ("agent profiles", AGENT_PROFILES),
    ("conversation entries", CONVERSATION_ENTRIES),
];

/// Bring the schema up to the latest version
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current = schema_version(conn)?;
    if current > STEPS.len() {
        return Err(Error::Storage(StorageError::MigrationFailed(format!(
            "database schema v{} is newer than supported v{}",
            current,
            STEPS.len()
        ))));
    }

    for (index, (label, sql)) in STEPS.iter().enumerate().skip(current) {
        let version = index + 1;
        debug!("Migrating schema to v{} ({})", version, label);
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(sql).map_err(|e| {
            Error::Storage(StorageError::MigrationFailed(format!("v{} {}: {}", version, label, e)))
        })?;
        tx.pragma_update(None, "user_version", version as i64)?;
        tx.commit()?;
    }

    if current < STEPS.len() {
        info!("Schema migrated from v{} to v{}", current, STEPS.len());
    }
    Ok(())
}

pub(crate) fn schema_version(conn: &Connection) -> Result<usize> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version.max(0) as usize)
}

// Full profile record is kept as JSON; indexed columns are copies
const AGENT_PROFILES: &str = r#"
CREATE TABLE agent_profiles (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    runtime TEXT NOT NULL,
    is_system INTEGER NOT NULL DEFAULT 0,
    data TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

const CONVERSATION_ENTRIES: &str = r#"
CREATE TABLE conversation_entries (
    id TEXT PRIMARY KEY,
    agent_id TEXT NOT NULL,
    role TEXT NOT NULL,
    text TEXT NOT NULL,
    source TEXT NOT NULL DEFAULT 'text',
    hidden INTEGER NOT NULL DEFAULT 0,
    timestamp_ms INTEGER NOT NULL
);

CREATE INDEX idx_conversation_time ON conversation_entries(timestamp_ms DESC);
CREATE INDEX idx_conversation_agent ON conversation_entries(agent_id, timestamp_ms DESC);
"#;
