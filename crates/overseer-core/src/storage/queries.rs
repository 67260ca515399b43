//! Database query implementations

use crate::error::Result;
use crate::types::*;
use rusqlite::{params, Connection, OptionalExtension};

// ===== Profile Queries =====

/// Insert or replace an agent profile
pub fn upsert_profile(conn: &Connection, profile: &AgentProfile) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO agent_profiles (id, name, runtime, is_system, data, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            runtime = excluded.runtime,
            is_system = excluded.is_system,
            data = excluded.data,
            updated_at = excluded.updated_at
        "#,
        params![
            profile.id,
            profile.name,
            profile.runtime,
            profile.is_system as i32,
            serde_json::to_string(profile)?,
            profile.created_at.to_rfc3339(),
            profile.updated_at.to_rfc3339(),
        ],
    )?;

    Ok(())
}

/// Get all profiles, oldest first
pub fn get_all_profiles(conn: &Connection) -> Result<Vec<AgentProfile>> {
    let mut stmt = conn.prepare("SELECT data FROM agent_profiles ORDER BY created_at, id")?;

    let rows: Vec<String> = stmt
        .query_map([], |row| row.get(0))?
        .filter_map(|r| r.ok())
        .collect();

    let mut profiles = Vec::with_capacity(rows.len());
    for data in rows {
        match serde_json::from_str::<AgentProfile>(&data) {
            Ok(profile) => profiles.push(profile),
            Err(e) => tracing::warn!("Skipping unreadable agent profile: {}", e),
        }
    }

    Ok(profiles)
}

/// Get a profile by ID
pub fn get_profile(conn: &Connection, agent_id: &str) -> Result<Option<AgentProfile>> {
    let data: Option<String> = conn
        .query_row(
            "SELECT data FROM agent_profiles WHERE id = ?",
            params![agent_id],
            |row| row.get(0),
        )
        .optional()?;

    match data {
        Some(data) => Ok(Some(serde_json::from_str(&data)?)),
        None => Ok(None),
    }
}

/// Delete a profile
pub fn delete_profile(conn: &Connection, agent_id: &str) -> Result<()> {
    conn.execute("DELETE FROM agent_profiles WHERE id = ?", params![agent_id])?;
    Ok(())
}

// ===== Conversation Queries =====

/// Append one conversation entry
pub fn insert_conversation_entry(conn: &Connection, entry: &ConversationEntry) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO conversation_entries (id, agent_id, role, text, source, hidden, timestamp_ms)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            entry.id,
            entry.agent_id,
            entry.role.as_str(),
            entry.text,
            entry.source.as_str(),
            entry.hidden as i32,
            entry.timestamp_ms,
        ],
    )?;

    Ok(())
}

/// Newest page of history older than `query.before`, returned oldest first
pub fn load_conversation_history(conn: &Connection, query: &HistoryQuery) -> Result<HistoryPage> {
    let limit = query.effective_limit();

    let mut stmt = conn.prepare(
        r#"
        SELECT id, agent_id, role, text, source, hidden, timestamp_ms
        FROM conversation_entries
        WHERE (?1 IS NULL OR agent_id = ?1)
          AND (?2 IS NULL OR timestamp_ms < ?2)
        ORDER BY timestamp_ms DESC, rowid DESC
        LIMIT ?3
        "#,
    )?;

    let mut entries: Vec<ConversationEntry> = stmt
        .query_map(
            params![query.agent_id, query.before, limit.saturating_add(1) as i64],
            |row| {
                let role: String = row.get(2)?;
                let source: String = row.get(4)?;
                let hidden: i32 = row.get(5)?;

                Ok(ConversationEntry {
                    id: row.get(0)?,
                    agent_id: row.get(1)?,
                    role: ConversationRole::parse(&role),
                    text: row.get(3)?,
                    source: parse_source(&source),
                    hidden: hidden != 0,
                    timestamp_ms: row.get(6)?,
                })
            },
        )?
        .filter_map(|r| r.ok())
        .collect();

    let has_more = entries.len() > limit;
    entries.truncate(limit);
    entries.reverse();

    Ok(HistoryPage { entries, has_more })
}

// ===== Helper Functions =====

fn parse_source(s: &str) -> CommandSource {
    match s {
        "voice" => CommandSource::Voice,
        _ => CommandSource::Text,
    }
}
