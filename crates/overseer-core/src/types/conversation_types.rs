//! Conversation history types

use super::CommandSource;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConversationRole {
    User,
    Assistant,
}

impl ConversationRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "assistant" => Self::Assistant,
            _ => Self::User,
        }
    }
}

/// One side of a recorded exchange
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationEntry {
    pub id: String,
    pub agent_id: String,
    pub role: ConversationRole,
    pub text: String,
    pub source: CommandSource,
    pub hidden: bool,
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: i64,
}

impl ConversationEntry {
    pub fn new(
        agent_id: impl Into<String>,
        role: ConversationRole,
        text: impl Into<String>,
        source: CommandSource,
        hidden: bool,
        timestamp_ms: i64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            role,
            text: text.into(),
            source,
            hidden,
            timestamp_ms,
        }
    }
}

/// Cursor query for `load_conversation_history`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub agent_id: Option<String>,
    /// Only entries strictly older than this timestamp (ms)
    pub before: Option<i64>,
    pub limit: Option<usize>,
}

impl HistoryQuery {
    pub const DEFAULT_LIMIT: usize = 50;
    pub const MAX_LIMIT: usize = 1_000;

    /// Requested page size, clamped to `1..=MAX_LIMIT`
    pub fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }
}

/// A page of history, oldest first
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub entries: Vec<ConversationEntry>,
    pub has_more: bool,
}

impl HistoryPage {
    /// Cursor to pass as `before` for the next (older) page
    pub fn next_cursor(&self) -> Option<i64> {
        if self.has_more {
            self.entries.first().map(|e| e.timestamp_ms)
        } else {
            None
        }
    }
}
