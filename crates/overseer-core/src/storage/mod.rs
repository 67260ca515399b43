//! SQLite persistence for agent profiles and conversation history.
//!
//! Queries are synchronous functions over a `Connection`; the async store
//! traits run them on the blocking pool.

mod migrations;
mod queries;

pub use migrations::run_migrations;
pub use queries::*;

use crate::collaborators::{ConversationStore, ProfileStore};
use crate::error::{Error, Result, StorageError};
use crate::types::{AgentProfile, ConversationEntry, HistoryPage, HistoryQuery};
use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tracing::info;

pub type DbPool = Pool<SqliteConnectionManager>;

const DB_FILE: &str = "overseer.db";

/// Pooled SQLite handle shared by the profile and conversation stores
#[derive(Clone)]
pub struct Storage {
    pool: DbPool,
    db_path: PathBuf,
}

impl Storage {
    /// Open (or create) `overseer.db` inside `data_dir`
    pub fn new_with_path(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir).map_err(|e| {
            Error::Storage(StorageError::Database(format!(
                "cannot create {}: {}",
                data_dir.display(),
                e
            )))
        })?;
        Self::from_path(data_dir.join(DB_FILE))
    }

    pub fn from_path(db_path: PathBuf) -> Result<Self> {
        info!("Opening database at {}", db_path.display());
        Self::open(SqliteConnectionManager::file(&db_path), 10, db_path)
    }

    /// Single-connection in-memory database, mostly for tests
    pub fn in_memory() -> Result<Self> {
        // Every pooled connection to :memory: would be a separate database
        Self::open(SqliteConnectionManager::memory(), 1, PathBuf::from(":memory:"))
    }

    fn open(manager: SqliteConnectionManager, max_size: u32, db_path: PathBuf) -> Result<Self> {
        let pool = Pool::builder()
            .max_size(max_size)
            .build(manager)
            .map_err(|e| Error::Storage(StorageError::Pool(e.to_string())))?;
        run_migrations(&*pool.get()?)?;
        Ok(Self { pool, db_path })
    }

    pub fn connection(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Run a query on the blocking pool
    async fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        })
        .await
        .map_err(|e| Error::Internal(format!("Storage task failed: {}", e)))?
    }
}

#[async_trait]
impl ProfileStore for Storage {
    async fn get_profiles(&self) -> Result<Vec<AgentProfile>> {
        self.with_connection(get_all_profiles).await
    }

    async fn save_profile(&self, profile: &AgentProfile) -> Result<()> {
        let profile = profile.clone();
        self.with_connection(move |conn| upsert_profile(conn, &profile))
            .await
    }

    async fn delete_profile(&self, agent_id: &str) -> Result<()> {
        let agent_id = agent_id.to_string();
        self.with_connection(move |conn| queries::delete_profile(conn, &agent_id))
            .await
    }
}

#[async_trait]
impl ConversationStore for Storage {
    async fn append(&self, entries: Vec<ConversationEntry>) -> Result<()> {
        self.with_connection(move |conn| {
            let tx = conn.unchecked_transaction()?;
            for entry in &entries {
                insert_conversation_entry(&tx, entry)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn load(&self, query: &HistoryQuery) -> Result<HistoryPage> {
        let query = query.clone();
        self.with_connection(move |conn| load_conversation_history(conn, &query))
            .await
    }
}
