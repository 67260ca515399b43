//! Interfaces the supervisor consumes from the rest of the application
//!
//! Persistence, secret resolution and context enrichment live outside the
//! core; the supervisor only sees these traits.

use crate::error::Result;
use crate::types::{AgentProfile, ConversationEntry, HistoryPage, HistoryQuery};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::warn;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get_profiles(&self) -> Result<Vec<AgentProfile>>;
    async fn save_profile(&self, profile: &AgentProfile) -> Result<()>;
    async fn delete_profile(&self, agent_id: &str) -> Result<()>;
}

/// Turns `env var -> secret name` bindings into `env var -> value`
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SecretResolver: Send + Sync {
    async fn resolve(&self, bindings: &HashMap<String, String>) -> Result<HashMap<String, String>>;
}

/// Plain secret values, used to build the output redactor
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SecretValuesProvider: Send + Sync {
    async fn secret_values(&self) -> Result<Vec<String>>;
}

/// Enriches a profile with contextual memory before a command turn
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContextBuilder: Send + Sync {
    async fn build_context(&self, profile: Arc<AgentProfile>, text: &str) -> Result<Arc<AgentProfile>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn append(&self, entries: Vec<ConversationEntry>) -> Result<()>;
    async fn load(&self, query: &HistoryQuery) -> Result<HistoryPage>;
}

/// Resolves each secret name from the host environment
///
/// With a profile store attached it also reports the current value of every
/// secret any profile binds, so launched secrets can be masked in output.
#[derive(Clone, Default)]
pub struct EnvSecretResolver {
    profiles: Option<Arc<dyn ProfileStore>>,
}

impl EnvSecretResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profiles(profiles: Arc<dyn ProfileStore>) -> Self {
        Self {
            profiles: Some(profiles),
        }
    }
}

#[async_trait]
impl SecretResolver for EnvSecretResolver {
    async fn resolve(&self, bindings: &HashMap<String, String>) -> Result<HashMap<String, String>> {
        let mut env = HashMap::with_capacity(bindings.len());
        for (var, secret) in bindings {
            match std::env::var(secret) {
                Ok(value) => {
                    env.insert(var.clone(), value);
                }
                Err(_) => warn!(var = %var, secret = %secret, "Secret not set in environment"),
            }
        }
        Ok(env)
    }
}

#[async_trait]
impl SecretValuesProvider for EnvSecretResolver {
    async fn secret_values(&self) -> Result<Vec<String>> {
        let Some(profiles) = &self.profiles else {
            return Ok(Vec::new());
        };
        let names: BTreeSet<String> = profiles
            .get_profiles()
            .await?
            .into_iter()
            .flat_map(|profile| profile.secret_bindings.into_values())
            .collect();
        Ok(names
            .iter()
            .filter_map(|name| std::env::var(name).ok())
            .filter(|value| !value.is_empty())
            .collect())
    }
}

/// Fixed secret table; handy for tests and single-user setups
#[derive(Debug, Clone, Default)]
pub struct StaticSecrets {
    secrets: HashMap<String, String>,
}

impl StaticSecrets {
    pub fn new(secrets: HashMap<String, String>) -> Self {
        Self { secrets }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.secrets.insert(name.into(), value.into());
    }
}

#[async_trait]
impl SecretResolver for StaticSecrets {
    async fn resolve(&self, bindings: &HashMap<String, String>) -> Result<HashMap<String, String>> {
        Ok(bindings
            .iter()
            .filter_map(|(var, secret)| {
                self.secrets
                    .get(secret)
                    .map(|value| (var.clone(), value.clone()))
            })
            .collect())
    }
}

#[async_trait]
impl SecretValuesProvider for StaticSecrets {
    async fn secret_values(&self) -> Result<Vec<String>> {
        Ok(self.secrets.values().cloned().collect())
    }
}

/// Context builder that leaves the profile untouched
#[derive(Debug, Clone, Default)]
pub struct PassthroughContext;

#[async_trait]
impl ContextBuilder for PassthroughContext {
    async fn build_context(&self, profile: Arc<AgentProfile>, _text: &str) -> Result<Arc<AgentProfile>> {
        Ok(profile)
    }
}
