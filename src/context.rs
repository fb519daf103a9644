//! Explicit storage context passed to every operation.
//!
//! Bundles the configuration, the local fast-cache store, the optional
//! remote repository, the clock, and the per-aggregate locks that serialize
//! index rebuilds. Nothing in the crate reads ambient global state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::db;
use crate::local::{LocalStore, SqliteLocalStore};
use crate::migrate;
use crate::remote::{GitHubContentsClient, RemoteRepository};

/// One async mutex per aggregate key (e.g. `index_global`).
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn lock_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        // The map only holds Arcs, so a poisoned guard is still consistent.
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

pub struct StorageContext {
    pub config: Arc<Config>,
    pub local: Arc<dyn LocalStore>,
    pub remote: Option<Arc<dyn RemoteRepository>>,
    pub clock: Arc<dyn Clock>,
    pub(crate) index_locks: KeyedLocks,
}

impl StorageContext {
    pub fn new(
        config: Config,
        local: Arc<dyn LocalStore>,
        remote: Option<Arc<dyn RemoteRepository>>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            local,
            remote,
            clock: Arc::new(SystemClock),
            index_locks: KeyedLocks::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Open the SQLite local store (creating its schema) and, when both a
    /// repository and a token are configured, the GitHub remote.
    pub async fn from_config(config: Config) -> Result<Self> {
        let pool = db::connect(&config).await?;
        migrate::run_migrations(&pool).await?;
        let local: Arc<dyn LocalStore> = Arc::new(SqliteLocalStore::new(pool));

        let remote: Option<Arc<dyn RemoteRepository>> = match &config.remote {
            Some(remote_cfg) if remote_cfg.is_enabled() => {
                let client = GitHubContentsClient::from_config(remote_cfg)?;
                Some(Arc::new(client))
            }
            _ => {
                tracing::info!("remote repository not configured; running local-only");
                None
            }
        };

        Ok(Self::new(config, local, remote))
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    pub fn root(&self) -> &str {
        &self.config.store.root
    }

    pub fn git_ref(&self) -> &str {
        self.config
            .remote
            .as_ref()
            .map(|r| r.branch.as_str())
            .unwrap_or("main")
    }

    pub fn fetch_concurrency(&self) -> usize {
        self.config
            .remote
            .as_ref()
            .map(|r| r.fetch_concurrency)
            .unwrap_or(16)
            .max(1)
    }

    pub fn max_conflict_retries(&self) -> u32 {
        self.config
            .remote
            .as_ref()
            .map(|r| r.max_conflict_retries)
            .unwrap_or(3)
    }
}
