//! Loads list sources from persistent config and orchestrates
//! fetch/cache/dispatch across all of them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{error, info};

use crate::cache::CacheManager;
use crate::config::{self, ConfigError};
use crate::dispatch::DispatcherManager;
use crate::errors::AtropeError;
use crate::source::{ListSource, ListSourceConfig};
use crate::trust::TrustStore;

/// The single entry point a CLI (or any embedder) drives: load configured
/// lists, fetch them, reconcile the cache, and dispatch.
pub struct ListManager {
    sources_path: PathBuf,
    lists: HashMap<String, ListSource>,
    http_client: reqwest::Client,
    trust_store: TrustStore,
}

impl ListManager {
    pub fn load(sources_path: &Path, ca_dir: &Path) -> Result<Self, AtropeError> {
        let configs = config::read_sources_file(sources_path)?;
        let mut lists = HashMap::new();
        for (name, cfg) in configs {
            lists.insert(name.clone(), ListSource::new(name, cfg));
        }

        Ok(ListManager {
            sources_path: sources_path.to_path_buf(),
            lists,
            http_client: reqwest::Client::new(),
            trust_store: TrustStore::load(ca_dir)?,
        })
    }

    pub fn lists(&self) -> &HashMap<String, ListSource> {
        &self.lists
    }

    /// Inserts a new list source; fails unless `force` when the name
    /// already exists.
    pub fn add(&mut self, source: ListSource, force: bool) -> Result<(), AtropeError> {
        if self.lists.contains_key(&source.name) && !force {
            return Err(AtropeError::DuplicatedImageList(source.name));
        }
        self.lists.insert(source.name.clone(), source);
        Ok(())
    }

    pub fn write(&self) -> Result<(), ConfigError> {
        let configs: HashMap<String, ListSourceConfig> = self
            .lists
            .iter()
            .map(|(name, source)| (name.clone(), source.config.clone()))
            .collect();
        config::write_sources_file(&self.sources_path, &configs)
    }

    /// Fetches a single named list. Errors are returned to the caller
    /// (unlike `fetch_lists`, which only logs).
    pub async fn fetch_list(&mut self, name: &str) -> Result<(), AtropeError> {
        let list = self
            .lists
            .get_mut(name)
            .ok_or_else(|| AtropeError::ListNotFound(name.to_string()))?;
        list.fetch(&self.http_client, &self.trust_store).await?;
        Ok(())
    }

    /// Fetches every configured list; per-list failures are logged and
    /// swallowed so one broken list never blocks the others.
    pub async fn fetch_lists(&mut self) {
        for (name, list) in self.lists.iter_mut() {
            if let Err(e) = list.fetch(&self.http_client, &self.trust_store).await {
                error!(list = %name, error = %e, "error loading list");
            }
        }
    }

    pub async fn cache(&mut self, cache_manager: &CacheManager) -> Result<(), AtropeError> {
        self.fetch_lists().await;
        let download_client = self.trust_store.download_client()?.clone();
        let mut lists: Vec<ListSource> = std::mem::take(&mut self.lists).into_values().collect();
        cache_manager.sync(&mut lists, &download_client).await?;
        self.lists = lists.into_iter().map(|l| (l.name.clone(), l)).collect();
        Ok(())
    }

    pub async fn sync(
        &mut self,
        cache_manager: &CacheManager,
        dispatcher_manager: &DispatcherManager,
    ) -> Result<(), AtropeError> {
        self.cache(cache_manager).await?;
        for list in self.lists.values() {
            if let Err(e) = dispatcher_manager.dispatch_list_and_sync(list).await {
                error!(list = %list.name, error = %e, "error dispatching list");
            }
        }
        info!("sync completed");
        Ok(())
    }
}
