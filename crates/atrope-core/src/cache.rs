//! Reconciles the on-disk cache with the set of currently ready lists and
//! their subscribed images, downloading what is missing and deleting
//! anything no longer referenced.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::source::{ListSource, SourceError};

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cannot create cache directory {path}: {source}")]
    CannotCreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot remove {path}: {source}")]
    CannotRemove {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Owns the cache root directory; the sole writer to it for the duration of
/// one process run.
pub struct CacheManager {
    root: PathBuf,
}

impl CacheManager {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| CacheError::CannotCreateDir {
            path: root.display().to_string(),
            source: e,
        })?;
        Ok(CacheManager { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reconciles the whole cache root against every list in `lists`.
    pub async fn sync(
        &self,
        lists: &mut [ListSource],
        client: &reqwest::Client,
    ) -> Result<(), CacheError> {
        info!("starting cache sync");
        let mut valid: HashSet<PathBuf> = HashSet::new();
        valid.insert(self.root.clone());

        for list in lists.iter_mut() {
            self.download_list(list, client, &mut valid).await?;
        }

        self.clean_invalid(&self.root, &valid)?;
        info!("cache sync completed");
        Ok(())
    }

    /// Reconciles a single list's subdirectory only.
    pub async fn sync_one(
        &self,
        list: &mut ListSource,
        client: &reqwest::Client,
    ) -> Result<(), CacheError> {
        let mut valid: HashSet<PathBuf> = HashSet::new();
        valid.insert(self.root.clone());
        self.download_list(list, client, &mut valid).await?;
        self.clean_invalid(&self.root.join(&list.name), &valid)?;
        Ok(())
    }

    async fn download_list(
        &self,
        list: &mut ListSource,
        client: &reqwest::Client,
        valid: &mut HashSet<PathBuf>,
    ) -> Result<(), CacheError> {
        info!(list = %list.name, "syncing list");
        if !list.config.enabled {
            info!(list = %list.name, "list is disabled, images will be marked for removal");
            return Ok(());
        }

        let base_dir = self.root.join(&list.name);
        // Enabled lists keep their subdirectory even when not currently
        // ready (e.g. expired or untrusted); only a disabled list has its
        // whole subdirectory swept away by `clean_invalid`.
        valid.insert(base_dir.clone());

        if !list.ready() {
            return Ok(());
        }

        let image_dir = base_dir.join("images");
        std::fs::create_dir_all(&image_dir).map_err(|e| CacheError::CannotCreateDir {
            path: image_dir.display().to_string(),
            source: e,
        })?;
        valid.insert(image_dir.clone());

        let identifiers: Vec<String> = list
            .subscribed_images()?
            .into_iter()
            .map(|i| i.identifier.clone())
            .collect();

        let list_name = list.name.clone();
        let document = list.document_mut()?;
        for id in identifiers {
            let image = document
                .images
                .iter_mut()
                .find(|i| i.identifier == id)
                .expect("identifier came from this same document");
            match image.download(&image_dir, client).await {
                Ok(()) => {
                    if let Some(location) = &image.location {
                        valid.insert(location.clone());
                    }
                }
                Err(e) => {
                    warn!(list = %list_name, image = %id, error = %e, "image sync failed, skipping");
                }
            }
        }

        Ok(())
    }

    fn clean_invalid(&self, base: &Path, valid: &HashSet<PathBuf>) -> Result<(), CacheError> {
        if !base.exists() {
            return Ok(());
        }
        info!(base = %base.display(), "checking for invalid files in cache dir");

        let mut invalid = Vec::new();
        for entry in WalkDir::new(base).contents_first(true) {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            let path = entry.path().to_path_buf();
            if !valid.contains(&path) {
                invalid.push(path);
            }
        }

        if invalid.is_empty() {
            info!(base = %base.display(), "no invalid files in cache dir");
            return Ok(());
        }

        for path in invalid {
            warn!(path = %path.display(), "removing from cache");
            let result = if path.is_dir() {
                std::fs::remove_dir(&path)
            } else {
                std::fs::remove_file(&path)
            };
            if let Err(e) = result {
                if e.kind() != std::io::ErrorKind::NotFound {
                    return Err(CacheError::CannotRemove {
                        path: path.display().to_string(),
                        source: e,
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endorser::ExpectedEndorser;
    use crate::source::ListSourceConfig;

    fn enabled_not_ready_source(name: &str) -> ListSource {
        let config = ListSourceConfig {
            url: "https://example.org/list.smime".to_string(),
            enabled: true,
            endorser: ExpectedEndorser {
                dn: "/O=Org/CN=Endorser".to_string(),
                ca: "/O=CA".to_string(),
            },
            token: None,
            prefix: String::new(),
            project: None,
            subscribed_images: vec![],
        };
        ListSource::new(name, config)
    }

    #[test]
    fn creates_root_on_construction() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("cache");
        let manager = CacheManager::new(&root).expect("cache manager created");
        assert!(manager.root().exists());
    }

    #[test]
    fn clean_invalid_tolerates_missing_base() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CacheManager::new(dir.path().join("cache")).unwrap();
        let missing = dir.path().join("does-not-exist");
        manager
            .clean_invalid(&missing, &HashSet::new())
            .expect("missing base is not an error");
    }

    #[test]
    fn clean_invalid_removes_unreferenced_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CacheManager::new(dir.path().join("cache")).unwrap();
        let stale = manager.root().join("stale.img");
        std::fs::write(&stale, b"data").unwrap();

        let mut valid = HashSet::new();
        valid.insert(manager.root().to_path_buf());
        manager.clean_invalid(manager.root(), &valid).unwrap();

        assert!(!stale.exists());
    }

    #[tokio::test]
    async fn enabled_but_not_ready_list_keeps_its_dir_but_loses_images() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CacheManager::new(dir.path().join("cache")).unwrap();

        let base_dir = manager.root().join("egi");
        let image_dir = base_dir.join("images");
        std::fs::create_dir_all(&image_dir).unwrap();
        std::fs::write(image_dir.join("stale.img"), b"data").unwrap();

        let mut list = enabled_not_ready_source("egi");
        assert!(!list.ready());

        let client = reqwest::Client::new();
        manager.sync_one(&mut list, &client).await.expect("sync_one");

        assert!(base_dir.exists(), "enabled list's top-level dir must survive");
        assert!(!image_dir.exists(), "a not-ready list's images must be cleaned");
    }
}
