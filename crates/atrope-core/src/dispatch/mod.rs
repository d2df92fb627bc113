//! Pluggable sinks that receive dispatched images and reconcile removals.

pub mod catalog;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, info};

use crate::image::ImageRecord;
use crate::source::ListSource;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("found several images with same sha512: {0:?}")]
    DuplicatedImage(Vec<String>),
    #[error("image catalog requires one of these settings: {0:?}")]
    MissingConfiguration(Vec<&'static str>),
    #[error("setting '{0}' property is not supported")]
    MetadataOverwriteNotSupported(String),
    #[error("cannot load VO mapping file {file}: {reason}")]
    InvalidVoMapping { file: String, reason: String },
    #[error(transparent)]
    Client(#[from] anyhow::Error),
}

/// Metadata attached to a dispatched image beyond what `ImageRecord` models.
pub type DispatchMetadata = HashMap<String, String>;

/// A sink an image list's valid images are published to.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Publishes one image with caller-supplied metadata (list name,
    /// project, VO, ...).
    async fn dispatch(
        &self,
        image_name: &str,
        image: &ImageRecord,
        is_public: bool,
        metadata: &DispatchMetadata,
    ) -> Result<(), DispatchError>;

    /// Removes sink-side images belonging to `list` that are no longer in
    /// its current valid set. Called once, after every `dispatch` call for
    /// that list has completed.
    async fn sync(&self, list: &ListSource) -> Result<(), DispatchError>;
}

/// Does nothing; used in tests and when no real catalog is configured.
#[derive(Debug, Default)]
pub struct NoopDispatcher;

#[async_trait]
impl Dispatcher for NoopDispatcher {
    async fn dispatch(
        &self,
        image_name: &str,
        image: &ImageRecord,
        is_public: bool,
        metadata: &DispatchMetadata,
    ) -> Result<(), DispatchError> {
        info!(image_name, id = %image.identifier, is_public, ?metadata, "dispatching image (noop)");
        Ok(())
    }

    async fn sync(&self, list: &ListSource) -> Result<(), DispatchError> {
        info!(list = %list.name, "syncing dispatcher (noop)");
        Ok(())
    }
}

/// Orchestrates one or more dispatchers for a single list: builds the
/// image name from the configured prefixes, computes `is_public` from
/// whether the list requires a token, and fans `dispatch`/`sync` calls out.
pub struct DispatcherManager {
    dispatchers: Vec<Box<dyn Dispatcher>>,
    global_prefix: String,
}

impl DispatcherManager {
    pub fn new(dispatchers: Vec<Box<dyn Dispatcher>>, global_prefix: impl Into<String>) -> Self {
        DispatcherManager {
            dispatchers,
            global_prefix: global_prefix.into(),
        }
    }

    pub async fn dispatch_list_and_sync(&self, list: &ListSource) -> Result<(), DispatchError> {
        self.dispatch_list(list).await?;
        for dispatcher in &self.dispatchers {
            dispatcher.sync(list).await?;
        }
        Ok(())
    }

    pub async fn dispatch_list(&self, list: &ListSource) -> Result<(), DispatchError> {
        info!(list = %list.name, "preparing to dispatch list");

        let is_public = list.config.token.is_none();
        let mut metadata = DispatchMetadata::new();
        metadata.insert("image_list".to_string(), list.name.clone());
        if let Some(project) = &list.config.project {
            metadata.insert("project".to_string(), project.clone());
        }
        if let Ok(document) = list.document() {
            if let Some(vo) = &document.vo {
                metadata.insert("vo".to_string(), vo.clone());
            }
        }

        let images = list
            .valid_subscribed_images()
            .map_err(|e| DispatchError::Client(e.into()))?;
        for image in images {
            let image_name = format!("{}{}{}", self.global_prefix, list.config.prefix, image.title);
            self.dispatch_image(&image_name, image, is_public, &metadata)
                .await;
        }
        Ok(())
    }

    async fn dispatch_image(
        &self,
        image_name: &str,
        image: &ImageRecord,
        is_public: bool,
        metadata: &DispatchMetadata,
    ) {
        for dispatcher in &self.dispatchers {
            if let Err(e) = dispatcher.dispatch(image_name, image, is_public, metadata).await {
                error!(id = %image.identifier, error = %e, "failed to dispatch image");
            }
        }
    }
}
