//! An image-catalog dispatcher modeled on OpenStack Glance: images are
//! tagged `"atrope"`, carry AppDB-derived properties, and are reconciled by
//! `appdb_id` on every sync.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{DispatchError, DispatchMetadata, Dispatcher};
use crate::image::ImageRecord;
use crate::source::ListSource;

/// A catalog-side image as returned by `ImageCatalogClient::find`.
#[derive(Debug, Clone)]
pub struct CatalogImage {
    pub id: String,
    pub appdb_id: String,
    pub sha512: String,
    pub status: CatalogImageStatus,
    pub image_list: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogImageStatus {
    Queued,
    Active,
}

/// The narrow surface an image-catalog dispatcher needs from a real SDK
/// (OpenStack Glance, or any other image service with similar semantics).
/// A production implementation of this trait — talking to Keystone for
/// auth and Glance for image CRUD — is an external collaborator.
#[async_trait]
pub trait ImageCatalogClient: Send + Sync {
    async fn find_by_appdb_id(&self, appdb_id: &str) -> anyhow::Result<Vec<CatalogImage>>;
    async fn list_by_list_name(&self, list_name: &str) -> anyhow::Result<Vec<CatalogImage>>;
    async fn create(&self, metadata: &HashMap<String, String>) -> anyhow::Result<CatalogImage>;
    async fn upload(&self, id: &str, disk_format: &str, data: Vec<u8>) -> anyhow::Result<()>;
    async fn delete(&self, id: &str) -> anyhow::Result<()>;
    async fn add_member(&self, id: &str, tenant: &str) -> anyhow::Result<()>;
    async fn accept_membership(&self, id: &str, tenant: &str) -> anyhow::Result<()>;
}

/// A process-local `ImageCatalogClient`, keyed by a counter standing in for
/// the id a real catalog would assign. Not backed by any network service;
/// a real Glance/Keystone-backed implementation is a separate concern.
#[derive(Default)]
pub struct InMemoryCatalogClient {
    images: Mutex<Vec<CatalogImage>>,
    next_id: Mutex<u64>,
}

impl InMemoryCatalogClient {
    pub fn new() -> Self {
        InMemoryCatalogClient::default()
    }
}

#[async_trait]
impl ImageCatalogClient for InMemoryCatalogClient {
    async fn find_by_appdb_id(&self, appdb_id: &str) -> anyhow::Result<Vec<CatalogImage>> {
        let images = self.images.lock().expect("lock poisoned");
        Ok(images.iter().filter(|i| i.appdb_id == appdb_id).cloned().collect())
    }

    async fn list_by_list_name(&self, list_name: &str) -> anyhow::Result<Vec<CatalogImage>> {
        let images = self.images.lock().expect("lock poisoned");
        Ok(images.iter().filter(|i| i.image_list == list_name).cloned().collect())
    }

    async fn create(&self, metadata: &HashMap<String, String>) -> anyhow::Result<CatalogImage> {
        let mut next_id = self.next_id.lock().expect("lock poisoned");
        let id = format!("img-{}", *next_id);
        *next_id += 1;

        let image = CatalogImage {
            id,
            appdb_id: metadata.get("appdb_id").cloned().unwrap_or_default(),
            sha512: metadata.get("sha512").cloned().unwrap_or_default(),
            status: CatalogImageStatus::Queued,
            image_list: metadata.get("image_list").cloned().unwrap_or_default(),
        };
        self.images.lock().expect("lock poisoned").push(image.clone());
        Ok(image)
    }

    async fn upload(&self, id: &str, _disk_format: &str, _data: Vec<u8>) -> anyhow::Result<()> {
        let mut images = self.images.lock().expect("lock poisoned");
        if let Some(image) = images.iter_mut().find(|i| i.id == id) {
            image.status = CatalogImageStatus::Active;
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> anyhow::Result<()> {
        self.images.lock().expect("lock poisoned").retain(|i| i.id != id);
        Ok(())
    }

    async fn add_member(&self, _id: &str, _tenant: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn accept_membership(&self, _id: &str, _tenant: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

const ALLOWED_DISK_FORMATS: &[&str] = &[
    "ami", "ari", "aki", "vhd", "vhdx", "vmdk", "raw", "qcow2", "vdi", "iso", "ploop", "root-tar",
];

/// Maps an `hv:format` value onto `(container_format, disk_format)`.
fn guess_formats(format: &str) -> (&'static str, &'static str) {
    match format.to_lowercase().as_str() {
        "ova" => ("ova", "vmdk"),
        "standard" => ("bare", "raw"),
        "qcow2" => ("bare", "qcow2"),
        other => {
            warn!(format = other, "unknown image format, defaulting to bare/raw");
            ("bare", "raw")
        }
    }
}

/// VO name -> tenant/project id, consulted when a list carries a VO tag.
pub type VoMapping = HashMap<String, String>;

pub struct CatalogDispatcher<C: ImageCatalogClient> {
    client: C,
    vo_mapping: VoMapping,
}

impl<C: ImageCatalogClient> CatalogDispatcher<C> {
    pub fn new(client: C, vo_mapping: VoMapping) -> Self {
        CatalogDispatcher { client, vo_mapping }
    }

    fn build_metadata(
        &self,
        image: &ImageRecord,
        metadata: &DispatchMetadata,
    ) -> Result<HashMap<String, String>, DispatchError> {
        let (container_format, disk_format) = guess_formats(&image.format);
        if !ALLOWED_DISK_FORMATS.contains(&disk_format) {
            return Err(DispatchError::MetadataOverwriteNotSupported(
                disk_format.to_string(),
            ));
        }

        let mut out = HashMap::new();
        out.insert("name".to_string(), image.title.clone());
        out.insert("tags".to_string(), "atrope".to_string());
        out.insert("architecture".to_string(), image.arch.clone());
        out.insert("container_format".to_string(), container_format.to_string());
        out.insert("disk_format".to_string(), disk_format.to_string());
        out.insert("os_distro".to_string(), image.osname.to_lowercase());
        out.insert("os_version".to_string(), image.osversion.clone());
        out.insert(
            "vmcatcher_event_dc_description".to_string(),
            image.description.clone(),
        );
        out.insert("vmcatcher_event_ad_mpuri".to_string(), image.mpuri.clone());
        out.insert("appdb_id".to_string(), image.identifier.clone());
        out.insert("sha512".to_string(), image.sha512.clone());

        for (key, value) in metadata {
            if out.contains_key(key) {
                return Err(DispatchError::MetadataOverwriteNotSupported(key.clone()));
            }
            out.insert(key.clone(), value.clone());
        }

        Ok(out)
    }
}

#[async_trait]
impl<C: ImageCatalogClient> Dispatcher for CatalogDispatcher<C> {
    async fn dispatch(
        &self,
        image_name: &str,
        image: &ImageRecord,
        _is_public: bool,
        metadata: &DispatchMetadata,
    ) -> Result<(), DispatchError> {
        debug!(image_name, "dispatching image to catalog");

        let mut full_metadata = self.build_metadata(image, metadata)?;
        full_metadata.insert("name".to_string(), image_name.to_string());

        let candidates = self
            .client
            .find_by_appdb_id(&image.identifier)
            .await
            .map_err(DispatchError::Client)?;

        if candidates.len() > 1 {
            let ids = candidates.into_iter().map(|i| i.id).collect();
            return Err(DispatchError::DuplicatedImage(ids));
        }

        let existing = match candidates.into_iter().next() {
            Some(catalog_image) if catalog_image.sha512 != image.sha512 => {
                info!(id = %catalog_image.id, "checksum drifted, deleting and reuploading");
                self.client
                    .delete(&catalog_image.id)
                    .await
                    .map_err(DispatchError::Client)?;
                None
            }
            other => other,
        };

        let catalog_image = match existing {
            Some(image) => image,
            None => self
                .client
                .create(&full_metadata)
                .await
                .map_err(DispatchError::Client)?,
        };

        if catalog_image.status == CatalogImageStatus::Queued {
            let (_, data) = image.disk().map_err(|e| DispatchError::Client(e.into()))?;
            let (_, disk_format) = guess_formats(&image.format);
            self.client
                .upload(&catalog_image.id, disk_format, data)
                .await
                .map_err(DispatchError::Client)?;
        }

        if let Some(vo) = metadata.get("vo") {
            if let Some(tenant) = self.vo_mapping.get(vo) {
                self.client
                    .add_member(&catalog_image.id, tenant)
                    .await
                    .map_err(DispatchError::Client)?;
                self.client
                    .accept_membership(&catalog_image.id, tenant)
                    .await
                    .map_err(DispatchError::Client)?;
            }
        }

        Ok(())
    }

    async fn sync(&self, list: &ListSource) -> Result<(), DispatchError> {
        let valid: Vec<String> = list
            .valid_subscribed_images()
            .map_err(|e| DispatchError::Client(e.into()))?
            .into_iter()
            .map(|i| i.identifier.clone())
            .collect();

        let catalog_images = self
            .client
            .list_by_list_name(&list.name)
            .await
            .map_err(DispatchError::Client)?;

        for image in catalog_images {
            if !valid.contains(&image.appdb_id) {
                info!(id = %image.id, "image in catalog is not valid anymore, deleting it");
                self.client.delete(&image.id).await.map_err(DispatchError::Client)?;
            }
        }

        info!(list = %list.name, "sync terminated for image list");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guesses_known_formats() {
        assert_eq!(guess_formats("ova"), ("ova", "vmdk"));
        assert_eq!(guess_formats("standard"), ("bare", "raw"));
        assert_eq!(guess_formats("qcow2"), ("bare", "qcow2"));
    }

    #[test]
    fn unknown_format_defaults_to_bare_raw() {
        assert_eq!(guess_formats("mystery"), ("bare", "raw"));
    }

    #[tokio::test]
    async fn in_memory_client_round_trips_create_upload_delete() {
        let client = InMemoryCatalogClient::new();
        let mut metadata = HashMap::new();
        metadata.insert("appdb_id".to_string(), "abc123".to_string());
        metadata.insert("sha512".to_string(), "deadbeef".to_string());
        metadata.insert("image_list".to_string(), "egi".to_string());

        let created = client.create(&metadata).await.expect("create");
        assert_eq!(created.status, CatalogImageStatus::Queued);

        let found = client
            .find_by_appdb_id("abc123")
            .await
            .expect("find")
            .into_iter()
            .next()
            .expect("one match");
        assert_eq!(found.id, created.id);

        client
            .upload(&created.id, "raw", vec![1, 2, 3])
            .await
            .expect("upload");
        let listed = client.list_by_list_name("egi").await.expect("list");
        assert_eq!(listed[0].status, CatalogImageStatus::Active);

        client.delete(&created.id).await.expect("delete");
        assert!(client.find_by_appdb_id("abc123").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_by_list_name_does_not_leak_other_lists_images() {
        let client = InMemoryCatalogClient::new();

        let mut egi_meta = HashMap::new();
        egi_meta.insert("appdb_id".to_string(), "egi-1".to_string());
        egi_meta.insert("image_list".to_string(), "egi".to_string());
        client.create(&egi_meta).await.expect("create egi image");

        let mut other_meta = HashMap::new();
        other_meta.insert("appdb_id".to_string(), "other-1".to_string());
        other_meta.insert("image_list".to_string(), "other".to_string());
        client.create(&other_meta).await.expect("create other image");

        let egi_images = client.list_by_list_name("egi").await.expect("list egi");
        assert_eq!(egi_images.len(), 1);
        assert_eq!(egi_images[0].appdb_id, "egi-1");
    }
}
