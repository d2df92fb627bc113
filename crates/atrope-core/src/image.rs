//! Per-image metadata, streaming download, and checksum verification.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde_json::Value;
use sha2::{Digest, Sha512};
use thiserror::Error;
use tracing::{debug, warn};

use crate::ovf;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("invalid image definition, missing required field '{0}'")]
    MissingField(&'static str),
    #[error("image {location} already downloaded")]
    AlreadyDownloaded { location: String },
    #[error("image cannot be found on disk at {location}")]
    NotFoundOnDisk { location: String },
    #[error("image {id} verification failed: expected {expected}, obtained {obtained}")]
    VerificationFailed {
        id: String,
        expected: String,
        obtained: String,
    },
    #[error("cannot get image, reason: ({code}) {reason}")]
    DownloadFailed { code: String, reason: String },
    #[error(transparent)]
    Ovf(#[from] ovf::OvfError),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

const REQUIRED_FIELDS: &[&str] = &[
    "ad:group",
    "ad:mpuri",
    "ad:user:fullname",
    "ad:user:guid",
    "ad:user:uri",
    "dc:description",
    "dc:identifier",
    "dc:title",
    "hv:hypervisor",
    "hv:format",
    "hv:size",
    "hv:uri",
    "hv:version",
    "sl:arch",
    "sl:checksum:sha512",
    "sl:comments",
    "sl:os",
    "sl:osname",
    "sl:osversion",
];

/// One `hv:image` entry from a list document.
#[derive(Debug, Clone)]
pub struct ImageRecord {
    pub identifier: String,
    pub uri: String,
    pub sha512: String,
    pub format: String,
    pub arch: String,
    pub osname: String,
    pub osversion: String,
    pub description: String,
    pub mpuri: String,
    pub title: String,
    /// Every field from the original `hv:image` mapping, preserved verbatim
    /// so dispatchers can surface metadata this type does not model directly.
    pub appliance_attributes: HashMap<String, Value>,
    pub location: Option<PathBuf>,
    pub verified: bool,
}

fn field<'a>(map: &'a serde_json::Map<String, Value>, key: &'static str) -> Result<&'a str, ImageError> {
    map.get(key)
        .and_then(Value::as_str)
        .ok_or(ImageError::MissingField(key))
}

impl ImageRecord {
    /// Parses a single `hv:image` JSON object. All 19 mandatory fields must
    /// be present or the whole document this image belongs to is rejected.
    pub fn parse(raw: &Value) -> Result<Self, ImageError> {
        let map = raw
            .get("hv:image")
            .and_then(Value::as_object)
            .ok_or(ImageError::MissingField("hv:image"))?;

        for required in REQUIRED_FIELDS {
            if !map.contains_key(*required) {
                return Err(ImageError::MissingField(required));
            }
        }

        Ok(ImageRecord {
            identifier: field(map, "dc:identifier")?.to_string(),
            uri: field(map, "hv:uri")?.to_string(),
            sha512: field(map, "sl:checksum:sha512")?.to_lowercase(),
            format: field(map, "hv:format")?.to_string(),
            arch: field(map, "sl:arch")?.to_string(),
            osname: field(map, "sl:osname")?.to_string(),
            osversion: field(map, "sl:osversion")?.to_string(),
            description: field(map, "dc:description")?.to_string(),
            mpuri: field(map, "ad:mpuri")?.to_string(),
            title: field(map, "dc:title")?.to_string(),
            appliance_attributes: map.clone().into_iter().collect(),
            location: None,
            verified: false,
        })
    }

    /// Downloads (or revalidates) this image into `base_dir/identifier`,
    /// idempotent across runs but not reentrant within the same run.
    pub async fn download(&mut self, base_dir: &Path, client: &reqwest::Client) -> Result<(), ImageError> {
        if self.location.is_some() {
            return Err(ImageError::AlreadyDownloaded {
                location: base_dir.join(&self.identifier).display().to_string(),
            });
        }

        let dest = base_dir.join(&self.identifier);
        if dest.exists() {
            if let Ok(digest) = checksum_file(&dest) {
                if digest == self.sha512 {
                    self.location = Some(dest);
                    self.verified = true;
                    return Ok(());
                }
                warn!(image = %self.identifier, "cached image checksum mismatch, re-downloading");
            }
        }

        self.fetch_to(&dest, client).await?;

        let digest = checksum_file(&dest)?;
        if digest != self.sha512 {
            let _ = std::fs::remove_file(&dest);
            return Err(ImageError::VerificationFailed {
                id: self.identifier.clone(),
                expected: self.sha512.clone(),
                obtained: digest,
            });
        }

        self.location = Some(dest);
        self.verified = true;
        Ok(())
    }

    async fn fetch_to(&self, dest: &Path, client: &reqwest::Client) -> Result<(), ImageError> {
        use tokio::io::AsyncWriteExt;

        let response = client.get(&self.uri).send().await?;
        if !response.status().is_success() {
            return Err(ImageError::DownloadFailed {
                code: response.status().to_string(),
                reason: self.uri.clone(),
            });
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        use futures_util::StreamExt;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        debug!(image = %self.identifier, dest = %dest.display(), "image downloaded");
        Ok(())
    }

    /// Returns `(disk_format, bytes)` for this image, extracting the disk
    /// out of the surrounding OVA container when `format == "ova"`.
    pub fn disk(&self) -> Result<(String, Vec<u8>), ImageError> {
        let location = self
            .location
            .as_ref()
            .ok_or_else(|| ImageError::NotFoundOnDisk {
                location: self.identifier.clone(),
            })?;

        if self.format != "ova" {
            let bytes = std::fs::read(location)?;
            return Ok((self.format.clone(), bytes));
        }

        let descriptor = ovf::extract_descriptor(location)?;
        let (disk_format, href) = ovf::disk_reference(&descriptor)?;
        let bytes = ovf::extract_file(location, &href)?;
        Ok((disk_format, bytes))
    }
}

fn checksum_file(path: &Path) -> Result<String, ImageError> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha512::new();
    let mut buf = [0u8; 1024 * 1024];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn full_image_json() -> Value {
        json!({
            "hv:image": {
                "ad:group": "g", "ad:mpuri": "mp", "ad:user:fullname": "u",
                "ad:user:guid": "guid", "ad:user:uri": "uri",
                "dc:description": "desc", "dc:identifier": "img-1", "dc:title": "title",
                "hv:hypervisor": "kvm", "hv:format": "qcow2", "hv:size": 1,
                "hv:uri": "https://example.org/img-1.qcow2", "hv:version": "1",
                "sl:arch": "x86_64", "sl:checksum:sha512": "ABCDEF",
                "sl:comments": "", "sl:os": "linux", "sl:osname": "debian",
                "sl:osversion": "12",
            }
        })
    }

    #[test]
    fn parses_complete_image() {
        let image = ImageRecord::parse(&full_image_json()).expect("valid image");
        assert_eq!(image.identifier, "img-1");
        assert_eq!(image.sha512, "abcdef");
        assert!(image.location.is_none());
    }

    #[test]
    fn rejects_missing_field() {
        let mut raw = full_image_json();
        raw["hv:image"].as_object_mut().unwrap().remove("sl:arch");
        let err = ImageRecord::parse(&raw).unwrap_err();
        assert!(matches!(err, ImageError::MissingField("sl:arch")));
    }

    #[test]
    fn disk_without_location_fails() {
        let image = ImageRecord::parse(&full_image_json()).unwrap();
        let err = image.disk().unwrap_err();
        assert!(matches!(err, ImageError::NotFoundOnDisk { .. }));
    }
}
