//! The parsed `hv:imagelist` payload enclosed in a verified SMIME message.

use chrono::{DateTime, FixedOffset};
use serde_json::Value;
use thiserror::Error;

use crate::endorser::{Endorser, RawEndorser};
use crate::image::{ImageError, ImageRecord};

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("image list is not valid: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("image list is not valid, field '{0}' cannot be empty")]
    MissingMandatoryField(&'static str),
    #[error("image list is not valid: invalid timestamp '{0}'")]
    InvalidTimestamp(String),
    #[error(transparent)]
    Image(#[from] ImageError),
}

const REQUIRED_FIELDS: &[&str] = &[
    "dc:date:created",
    "dc:date:expires",
    "hv:endorser",
    "dc:identifier",
    "dc:description",
    "dc:title",
    "hv:images",
    "dc:source",
    "hv:version",
    "hv:uri",
];

/// A fully parsed and internally consistent HEPiX image list.
#[derive(Debug, Clone)]
pub struct ImageListDocument {
    pub created: DateTime<FixedOffset>,
    pub expires: DateTime<FixedOffset>,
    pub uuid: String,
    pub description: String,
    pub name: String,
    pub source: String,
    pub version: String,
    pub uri: String,
    pub endorser: Endorser,
    pub images: Vec<ImageRecord>,
    pub vo: Option<String>,
}

impl ImageListDocument {
    /// Parses verified JSON bytes into a document. Fails the whole document
    /// if any mandatory field or any single image is invalid.
    pub fn parse(bytes: &[u8]) -> Result<Self, DocumentError> {
        let root: Value = serde_json::from_slice(bytes)?;
        let meta = root
            .get("hv:imagelist")
            .and_then(Value::as_object)
            .ok_or(DocumentError::MissingMandatoryField("hv:imagelist"))?;

        for required in REQUIRED_FIELDS {
            if !meta.contains_key(*required) {
                return Err(DocumentError::MissingMandatoryField(required));
            }
        }

        let str_field = |key: &'static str| -> Result<String, DocumentError> {
            meta.get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or(DocumentError::MissingMandatoryField(key))
        };

        let created = parse_timestamp(&str_field("dc:date:created")?)?;
        let expires = parse_timestamp(&str_field("dc:date:expires")?)?;

        let endorser_raw: RawEndorser = meta
            .get("hv:endorser")
            .and_then(|v| v.get("hv:x509"))
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .ok_or(DocumentError::MissingMandatoryField("hv:endorser.hv:x509"))?;
        let endorser = Endorser::from_raw(endorser_raw)?;

        let images = meta
            .get("hv:images")
            .and_then(Value::as_array)
            .ok_or(DocumentError::MissingMandatoryField("hv:images"))?
            .iter()
            .map(ImageRecord::parse)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ImageListDocument {
            created,
            expires,
            uuid: str_field("dc:identifier")?,
            description: str_field("dc:description")?,
            name: str_field("dc:title")?,
            source: str_field("dc:source")?,
            version: str_field("hv:version")?,
            uri: str_field("hv:uri")?,
            endorser,
            images,
            vo: meta.get("hv:vo").and_then(Value::as_str).map(str::to_string),
        })
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<FixedOffset>, DocumentError> {
    DateTime::parse_from_rfc3339(raw).map_err(|_| DocumentError::InvalidTimestamp(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_doc(expires: &str) -> Value {
        json!({
            "hv:imagelist": {
                "dc:date:created": "2026-01-01T00:00:00+00:00",
                "dc:date:expires": expires,
                "hv:endorser": {
                    "hv:x509": {
                        "dc:creator": "CESNET",
                        "hv:ca": "/O=CA",
                        "hv:dn": "/O=Org/CN=Endorser",
                        "hv:email": "ops@example.org",
                    }
                },
                "dc:identifier": "list-1",
                "dc:description": "desc",
                "dc:title": "title",
                "hv:images": [],
                "dc:source": "source",
                "hv:version": "1.0",
                "hv:uri": "https://example.org/list",
            }
        })
    }

    #[test]
    fn parses_minimal_document() {
        let raw = sample_doc("2099-01-01T00:00:00+00:00");
        let doc = ImageListDocument::parse(&serde_json::to_vec(&raw).unwrap()).expect("valid doc");
        assert_eq!(doc.uuid, "list-1");
        assert!(doc.images.is_empty());
    }

    #[test]
    fn missing_top_level_key_fails() {
        let raw = json!({"not-a-list": {}});
        let err = ImageListDocument::parse(&serde_json::to_vec(&raw).unwrap()).unwrap_err();
        assert!(matches!(
            err,
            DocumentError::MissingMandatoryField("hv:imagelist")
        ));
    }
}
