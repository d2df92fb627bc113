//! The endorser identity a list document declares for itself.

use serde::{Deserialize, Serialize};

use crate::document::DocumentError;

/// Raw `hv:x509` block as found inside a parsed list document.
#[derive(Debug, Deserialize)]
pub(crate) struct RawEndorser {
    #[serde(rename = "dc:creator")]
    pub creator: Option<String>,
    #[serde(rename = "hv:ca")]
    pub ca: Option<String>,
    #[serde(rename = "hv:dn")]
    pub dn: Option<String>,
    #[serde(rename = "hv:email")]
    pub email: Option<String>,
}

/// The natural/legal person who vouches for a list's contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endorser {
    pub name: String,
    pub dn: String,
    pub ca: String,
    pub email: String,
}

impl Endorser {
    pub(crate) fn from_raw(raw: RawEndorser) -> Result<Self, DocumentError> {
        Ok(Endorser {
            name: raw
                .creator
                .ok_or(DocumentError::MissingMandatoryField("dc:creator"))?,
            dn: raw.dn.ok_or(DocumentError::MissingMandatoryField("hv:dn"))?,
            ca: raw.ca.ok_or(DocumentError::MissingMandatoryField("hv:ca"))?,
            email: raw
                .email
                .ok_or(DocumentError::MissingMandatoryField("hv:email"))?,
        })
    }
}

/// Operator-configured expectation of who a list's endorser should be,
/// checked independently of the cryptographic signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedEndorser {
    pub dn: String,
    pub ca: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_field_is_reported_by_name() {
        let raw = RawEndorser {
            creator: Some("CESNET".to_string()),
            ca: Some("/O=CA".to_string()),
            dn: None,
            email: Some("ops@example.org".to_string()),
        };
        let err = Endorser::from_raw(raw).unwrap_err();
        assert!(matches!(err, DocumentError::MissingMandatoryField("hv:dn")));
    }

    #[test]
    fn complete_block_parses() {
        let raw = RawEndorser {
            creator: Some("CESNET".to_string()),
            ca: Some("/O=CA".to_string()),
            dn: Some("/O=Org/CN=Endorser".to_string()),
            email: Some("ops@example.org".to_string()),
        };
        let endorser = Endorser::from_raw(raw).expect("valid endorser");
        assert_eq!(endorser.name, "CESNET");
    }
}
