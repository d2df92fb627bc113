//! OVA/OVF extraction: mapping a disk-format URI found in an OVF descriptor
//! to a concrete disk format, and pulling the referenced disk file out of
//! the surrounding tar archive.

use std::collections::HashMap;
use std::io::Read;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OvfError {
    #[error("not a valid tar file")]
    NotATarFile,
    #[error("cannot find a .ovf descriptor in archive")]
    MissingDescriptor,
    #[error("cannot parse OVF descriptor: {0}")]
    InvalidXml(#[from] roxmltree::Error),
    #[error("OVF descriptor has no Disk element")]
    MissingDisk,
    #[error("disk element has no format attribute")]
    MissingFormat,
    #[error("unknown OVF disk format: {0}")]
    UnknownFormat(String),
    #[error("disk references unknown file id: {0}")]
    UnknownFileRef(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The disk-format URIs this system recognizes, mirroring the handful of
/// formats that grid image lists actually publish.
fn known_format(format_url: &str) -> Option<&'static str> {
    match format_url {
        "http://www.vmware.com/interfaces/specifications/vmdk.html" => Some("vmdk"),
        "https://people.gnome.org/~markmc/qcow-image-format.html" => Some("qcow"),
        _ => None,
    }
}

/// Returns the raw bytes of the first `*.ovf` descriptor found in an OVA tar
/// archive.
pub fn extract_descriptor(ova_path: &std::path::Path) -> Result<Vec<u8>, OvfError> {
    let file = std::fs::File::open(ova_path)?;
    let mut archive = tar::Archive::new(file);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_path_buf();
        if path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("ovf"))
            .unwrap_or(false)
        {
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf)?;
            return Ok(buf);
        }
    }
    Err(OvfError::MissingDescriptor)
}

/// Parses an OVF descriptor and returns `(disk_format, referenced_file_href)`.
pub fn disk_reference(ovf_xml: &[u8]) -> Result<(String, String), OvfError> {
    let text = std::str::from_utf8(ovf_xml).unwrap_or_default();
    let doc = roxmltree::Document::parse(text)?;
    let root = doc.root_element();

    let mut files: HashMap<String, String> = HashMap::new();
    for file in root
        .descendants()
        .filter(|n| n.has_tag_name("File") && n.parent().map(|p| p.has_tag_name("References")).unwrap_or(false))
    {
        if let (Some(id), Some(href)) = (file.attribute("id"), file.attribute("href")) {
            files.insert(id.to_string(), href.to_string());
        }
    }

    let disk = root
        .descendants()
        .find(|n| n.has_tag_name("Disk") && n.parent().map(|p| p.has_tag_name("DiskSection")).unwrap_or(false))
        .ok_or(OvfError::MissingDisk)?;

    let format_attr = disk.attribute("format").ok_or(OvfError::MissingFormat)?;
    let format_url = format_attr.split('#').next().unwrap_or(format_attr);
    let disk_format = known_format(format_url)
        .ok_or_else(|| OvfError::UnknownFormat(format_url.to_string()))?;

    let file_ref = disk.attribute("fileRef").ok_or(OvfError::MissingDisk)?;
    let href = files
        .get(file_ref)
        .ok_or_else(|| OvfError::UnknownFileRef(file_ref.to_string()))?;

    Ok((disk_format.to_string(), href.clone()))
}

/// Extracts a named file from an OVA tar archive, returning its raw bytes.
pub fn extract_file(ova_path: &std::path::Path, filename: &str) -> Result<Vec<u8>, OvfError> {
    let file = std::fs::File::open(ova_path)?;
    let mut archive = tar::Archive::new(file);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_path_buf();
        if path.to_string_lossy() == filename {
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf)?;
            return Ok(buf);
        }
    }
    Err(OvfError::UnknownFileRef(filename.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_OVF: &str = r#"<?xml version="1.0"?>
<Envelope xmlns:ovf="http://schemas.dmtf.org/ovf/envelope/1">
  <ovf:References>
    <ovf:File ovf:id="file1" ovf:href="disk1.vmdk"/>
  </ovf:References>
  <ovf:DiskSection>
    <ovf:Disk ovf:fileRef="file1" ovf:format="http://www.vmware.com/interfaces/specifications/vmdk.html"/>
  </ovf:DiskSection>
</Envelope>"#;

    #[test]
    fn resolves_known_vmdk_format() {
        let (format, href) = disk_reference(SAMPLE_OVF.as_bytes()).expect("parse ok");
        assert_eq!(format, "vmdk");
        assert_eq!(href, "disk1.vmdk");
    }

    #[test]
    fn rejects_unknown_format() {
        let bad = SAMPLE_OVF.replace("vmdk.html", "unknown.html");
        let err = disk_reference(bad.as_bytes()).unwrap_err();
        assert!(matches!(err, OvfError::UnknownFormat(_)));
    }
}
