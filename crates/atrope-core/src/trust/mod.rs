//! CA trust store and SMIME/PKCS#7 signature verification.

pub mod errors;

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use foreign_types::{ForeignType, ForeignTypeRef};
use openssl::pkcs7::{Pkcs7, Pkcs7Flags};
use openssl::stack::Stack;
use openssl::x509::store::{X509Store, X509StoreBuilder};
use openssl::x509::{X509NameRef, X509};
use tracing::debug;

use errors::TrustError;

/// The X.509 identity that actually produced a signature, normalized to a
/// `/`-separated representation so it can be compared against the endorser
/// fields found inside the signed document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signer {
    pub dn: String,
    pub ca: String,
}

impl Signer {
    fn from_certificate(cert: &X509) -> Result<Self, TrustError> {
        Ok(Signer {
            dn: format_name(cert.subject_name())?,
            ca: format_name(cert.issuer_name())?,
        })
    }
}

fn format_name(name: &X509NameRef) -> Result<String, TrustError> {
    let mut components = Vec::new();
    for entry in name.entries() {
        let key = entry.object().nid().short_name().unwrap_or("?");
        let value = entry
            .data()
            .as_utf8()
            .map_err(|e| TrustError::SMIMEValidationError(e.to_string()))?;
        components.push(format!("{key}={value}"));
    }
    Ok(format!("/{}", components.join("/")))
}

/// A read-only, once-built store of trusted certificate authorities.
pub struct TrustStore {
    store: X509Store,
    path: PathBuf,
    download_client: OnceLock<reqwest::Client>,
}

impl std::fmt::Debug for TrustStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustStore").field("path", &self.path).finish()
    }
}

impl TrustStore {
    /// Loads every `.0`/`.r0`/`.pem` certificate found directly under `ca_dir`.
    /// Fails at construction time rather than at verification time if the
    /// directory is empty or unreadable.
    pub fn load(ca_dir: &Path) -> Result<Self, TrustError> {
        let mut builder =
            X509StoreBuilder::new().map_err(|e| TrustError::SMIMEValidationError(e.to_string()))?;
        let mut loaded = 0usize;

        let entries = std::fs::read_dir(ca_dir).map_err(|e| TrustError::CannotLoadTrustStore {
            path: ca_dir.display().to_string(),
            source: e,
        })?;
        for entry in entries {
            let entry = entry.map_err(|e| TrustError::CannotLoadTrustStore {
                path: ca_dir.display().to_string(),
                source: e,
            })?;
            let path = entry.path();
            if !is_trust_anchor_file(&path) {
                continue;
            }
            let bytes = std::fs::read(&path).map_err(|e| TrustError::CannotLoadTrustStore {
                path: path.display().to_string(),
                source: e,
            })?;
            if let Ok(cert) = X509::from_pem(&bytes) {
                builder.add_cert(cert)?;
                loaded += 1;
            }
        }

        if loaded == 0 {
            return Err(TrustError::EmptyTrustStore(ca_dir.display().to_string()));
        }
        debug!(count = loaded, dir = %ca_dir.display(), "loaded trust store");

        Ok(TrustStore {
            store: builder.build(),
            path: ca_dir.to_path_buf(),
            download_client: OnceLock::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The CA bundle used for image downloads: the bundled default roots
    /// plus every `*.pem` file in the trust-store directory, since image
    /// URIs commonly sit behind grid CAs the OS default store doesn't know
    /// about. Built once per process and reused afterwards.
    pub fn download_client(&self) -> Result<&reqwest::Client, TrustError> {
        if let Some(client) = self.download_client.get() {
            return Ok(client);
        }

        let mut builder = reqwest::Client::builder();
        let entries =
            std::fs::read_dir(&self.path).map_err(|e| TrustError::CannotLoadTrustStore {
                path: self.path.display().to_string(),
                source: e,
            })?;
        for entry in entries {
            let entry = entry.map_err(|e| TrustError::CannotLoadTrustStore {
                path: self.path.display().to_string(),
                source: e,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("pem") {
                continue;
            }
            let bytes = std::fs::read(&path).map_err(|e| TrustError::CannotLoadTrustStore {
                path: path.display().to_string(),
                source: e,
            })?;
            if let Ok(cert) = reqwest::Certificate::from_pem(&bytes) {
                builder = builder.add_root_certificate(cert);
            }
        }

        let client = builder
            .build()
            .map_err(|e| TrustError::CannotBuildDownloadClient {
                path: self.path.display().to_string(),
                source: e,
            })?;
        // `set` losing a race to a concurrent caller is fine: both built
        // clients are equivalent, whichever wins is used from then on.
        let _ = self.download_client.set(client);
        Ok(self.download_client.get().expect("just set"))
    }

    /// Verifies `data` as an SMIME/PKCS#7 signed message and returns the
    /// signer identity together with the verified, enclosed payload.
    ///
    /// HEPiX image lists are signed as opaque (non-detached) PKCS7-mime,
    /// in which case `Pkcs7::from_smime` hands back `content = None` and
    /// the payload only comes out through `verify`'s own output buffer; a
    /// detached signature instead carries `content` separately and that is
    /// what must be passed in as `indata` and cross-checked afterwards.
    pub fn verify(&self, data: &[u8]) -> Result<(Signer, Vec<u8>), TrustError> {
        let (pkcs7, content) = Pkcs7::from_smime(data)?;

        let empty_certs = Stack::new().map_err(|e| TrustError::SMIMEValidationError(e.to_string()))?;
        let mut verified = Vec::new();
        pkcs7
            .verify(
                &empty_certs,
                &self.store,
                content.as_deref(),
                Some(&mut verified),
                Pkcs7Flags::empty(),
            )
            .map_err(|e| TrustError::SMIMEValidationError(e.to_string()))?;

        if let Some(content) = &content {
            if verified != *content {
                return Err(TrustError::SMIMEValidationError(
                    "verified payload does not match enclosed data".to_string(),
                ));
            }
        }

        let signer_cert = embedded_signer(&pkcs7)?;
        let signer = Signer::from_certificate(&signer_cert)?;

        Ok((signer, verified))
    }
}

/// `Pkcs7` does not expose the signer certificates bundled in an SMIME
/// message through the safe API, so this pulls the first one out via
/// `PKCS7_get0_signers` directly. The returned stack is `get0` (borrowed
/// from the PKCS7 structure): up-ref each cert before wrapping it as owned,
/// then free only the container.
fn embedded_signer(pkcs7: &Pkcs7) -> Result<X509, TrustError> {
    unsafe {
        let empty = openssl_sys::OPENSSL_sk_new_null();
        let raw = openssl_sys::PKCS7_get0_signers(pkcs7.as_ptr(), empty as *mut _, 0);
        openssl_sys::OPENSSL_sk_free(empty as *mut openssl_sys::OPENSSL_STACK);
        if raw.is_null() {
            return Err(TrustError::NoCertificatesFound);
        }

        let count = openssl_sys::OPENSSL_sk_num(raw as *const _);
        if count <= 0 {
            openssl_sys::OPENSSL_sk_free(raw as *mut openssl_sys::OPENSSL_STACK);
            return Err(TrustError::NoCertificatesFound);
        }

        let cert_ptr = openssl_sys::OPENSSL_sk_value(raw as *const _, 0) as *mut openssl_sys::X509;
        openssl_sys::X509_up_ref(cert_ptr);
        openssl_sys::OPENSSL_sk_free(raw as *mut openssl_sys::OPENSSL_STACK);

        Ok(X509::from_ptr(cert_ptr))
    }
}

fn is_trust_anchor_file(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some("0") | Some("pem") => true,
        _ => path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.ends_with(".r0"))
            .unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_directory_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = TrustStore::load(dir.path()).unwrap_err();
        assert!(matches!(err, TrustError::EmptyTrustStore(_)));
    }

    #[test]
    fn missing_directory_is_rejected() {
        let err = TrustStore::load(Path::new("/nonexistent/ca/dir")).unwrap_err();
        assert!(matches!(err, TrustError::CannotLoadTrustStore { .. }));
    }

    #[test]
    fn recognizes_trust_anchor_filenames() {
        assert!(is_trust_anchor_file(Path::new("/ca/1234abcd.0")));
        assert!(is_trust_anchor_file(Path::new("/ca/1234abcd.r0")));
        assert!(is_trust_anchor_file(Path::new("/ca/root.pem")));
        assert!(!is_trust_anchor_file(Path::new("/ca/README.md")));
    }
}
