use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrustError {
    #[error("cannot load trust store from {path}: {source}")]
    CannotLoadTrustStore {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("trust store at {0} contains no CA certificates")]
    EmptyTrustStore(String),
    #[error("could not validate SMIME message: {0}")]
    SMIMEValidationError(String),
    #[error("no certificates found in SMIME message")]
    NoCertificatesFound,
    #[error("cannot build image-download CA bundle from {path}: {source}")]
    CannotBuildDownloadClient {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    #[error(transparent)]
    OpenSsl(#[from] openssl::error::ErrorStack),
}
