use thiserror::Error;

pub type AtropeResult<T> = std::result::Result<T, AtropeError>;

/// Top-level error aggregating every module's domain error, mirroring how a
/// single list or image failure is reported up to the orchestrator without
/// losing the originating detail.
#[derive(Error, Debug)]
pub enum AtropeError {
    #[error(transparent)]
    Trust(#[from] crate::trust::errors::TrustError),
    #[error(transparent)]
    Document(#[from] crate::document::DocumentError),
    #[error(transparent)]
    Image(#[from] crate::image::ImageError),
    #[error(transparent)]
    Source(#[from] crate::source::SourceError),
    #[error(transparent)]
    Cache(#[from] crate::cache::CacheError),
    #[error(transparent)]
    Dispatch(#[from] crate::dispatch::DispatchError),
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
    #[error(transparent)]
    Ovf(#[from] crate::ovf::OvfError),
    #[error("duplicated image list: {0}")]
    DuplicatedImageList(String),
    #[error("image list not found: {0}")]
    ListNotFound(String),
}
