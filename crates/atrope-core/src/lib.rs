//! Core trusted-list-acquisition and cache-reconciliation pipeline: fetch a
//! signed HEPiX image list, verify it, check its endorser and expiry, pull
//! its subscribed images into a content-addressed cache, and hand valid
//! images off to a pluggable dispatcher.

pub mod cache;
pub mod config;
pub mod dispatch;
pub mod document;
pub mod endorser;
pub mod errors;
pub mod image;
pub mod manager;
pub mod ovf;
pub mod source;
pub mod trust;

pub use errors::{AtropeError, AtropeResult};
pub use manager::ListManager;
pub use source::{ListSource, ListSourceConfig};
