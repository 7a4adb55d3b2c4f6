//! Endpoint descriptors and the sources that supply them.
//!
//! Descriptors are loaded once at startup, validated, and then shared
//! read-only for the lifetime of the process.

mod loader;
mod models;

pub use loader::*;
pub use models::*;

use std::collections::HashSet;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration error types. All of them are fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("duplicate endpoint id: {0}")]
    DuplicateId(String),
    #[error("endpoint {id}: invalid url {url:?}: {reason}")]
    InvalidUrl { id: String, url: String, reason: String },
    #[error("endpoint {id}: invalid method {method:?}")]
    InvalidMethod { id: String, method: String },
    #[error("endpoint {id}: invalid header {name:?}")]
    InvalidHeader { id: String, name: String },
    #[error("endpoint {id}: {field} must be a positive number of seconds up to one year, got {value}")]
    InvalidDuration {
        id: String,
        field: &'static str,
        value: f64,
    },
    #[error("endpoint {id}: {reason}")]
    InvalidStatusCodes { id: String, reason: String },
}

/// Supplies endpoint descriptors at startup.
pub trait DescriptorSource: Send + Sync {
    fn load(&self) -> Result<Vec<EndpointDescriptor>, ConfigError>;
}

/// Reject a descriptor set containing the same id twice.
///
/// Disabled descriptors take part in the check.
pub fn validate_unique_ids(descriptors: &[EndpointDescriptor]) -> Result<(), ConfigError> {
    let mut seen = HashSet::with_capacity(descriptors.len());
    for descriptor in descriptors {
        if !seen.insert(descriptor.id.as_str()) {
            return Err(ConfigError::DuplicateId(descriptor.id.clone()));
        }
    }
    Ok(())
}
