//! Descriptor sources.

use super::{validate_unique_ids, ConfigError, DescriptorSource, EndpointDefaults, EndpointDescriptor, EndpointFile};

use std::path::{Path, PathBuf};

/// Loads descriptors from a JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
    fallback: EndpointDefaults,
}

impl JsonFileSource {
    pub fn new<P: AsRef<Path>>(path: P, fallback: EndpointDefaults) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            fallback,
        }
    }

    /// Parse descriptors from a JSON document.
    pub fn parse(
        path: &Path,
        contents: &str,
        fallback: &EndpointDefaults,
    ) -> Result<Vec<EndpointDescriptor>, ConfigError> {
        let file: EndpointFile = serde_json::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let defaults = file.defaults(fallback);
        let descriptors = file
            .endpoints
            .into_iter()
            .map(|raw| EndpointDescriptor::resolve(raw, &defaults))
            .collect::<Result<Vec<_>, _>>()?;

        validate_unique_ids(&descriptors)?;
        Ok(descriptors)
    }
}

impl DescriptorSource for JsonFileSource {
    fn load(&self) -> Result<Vec<EndpointDescriptor>, ConfigError> {
        let contents = std::fs::read_to_string(&self.path).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })?;

        let descriptors = Self::parse(&self.path, &contents, &self.fallback)?;
        tracing::info!(
            "Loaded configuration with {} endpoints from {}",
            descriptors.len(),
            self.path.display()
        );
        Ok(descriptors)
    }
}

/// A fixed, already-resolved descriptor set.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    descriptors: Vec<EndpointDescriptor>,
}

#[cfg(test)]
impl StaticSource {
    pub fn new(descriptors: Vec<EndpointDescriptor>) -> Self {
        Self { descriptors }
    }
}

#[cfg(test)]
impl DescriptorSource for StaticSource {
    fn load(&self) -> Result<Vec<EndpointDescriptor>, ConfigError> {
        validate_unique_ids(&self.descriptors)?;
        Ok(self.descriptors.clone())
    }
}
