use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{EngineError, Result};

pub const DEFAULT_TERMINOLOGY_SERVER_URL: &str = "https://tx.ontoserver.csiro.au/fhir";

/// Hard cap on chained calculated-expression passes before the chain is
/// reported as circular.
pub const DEFAULT_MAX_CALCULATION_ITERATIONS: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub terminology_server_url: String,
    pub max_calculation_iterations: usize,
    pub cache_config: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of terminology-backed results kept between passes
    pub max_entries: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            terminology_server_url: DEFAULT_TERMINOLOGY_SERVER_URL.to_string(),
            max_calculation_iterations: DEFAULT_MAX_CALCULATION_ITERATIONS,
            cache_config: CacheConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_entries: 1000 }
    }
}

impl EngineConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_terminology_server_url(mut self, url: impl Into<String>) -> Self {
        self.terminology_server_url = url.into();
        self
    }

    pub fn with_max_calculation_iterations(mut self, iterations: usize) -> Self {
        self.max_calculation_iterations = iterations;
        self
    }

    pub fn with_cache_config(mut self, cache_config: CacheConfig) -> Self {
        self.cache_config = cache_config;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_calculation_iterations == 0 {
            return Err(EngineError::configuration(
                "max_calculation_iterations must be at least 1",
            ));
        }

        if url::Url::parse(&self.terminology_server_url).is_err() {
            return Err(EngineError::configuration(format!(
                "terminology_server_url is not a valid URL: {}",
                self.terminology_server_url
            )));
        }

        Ok(())
    }
}
