use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::{CompileError, Result};

/// What to do with a relationship whose endpoints cannot be resolved to a
/// node rendered in the same compile.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointPolicy {
    /// Abort the compile with [`CompileError::UnresolvedEndpoint`].
    #[default]
    Fail,
    /// Drop the relationship and log a warning.
    Skip,
}

/// Compiler tuning knobs.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Collapse relationship-only compiles into one batched statement.
    pub batch_relationships: bool,
    /// Handling of relationships with unresolved endpoints.
    pub endpoint_policy: EndpointPolicy,
    /// Upper bound on released identifiers kept for reuse.
    pub max_free_identifiers: usize,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            batch_relationships: true,
            endpoint_policy: EndpointPolicy::Fail,
            max_free_identifiers: 1024,
        }
    }
}

impl CompilerConfig {
    /// Fails on malformed input and never batches, so every intent renders
    /// individually.
    pub fn strict() -> Self {
        Self {
            batch_relationships: false,
            ..Self::default()
        }
    }

    /// Batches where possible and drops relationships it cannot resolve.
    pub fn lenient() -> Self {
        Self {
            endpoint_policy: EndpointPolicy::Skip,
            ..Self::default()
        }
    }

    /// Parses a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    /// Checks invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.max_free_identifiers == 0 {
            return Err(CompileError::InvalidConfig(
                "max_free_identifiers must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
