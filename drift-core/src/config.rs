//! Configuration knobs for the reconciliation core.

use serde::Deserialize;

use crate::error::Result;

/// Hash worker settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HashConfig {
    /// Read buffer size used when streaming file content through the hasher.
    pub read_buffer_bytes: usize,
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            read_buffer_bytes: 64 * 1024,
        }
    }
}

/// Top-level configuration for the core, deserializable from any `config`
/// source. All fields default sensibly so an empty source is valid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub hash: HashConfig,
}

impl CoreConfig {
    /// Load from the environment: `DRIFT__HASH__READ_BUFFER_BYTES=...`
    /// overrides the default.
    pub fn from_env() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("DRIFT")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}
