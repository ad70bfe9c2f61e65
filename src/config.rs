//! Import configuration.
//!
//! The importer consumes, but does not own, a small configuration record.
//! It can be loaded from a TOML file; unknown keys are rejected so a typo
//! does not silently fall back to a default.

use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// Options recognized by the import pipeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImportConfig {
    /// Introns shorter than this are masked with a `too_short_intron`
    /// error feature by the resolver.
    pub minimum_intron_length: u64,
    /// Buffered rows beyond this trigger a database flush at the next
    /// coordinate boundary.
    pub flush_row_threshold: usize,
}

impl Default for ImportConfig {
    fn default() -> ImportConfig {
        ImportConfig {
            minimum_intron_length: 20,
            flush_row_threshold: 10_000,
        }
    }
}

impl ImportConfig {
    /// Loads the configuration from a TOML file. A missing file is not an
    /// error: the defaults are used and a note is logged.
    pub fn from_toml_file<T: AsRef<Path>>(path: T) -> anyhow::Result<ImportConfig> {
        let path = path.as_ref();
        if !path.exists() {
            info!(
                "no config file found at {}; using default values",
                path.display()
            );
            return Ok(ImportConfig::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading config file {}", path.display()))?;
        let config: ImportConfig = toml::from_str(&raw)
            .with_context(|| format!("failed parsing config file {}", path.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ImportConfig::default();
        assert_eq!(config.minimum_intron_length, 20);
        assert_eq!(config.flush_row_threshold, 10_000);
    }

    #[test]
    fn test_parse_toml() {
        let config: ImportConfig = toml::from_str("minimum_intron_length = 35").unwrap();
        assert_eq!(config.minimum_intron_length, 35);
        // omitted keys keep their defaults
        assert_eq!(config.flush_row_threshold, 10_000);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let parsed: Result<ImportConfig, _> = toml::from_str("minimum_intron_legnth = 35");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = ImportConfig::from_toml_file("/no/such/config.toml").unwrap();
        assert_eq!(config.minimum_intron_length, 20);
    }
}
