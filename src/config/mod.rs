//! Layered settings for the `multiwriter` binary
//!
//! Struct defaults are overridden by `config/multiwriter.toml` (or the file
//! named by `MULTIWRITER_CONFIG`), which is in turn overridden by
//! `MULTIWRITER__<SECTION>__<KEY>` environment variables such as
//! `MULTIWRITER__WRITER__COMPRESSION=true`.
//!
//! ```no_run
//! use multiwriter::config::Config;
//!
//! # fn main() -> Result<(), multiwriter::config::ConfigError> {
//! let config = Config::load()?;
//! let manager_config = config.manager_config();
//! # Ok(())
//! # }
//! ```

mod models;
mod sources;
mod validation;

pub use crate::humanize::ByteSize;
pub use models::{Config, RetryConfig, WriterConfig};
pub use validation::{ValidationError, validate_manager};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Read every source and validate the result
    pub fn load() -> Result<Self, ConfigError> {
        sources::load()?.validated()
    }

    pub fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        sources::load_from_sources(path)?.validated()
    }

    fn validated(self) -> Result<Self, ConfigError> {
        validate_manager(&self.manager_config())?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("multiwriter.toml");
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_partial_file_is_accepted() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[writer]\ncache_capacity = 3\n");

        let config = Config::load_from_path(path).unwrap();
        assert_eq!(config.manager_config().cache_capacity, 3);
    }

    #[test]
    fn test_zero_capacity_fails_validation() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[writer]\ncache_capacity = 0\n");

        let err = Config::load_from_path(path).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ValidationError(ValidationError::ZeroValue {
                field: "cache_capacity"
            })
        ));
    }

    #[test]
    fn test_wrong_type_is_a_load_error() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[writer]\ncache_capacity = \"lots\"\n");

        let err = Config::load_from_path(path).unwrap_err();
        assert!(matches!(err, ConfigError::LoadError(_)));
    }
}
