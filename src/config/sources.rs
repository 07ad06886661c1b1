use super::models::Config;
use config::{ConfigError, Environment, File, FileFormat};
use std::path::{Path, PathBuf};

/// Names the configuration file to read
const PATH_VAR: &str = "MULTIWRITER_CONFIG";
const DEFAULT_PATH: &str = "config/multiwriter.toml";

/// `MULTIWRITER__WRITER__CACHE_CAPACITY` overrides `writer.cache_capacity`
const ENV_PREFIX: &str = "MULTIWRITER";
const ENV_SEPARATOR: &str = "__";

/// Defaults, then the TOML file named by `MULTIWRITER_CONFIG`, then the environment
///
/// A `.env` file in the working directory is folded into the environment first.
pub fn load() -> Result<Config, ConfigError> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            tracing::warn!(error = %e, "Ignoring unreadable .env file");
        }
    }

    let path = std::env::var_os(PATH_VAR).map_or_else(|| PathBuf::from(DEFAULT_PATH), PathBuf::from);
    load_from_sources(path)
}

/// Same layering as [`load`] with an explicit file path
pub fn load_from_sources(path: PathBuf) -> Result<Config, ConfigError> {
    let file_present = path.is_file();
    log_file_choice(&path, file_present);

    config::Config::builder()
        .add_source(
            File::from(path)
                .format(FileFormat::Toml)
                .required(file_present),
        )
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator(ENV_SEPARATOR)
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}

fn log_file_choice(path: &Path, present: bool) {
    if present {
        tracing::info!(path = %path.display(), "Reading configuration file");
    } else {
        tracing::warn!(path = %path.display(), "No configuration file, using defaults and environment");
    }
}
