use std::path::PathBuf;
use thiserror::Error;

/// Failures while loading or validating the overlay configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error while reading config `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// A `policy.system_keys` entry that does not start with a predefined root.
    #[error("Unrecognised registry path `{0}`")]
    KeyPath(String),

    #[error("Validation error: {0}")]
    Validation(String),
}
