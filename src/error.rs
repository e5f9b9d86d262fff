use std::path::PathBuf;

use thiserror::Error;

/// A directory could not be listed. Fatal to one scan attempt only.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("photo directory does not exist: {0}")]
    Missing(PathBuf),

    #[error("photo path is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("photo directory is unreadable: {path}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ScanError {
    pub fn path(&self) -> &PathBuf {
        match self {
            Self::Missing(path) | Self::NotADirectory(path) => path,
            Self::Unreadable { path, .. } => path,
        }
    }
}

/// A single file could not be turned into a bitmap.
#[derive(Debug, Error)]
#[error("failed to decode {path}: {cause}")]
pub struct DecodeError {
    pub path: PathBuf,
    #[source]
    pub cause: image::ImageError,
}

/// A single source photo could not be imported. Recorded in the report; the
/// pass continues with the next file.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("failed to fingerprint {path}")]
    Fingerprint {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("failed to encode {path}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to write {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Startup configuration problems. Never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no configuration file found (searched: {searched})")]
    NotFound { searched: String },

    #[error("failed to read configuration file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration file {path}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to parse configuration file {path}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Library error type for directory-level operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to prepare serving directory {path}")]
    ServingDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The import record could not be written back.
    #[error("failed to persist import record {path}")]
    Record {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
