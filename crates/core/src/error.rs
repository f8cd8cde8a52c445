use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("failed to create storage directory {path}: {source}", path = path.display())]
    StorageDirCreation {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("storage root is not a directory: {0}")]
    NotADirectory(std::path::PathBuf),
    #[error("invalid filename: {0:?}")]
    InvalidFilename(String),
    #[error("file not found")]
    NotFound,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("wait for a {gate} slot was canceled")]
    Canceled { gate: &'static str },
    #[error("no {gate} slot became free within {timeout:?}")]
    DeadlineExceeded {
        gate: &'static str,
        timeout: Duration,
    },
    #[error("{gate} gate is closed")]
    Closed { gate: &'static str },
}

pub type AdmissionResult<T> = std::result::Result<T, AdmissionError>;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}", path = path.display())]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
