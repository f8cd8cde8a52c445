//! # Depot Core
//!
//! Core of the depot file-transfer service.
//!
//! This crate contains the pieces with a resource-management contract:
//! - [`FileStorage`]: flat, directory-rooted storage with chunked reads and writes
//! - [`AdmissionController`]: two bounded gates that cap concurrent transfers and listings
//! - [`Config`]: startup configuration from defaults, YAML and environment
//!
//! **No API concerns**: gRPC servers, status codes and protobuf types belong in `api-grpc`
//! and `api-shared`.

pub mod admission;
pub mod config;
pub mod constants;
pub mod error;
pub mod storage;

pub use admission::{AdmissionController, Gate, Slot};
pub use config::{Config, Limits, ServerConfig};
pub use error::{
    AdmissionError, AdmissionResult, ConfigError, ConfigResult, StorageError, StorageResult,
};
pub use storage::{validate_filename, FileReader, FileStorage, FileWriter, StoredFile};
