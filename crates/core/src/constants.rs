//! Constants used throughout the depot core crate.
//!
//! Defaults here apply when neither the YAML config file nor the environment supplies a value.

/// Default directory for stored files when no explicit directory is configured.
pub const DEFAULT_STORAGE_PATH: &str = "./storage";

/// Default listen host. The service binds every interface unless told otherwise.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default listen port.
pub const DEFAULT_PORT: u16 = 1337;

/// Default capacity of the gate shared by uploads, downloads and deletes.
pub const DEFAULT_TRANSFER_LIMIT: usize = 10;

/// Default capacity of the gate used by listing.
pub const DEFAULT_LIST_LIMIT: usize = 100;

/// Default time allowed for in-flight calls to drain after a shutdown signal.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 5;

/// Size of one streamed chunk, in bytes.
pub const CHUNK_SIZE: usize = 1024;

/// Name of the gate bounding uploads, downloads and deletes.
pub const TRANSFER_GATE: &str = "transfer";

/// Name of the gate bounding listings.
pub const LIST_GATE: &str = "list";
