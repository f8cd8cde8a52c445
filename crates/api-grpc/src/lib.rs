//! # API gRPC
//!
//! gRPC server implementation for the depot file service.
//!
//! Handles:
//! - Transfer sessions: admission, chunked upload/download, listing, delete
//! - gRPC-specific concerns (status mapping, `grpc-timeout` deadlines, tonic integration)
//! - Server lifecycle with graceful drain and forced stop
//!
//! Uses `api-shared` for the generated protobuf types and `depot-core` for storage and
//! admission control.

#![warn(rust_2018_idioms)]

pub use server::{shutdown_signal, DepotServer};
pub use service::{pb, FileTransferService};

pub mod server;
pub mod service;
pub mod session;
pub mod status;
