//! # API Shared
//!
//! Protobuf contract for the depot file service.
//!
//! Contains:
//! - Protobuf-generated types (`pb` module), both server and client halves
//! - The encoded file-descriptor set used for gRPC reflection
//!
//! Used by `api-grpc` for the server and by `depot-cli` for the client.

// Re-export the generated protobuf module. The generated code will be placed
// into OUT_DIR at build time by the build script.
pub mod pb {
    tonic::include_proto!("depot.v1");
}

pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("proto_descriptor");

pub use pb::*;
