//! Translation from core errors to gRPC statuses, and deadline extraction.

use depot_core::{AdmissionError, StorageError};
use std::time::Duration;
use tonic::metadata::MetadataMap;
use tonic::Status;

const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

/// Maps a storage failure to the status returned to the client.
///
/// Missing files get a generic message so no server path leaks out.
pub fn storage_status(err: StorageError) -> Status {
    match err {
        StorageError::NotFound => Status::not_found("file not found"),
        StorageError::InvalidFilename(name) => {
            Status::invalid_argument(format!("invalid filename: {name:?}"))
        }
        StorageError::Io(e) => Status::internal(e.to_string()),
        other => Status::internal(other.to_string()),
    }
}

pub fn admission_status(err: AdmissionError) -> Status {
    match err {
        AdmissionError::Canceled { .. } => Status::cancelled(err.to_string()),
        AdmissionError::DeadlineExceeded { .. } => Status::deadline_exceeded(err.to_string()),
        AdmissionError::Closed { .. } => Status::unavailable(err.to_string()),
    }
}

/// Reads the caller's deadline from the `grpc-timeout` request header, if any.
pub fn request_deadline(metadata: &MetadataMap) -> Option<Duration> {
    let value = metadata.get(GRPC_TIMEOUT_HEADER)?.to_str().ok()?;
    parse_grpc_timeout(value)
}

/// Parses a `grpc-timeout` value: up to eight ASCII digits followed by a unit.
fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    if !value.is_ascii() || value.len() < 2 || value.len() > 9 {
        return None;
    }

    let (digits, unit) = value.split_at(value.len() - 1);
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount: u64 = digits.parse().ok()?;

    let duration = match unit {
        "H" => Duration::from_secs(amount * 60 * 60),
        "M" => Duration::from_secs(amount * 60),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return None,
    };
    Some(duration)
}
