//! Transfer sessions: one upload, download, listing or delete from admission to release.
//!
//! Every session takes a slot from its gate before touching storage and keeps it until the
//! session ends. The slot is an RAII guard, so it goes back to the gate on every exit path,
//! including the handler future being dropped when the client cancels.
//!
//! Uploads and downloads also watch a force-stop token. Once it fires they fail at the next
//! chunk boundary with `UNAVAILABLE`, so a server that has run out of drain time does not
//! leave transfers holding slots behind it. Bytes already written stay on disk.
//!
//! Nothing is retried. A failed write, read or send fails the whole call.

use crate::status::{admission_status, storage_status};
use api_shared::pb::{
    DeleteFileResponse, DownloadFileResponse, FileInfo, ListFilesResponse, UploadFileRequest,
    UploadFileResponse,
};
use depot_core::constants::CHUNK_SIZE;
use depot_core::{FileReader, FileStorage, Gate, Slot, StoredFile};
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tonic::Status;

/// Outbound chunks of a download.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<DownloadFileResponse, Status>> + Send>>;

/// How long a call may queue for its slot, and when an admitted call must stop.
#[derive(Clone, Debug, Default)]
pub struct WaitPolicy {
    /// Caller deadline. `None` waits indefinitely.
    pub deadline: Option<Duration>,
    /// Flips to `true` when the server starts draining; queued calls then give up.
    pub shutdown: Option<watch::Receiver<bool>>,
    /// Cancelled when the drain timeout runs out; admitted transfers then give up too.
    pub force_stop: CancellationToken,
}

fn force_stopped() -> Status {
    Status::unavailable("server is shutting down")
}

async fn take_slot(gate: &Gate, wait: WaitPolicy) -> Result<Slot, Status> {
    let WaitPolicy {
        deadline, shutdown, ..
    } = wait;
    let stopping = async move {
        if let Some(mut shutdown) = shutdown {
            let sender_gone = shutdown.wait_for(|stopping| *stopping).await.is_err();
            if !sender_gone {
                return;
            }
        }
        std::future::pending::<()>().await
    };

    gate.admit(deadline, stopping)
        .await
        .map_err(admission_status)
}

/// Receives an upload stream and persists it.
///
/// The first message names the target file; later messages only contribute chunks. If the
/// stream fails part way the bytes received so far stay on disk.
#[allow(clippy::result_large_err)]
pub async fn upload<S>(
    storage: &FileStorage,
    gate: &Gate,
    wait: WaitPolicy,
    messages: S,
) -> Result<UploadFileResponse, Status>
where
    S: Stream<Item = Result<UploadFileRequest, Status>>,
{
    let force_stop = wait.force_stop.clone();
    let _slot = take_slot(gate, wait).await?;
    let mut messages = std::pin::pin!(messages);

    let first = tokio::select! {
        biased;
        () = force_stop.cancelled() => return Err(force_stopped()),
        first = messages.next() => first,
    };
    let first = first
        .transpose()?
        .ok_or_else(|| Status::invalid_argument("upload stream carried no messages"))?;

    let mut writer = storage
        .create(&first.filename)
        .await
        .map_err(storage_status)?;
    tracing::info!(filename = %first.filename, "upload started");

    let received = async {
        writer.write_chunk(&first.chunk).await.map_err(storage_status)?;
        while let Some(message) = messages.next().await {
            let message = message?;
            writer
                .write_chunk(&message.chunk)
                .await
                .map_err(storage_status)?;
        }
        Ok::<_, Status>(())
    };
    let received = tokio::select! {
        biased;
        () = force_stop.cancelled() => Err(force_stopped()),
        received = received => received,
    };

    if let Err(status) = received {
        let written = writer.written();
        if let Err(e) = writer.close().await {
            tracing::warn!(filename = %first.filename, "closing partial upload failed: {}", e);
        }
        tracing::warn!(
            filename = %first.filename,
            written,
            "upload failed, partial file left in place: {}",
            status.message()
        );
        return Err(status);
    }

    let size = writer.close().await.map_err(storage_status)?;
    tracing::info!(filename = %first.filename, size, "upload finished");

    Ok(UploadFileResponse {
        message: format!("File {} uploaded successfully ({} bytes)", first.filename, size),
    })
}

struct DownloadState {
    filename: String,
    reader: FileReader,
    sent: u64,
    force_stop: CancellationToken,
    _slot: Slot,
}

/// Opens `filename` and returns a stream of its chunks.
///
/// The slot travels with the stream and is released once the stream is exhausted, fails, or
/// is dropped. A missing file releases the slot before the error is returned.
#[allow(clippy::result_large_err)]
pub async fn download(
    storage: &FileStorage,
    gate: &Gate,
    wait: WaitPolicy,
    filename: &str,
) -> Result<ChunkStream, Status> {
    let force_stop = wait.force_stop.clone();
    let slot = take_slot(gate, wait).await?;
    let reader = storage.open(filename).await.map_err(storage_status)?;
    tracing::info!(filename, "download started");

    let state = DownloadState {
        filename: filename.to_string(),
        reader,
        sent: 0,
        force_stop,
        _slot: slot,
    };

    let chunks = futures::stream::try_unfold(state, |mut state| async move {
        if state.force_stop.is_cancelled() {
            tracing::warn!(filename = %state.filename, sent = state.sent, "download stopped by shutdown");
            return Err(force_stopped());
        }
        match state.reader.read_chunk(CHUNK_SIZE).await {
            Ok(Some(chunk)) => {
                state.sent += chunk.len() as u64;
                Ok(Some((DownloadFileResponse { chunk }, state)))
            }
            Ok(None) => {
                tracing::info!(filename = %state.filename, size = state.sent, "download finished");
                Ok(None)
            }
            Err(e) => {
                tracing::warn!(filename = %state.filename, sent = state.sent, "download failed: {}", e);
                Err(storage_status(e))
            }
        }
    });

    Ok(Box::pin(chunks))
}

#[allow(clippy::result_large_err)]
pub async fn list(
    storage: &FileStorage,
    gate: &Gate,
    wait: WaitPolicy,
) -> Result<ListFilesResponse, Status> {
    let _slot = take_slot(gate, wait).await?;
    let files = storage.list().await.map_err(storage_status)?;
    tracing::debug!(count = files.len(), "listed files");

    Ok(ListFilesResponse {
        files: files.iter().map(file_info).collect(),
    })
}

#[allow(clippy::result_large_err)]
pub async fn delete(
    storage: &FileStorage,
    gate: &Gate,
    wait: WaitPolicy,
    filename: &str,
) -> Result<DeleteFileResponse, Status> {
    let _slot = take_slot(gate, wait).await?;
    storage.delete(filename).await.map_err(storage_status)?;
    tracing::info!(filename, "file deleted");

    Ok(DeleteFileResponse {
        message: format!("File {} deleted successfully", filename),
    })
}

fn file_info(file: &StoredFile) -> FileInfo {
    FileInfo {
        filename: file.filename.clone(),
        created_at: file.created_at_rfc3339(),
        updated_at: file.updated_at_rfc3339(),
    }
}
