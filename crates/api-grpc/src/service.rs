// Re-export the proto module from the shared `api-shared` crate so callers
// can reference `api_grpc::pb`.
pub use api_shared::pb;

use crate::session::{self, ChunkStream, WaitPolicy};
use crate::status::request_deadline;
use api_shared::pb::file_service_server::FileService;
use api_shared::pb::{
    DeleteFileRequest, DeleteFileResponse, DownloadFileRequest, ListFilesRequest,
    ListFilesResponse, UploadFileRequest, UploadFileResponse,
};
use depot_core::{AdmissionController, FileStorage};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tonic::metadata::MetadataMap;
use tonic::{Request, Response, Status, Streaming};

/// gRPC binding of the transfer sessions.
///
/// Uploads, downloads and deletes share the transfer gate; listings use the list gate.
#[derive(Clone, Debug)]
pub struct FileTransferService {
    storage: FileStorage,
    admission: AdmissionController,
    shutdown: Option<watch::Receiver<bool>>,
    force_stop: CancellationToken,
}

impl FileTransferService {
    pub fn new(storage: FileStorage, admission: AdmissionController) -> Self {
        Self {
            storage,
            admission,
            shutdown: None,
            force_stop: CancellationToken::new(),
        }
    }

    /// Calls still queued for a slot are cancelled once `shutdown` turns `true`. Admitted
    /// uploads and downloads are cut off once `force_stop` is cancelled.
    pub fn with_shutdown(
        mut self,
        shutdown: watch::Receiver<bool>,
        force_stop: CancellationToken,
    ) -> Self {
        self.shutdown = Some(shutdown);
        self.force_stop = force_stop;
        self
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    fn wait_policy(&self, metadata: &MetadataMap) -> WaitPolicy {
        WaitPolicy {
            deadline: request_deadline(metadata),
            shutdown: self.shutdown.clone(),
            force_stop: self.force_stop.clone(),
        }
    }
}

#[tonic::async_trait]
impl FileService for FileTransferService {
    async fn upload_file(
        &self,
        req: Request<Streaming<UploadFileRequest>>,
    ) -> Result<Response<UploadFileResponse>, Status> {
        let wait = self.wait_policy(req.metadata());
        let res = session::upload(
            &self.storage,
            self.admission.transfer(),
            wait,
            req.into_inner(),
        )
        .await?;
        Ok(Response::new(res))
    }

    type DownloadFileStream = ChunkStream;

    async fn download_file(
        &self,
        req: Request<DownloadFileRequest>,
    ) -> Result<Response<Self::DownloadFileStream>, Status> {
        let wait = self.wait_policy(req.metadata());
        let req = req.into_inner();
        let chunks = session::download(
            &self.storage,
            self.admission.transfer(),
            wait,
            &req.filename,
        )
        .await?;
        Ok(Response::new(chunks))
    }

    async fn list_files(
        &self,
        req: Request<ListFilesRequest>,
    ) -> Result<Response<ListFilesResponse>, Status> {
        let wait = self.wait_policy(req.metadata());
        let res = session::list(&self.storage, self.admission.list(), wait).await?;
        Ok(Response::new(res))
    }

    async fn delete_file(
        &self,
        req: Request<DeleteFileRequest>,
    ) -> Result<Response<DeleteFileResponse>, Status> {
        let wait = self.wait_policy(req.metadata());
        let req = req.into_inner();
        let res = session::delete(
            &self.storage,
            self.admission.transfer(),
            wait,
            &req.filename,
        )
        .await?;
        Ok(Response::new(res))
    }
}
