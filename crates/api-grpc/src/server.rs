//! Server lifecycle: bind the service, serve, drain on shutdown, force-stop on timeout.

use crate::service::FileTransferService;
use api_shared::pb::file_service_server::FileServiceServer;
use api_shared::FILE_DESCRIPTOR_SET;
use depot_core::{AdmissionController, Config, FileStorage};
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tonic::transport::server::TcpIncoming;
use tonic::transport::Server;
use tonic_reflection::server::Builder;

pub struct DepotServer {
    service: FileTransferService,
    enable_reflection: bool,
    shutdown_timeout: Duration,
}

impl DepotServer {
    pub fn new(storage: FileStorage, admission: AdmissionController) -> Self {
        Self {
            service: FileTransferService::new(storage, admission),
            enable_reflection: false,
            shutdown_timeout: Duration::from_secs(depot_core::constants::DEFAULT_SHUTDOWN_TIMEOUT_SECS),
        }
    }

    pub fn from_config(config: &Config, storage: FileStorage) -> Self {
        Self::new(storage, AdmissionController::from_limits(&config.limits))
            .with_reflection(config.server.enable_reflection)
            .with_shutdown_timeout(config.shutdown_timeout())
    }

    pub fn with_reflection(mut self, enabled: bool) -> Self {
        self.enable_reflection = enabled;
        self
    }

    /// How long in-flight calls may take to finish once shutdown starts.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Serves on `listener` until `shutdown` resolves.
    ///
    /// Shutdown stops accepting new calls, cancels calls still queued for a slot, and waits
    /// for the rest to finish. Once the shutdown timeout runs out, uploads and downloads
    /// still running fail with `UNAVAILABLE` at their next chunk and release their slots,
    /// and the accept loop is aborted. Connections are served on their own tasks, so a
    /// peer that has stopped reading a download keeps its stream until the runtime exits.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let force_stop = CancellationToken::new();
        let service = self
            .service
            .with_shutdown(stop_rx.clone(), force_stop.clone());

        let mut router = Server::builder().add_service(FileServiceServer::new(service));

        if self.enable_reflection {
            let reflection_service = Builder::configure()
                .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
                .build_v1()?;
            router = router.add_service(reflection_service);
            tracing::info!("gRPC server reflection enabled");
        } else {
            tracing::info!("gRPC server reflection disabled");
        }

        let incoming =
            TcpIncoming::from_listener(listener, true, None).map_err(|e| anyhow::anyhow!(e))?;

        let mut drain = stop_rx;
        let mut server = tokio::spawn(router.serve_with_incoming_shutdown(incoming, async move {
            let _ = drain.wait_for(|stopping| *stopping).await;
        }));

        tokio::select! {
            joined = &mut server => {
                joined??;
                tracing::warn!("server exited without a shutdown signal");
                return Ok(());
            }
            () = shutdown => {}
        }

        tracing::info!("server is shutting down...");
        let _ = stop_tx.send(true);

        match tokio::time::timeout(self.shutdown_timeout, &mut server).await {
            Ok(joined) => {
                joined??;
                tracing::info!("server stopped gracefully");
            }
            Err(_) => {
                tracing::warn!("graceful shutdown timed out, forcing stop");
                force_stop.cancel();
                server.abort();
            }
        }

        Ok(())
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
