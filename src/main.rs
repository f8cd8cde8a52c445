use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_grpc::{shutdown_signal, DepotServer};
use depot_core::{Config, FileStorage};

/// Main entry point for the depot file service
///
/// Resolves configuration, makes sure the storage directory exists, then serves the gRPC
/// file service until Ctrl-C or SIGTERM. In-flight calls get the configured shutdown
/// timeout to drain before the server is stopped forcibly.
///
/// # Environment Variables
/// - `DEPOT_CONFIG`: optional YAML config file
/// - `DEPOT_HOST` / `DEPOT_PORT`: listen address (default: "0.0.0.0:1337")
/// - `DEPOT_STORAGE_PATH`: directory holding stored files (default: "./storage")
/// - `DEPOT_UPLOAD_DOWNLOAD_LIMIT`: concurrent uploads and downloads (default: 10)
/// - `DEPOT_LIST_LIMIT`: concurrent listings (default: 100)
/// - `DEPOT_SHUTDOWN_TIMEOUT_SECS`: drain time on shutdown (default: 5)
/// - `DEPOT_ENABLE_REFLECTION`: expose gRPC reflection (default: false)
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("depot_run=info".parse()?)
                .add_directive("depot_core=info".parse()?)
                .add_directive("api_grpc=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let storage = FileStorage::new(config.storage_path())?;
    let addr = config.listen_addr()?;

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("++ Starting depot gRPC on {}", listener.local_addr()?);
    tracing::info!("++ Storing files in {}", storage.root().display());

    DepotServer::from_config(&config, storage)
        .serve(listener, shutdown_signal())
        .await
}
