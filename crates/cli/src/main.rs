use anyhow::Context;
use api_shared::pb::file_service_client::FileServiceClient;
use api_shared::pb::{DeleteFileRequest, DownloadFileRequest, ListFilesRequest, UploadFileRequest};
use clap::{Parser, Subcommand};
use depot_core::constants::CHUNK_SIZE;
use futures::channel::mpsc;
use futures::SinkExt;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tonic::transport::Channel;

#[derive(Parser)]
#[command(name = "depot")]
#[command(about = "Depot file service CLI")]
struct Cli {
    /// Server address
    #[arg(long, default_value = "http://127.0.0.1:1337")]
    addr: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a local file
    Upload {
        /// File to upload
        path: PathBuf,
        /// Name to store it under (defaults to the file's own name)
        #[arg(long)]
        name: Option<String>,
    },
    /// Download a stored file
    Download {
        /// Stored filename
        name: String,
        /// Where to write it (defaults to the stored name in the current directory)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// List stored files
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Delete a stored file
    Delete {
        /// Stored filename
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        println!("Use 'depot --help' for commands");
        return Ok(());
    };

    let mut client = FileServiceClient::connect(cli.addr.clone())
        .await
        .with_context(|| format!("failed to connect to {}", cli.addr))?;

    match command {
        Commands::Upload { path, name } => {
            let name = match name {
                Some(name) => name,
                None => path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_string)
                    .context("cannot derive a filename from the path, use --name")?,
            };
            let message = upload(&mut client, &path, name).await?;
            println!("{}", message);
        }
        Commands::Download { name, output } => {
            let output = output.unwrap_or_else(|| PathBuf::from(&name));
            let size = download(&mut client, &name, &output).await?;
            println!("Downloaded {} ({} bytes) to {}", name, size, output.display());
        }
        Commands::List { json } => {
            let res = client.list_files(ListFilesRequest {}).await?.into_inner();
            if json {
                println!("{}", serde_json::to_string_pretty(&res)?);
            } else if res.files.is_empty() {
                println!("No files found.");
            } else {
                for file in res.files {
                    println!(
                        "Name: {}, Created: {}, Updated: {}",
                        file.filename, file.created_at, file.updated_at
                    );
                }
            }
        }
        Commands::Delete { name } => {
            let res = client
                .delete_file(DeleteFileRequest { filename: name })
                .await?
                .into_inner();
            println!("{}", res.message);
        }
    }

    Ok(())
}

async fn upload(
    client: &mut FileServiceClient<Channel>,
    path: &Path,
    name: String,
) -> anyhow::Result<String> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    let (tx, rx) = mpsc::channel(8);

    // If reading fails the call is dropped, which cancels the upload on the server.
    let (_, res) = tokio::try_join!(send_chunks(file, name, tx), async {
        client.upload_file(rx).await.map_err(anyhow::Error::from)
    })?;

    Ok(res.into_inner().message)
}

async fn send_chunks(
    mut file: tokio::fs::File,
    name: String,
    mut tx: mpsc::Sender<UploadFileRequest>,
) -> anyhow::Result<u64> {
    let mut filename = name;
    let mut total = 0u64;

    loop {
        let mut chunk = vec![0u8; CHUNK_SIZE];
        let n = file.read(&mut chunk).await.context("failed to read file")?;
        chunk.truncate(n);

        // The first message always goes out so that empty files still name their target.
        let first = !filename.is_empty();
        if n == 0 && !first {
            break;
        }

        tx.send(UploadFileRequest {
            filename: std::mem::take(&mut filename),
            chunk,
        })
        .await?;
        total += n as u64;

        if n == 0 {
            break;
        }
    }

    Ok(total)
}

async fn download(
    client: &mut FileServiceClient<Channel>,
    name: &str,
    output: &Path,
) -> anyhow::Result<u64> {
    let mut stream = client
        .download_file(DownloadFileRequest {
            filename: name.to_string(),
        })
        .await?
        .into_inner();

    let file = tokio::fs::File::create(output)
        .await
        .with_context(|| format!("failed to create {}", output.display()))?;
    let mut writer = BufWriter::new(file);
    let mut size = 0u64;

    while let Some(message) = stream.message().await? {
        writer.write_all(&message.chunk).await?;
        size += message.chunk.len() as u64;
    }
    writer.flush().await?;

    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_upload_with_name() {
        let cli = Cli::try_parse_from(["depot", "upload", "notes.txt", "--name", "stored.txt"])
            .unwrap();
        assert_eq!(cli.addr, "http://127.0.0.1:1337");
        match cli.command {
            Some(Commands::Upload { path, name }) => {
                assert_eq!(path, PathBuf::from("notes.txt"));
                assert_eq!(name.as_deref(), Some("stored.txt"));
            }
            _ => panic!("expected upload command"),
        }
    }

    #[test]
    fn test_parse_download_output() {
        let cli = Cli::try_parse_from([
            "depot",
            "--addr",
            "http://files:9000",
            "download",
            "a.bin",
            "-o",
            "/tmp/a.bin",
        ])
        .unwrap();
        assert_eq!(cli.addr, "http://files:9000");
        assert!(matches!(
            cli.command,
            Some(Commands::Download { ref name, ref output })
                if name == "a.bin" && output.as_deref() == Some(Path::new("/tmp/a.bin"))
        ));
    }
}
