//! Flat, directory-rooted file storage with chunked reads and writes.
//!
//! Every stored file lives directly under the storage root and is identified only by its
//! base filename. There is no metadata store: the filesystem's own attributes are the
//! source of truth.
//!
//! # Containment
//!
//! Filenames arriving from the network are validated before any path is built. A valid
//! name is a single normal path component: no separators, no `.` or `..`, no NUL byte.
//! Anything else fails with [`StorageError::InvalidFilename`] and the filesystem is never
//! touched.
//!
//! # Partial writes
//!
//! A [`FileWriter`] writes straight into the target file with no userspace buffer, and a
//! chunk has reached the OS by the time [`FileWriter::write_chunk`] returns. If the writer
//! is dropped before [`FileWriter::close`] (a client disconnecting mid-upload, say), every
//! chunk written so far stays on disk. There is no rollback.
//!
//! # Timestamps
//!
//! [`StoredFile::created_at`] and [`StoredFile::updated_at`] both come from the file's
//! modification time. No creation time is tracked.

use crate::error::{StorageError, StorageResult};
use chrono::{DateTime, SecondsFormat, Utc};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// One entry of a directory listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredFile {
    pub filename: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredFile {
    pub fn created_at_rfc3339(&self) -> String {
        self.created_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    pub fn updated_at_rfc3339(&self) -> String {
        self.updated_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

/// Storage backend rooted at a single directory.
#[derive(Clone, Debug)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Opens the storage root, creating it and any missing parents first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if:
    /// - the directory cannot be created
    /// - the path exists but is not a directory
    pub fn new(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();

        if !root.exists() {
            std::fs::create_dir_all(&root).map_err(|source| StorageError::StorageDirCreation {
                path: root.clone(),
                source,
            })?;
            tracing::info!("created storage directory {}", root.display());
        }

        if !root.is_dir() {
            return Err(StorageError::NotADirectory(root));
        }

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates `filename`, truncating any existing content.
    pub async fn create(&self, filename: &str) -> StorageResult<FileWriter> {
        let path = self.resolve(filename)?;
        let file = fs::File::create(&path).await?;

        Ok(FileWriter {
            filename: filename.to_string(),
            file,
            written: 0,
        })
    }

    /// Opens `filename` for chunked reading.
    ///
    /// A missing file is reported as [`StorageError::NotFound`], which carries no path.
    pub async fn open(&self, filename: &str) -> StorageResult<FileReader> {
        let path = self.resolve(filename)?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(StorageError::NotFound),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound)
            }
            Err(e) => return Err(e.into()),
        }

        let file = fs::File::open(&path).await.map_err(not_found_or_io)?;
        Ok(FileReader { file, eof: false })
    }

    /// Lists the regular files directly under the root, sorted by filename.
    ///
    /// Directories and other non-file entries are skipped, as are entries whose
    /// metadata cannot be read or whose name is not valid UTF-8.
    pub async fn list(&self) -> StorageResult<Vec<StoredFile>> {
        let mut entries = fs::read_dir(&self.root).await?;
        let mut files = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(e) => {
                    tracing::warn!("skipping {}: {}", entry.path().display(), e);
                    continue;
                }
            };
            if !metadata.is_file() {
                continue;
            }

            let Ok(filename) = entry.file_name().into_string() else {
                tracing::warn!("skipping non UTF-8 filename {}", entry.path().display());
                continue;
            };

            let modified: DateTime<Utc> = match metadata.modified() {
                Ok(time) => time.into(),
                Err(e) => {
                    tracing::warn!("skipping {}: {}", filename, e);
                    continue;
                }
            };

            files.push(StoredFile {
                filename,
                created_at: modified,
                updated_at: modified,
            });
        }

        files.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(files)
    }

    /// Removes `filename`.
    pub async fn delete(&self, filename: &str) -> StorageResult<()> {
        let path = self.resolve(filename)?;
        fs::remove_file(&path).await.map_err(not_found_or_io)
    }

    fn resolve(&self, filename: &str) -> StorageResult<PathBuf> {
        validate_filename(filename)?;
        Ok(self.root.join(filename))
    }
}

/// Checks that `filename` names a file directly under the storage root.
pub fn validate_filename(filename: &str) -> StorageResult<()> {
    let invalid = || StorageError::InvalidFilename(filename.to_string());

    if filename.is_empty() || filename.contains(['/', '\\', '\0']) {
        return Err(invalid());
    }

    let mut components = Path::new(filename).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) if name == filename => Ok(()),
        _ => Err(invalid()),
    }
}

fn not_found_or_io(e: std::io::Error) -> StorageError {
    if e.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound
    } else {
        StorageError::Io(e)
    }
}

/// Write half of an upload. Chunks land in the order they are written.
#[derive(Debug)]
pub struct FileWriter {
    filename: String,
    file: fs::File,
    written: u64,
}

impl FileWriter {
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub async fn write_chunk(&mut self, chunk: &[u8]) -> StorageResult<()> {
        self.file.write_all(chunk).await?;
        // tokio hands the write to a blocking task; wait for it so a drop loses nothing.
        self.file.flush().await?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    /// Syncs the file to disk and closes it, returning the total size.
    pub async fn close(mut self) -> StorageResult<u64> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(self.written)
    }
}

/// Read half of a download.
#[derive(Debug)]
pub struct FileReader {
    file: fs::File,
    eof: bool,
}

impl FileReader {
    /// Reads the next chunk of at most `max_size` bytes.
    ///
    /// Chunks are only shorter than `max_size` at the end of the file. Returns `None` once
    /// the file is exhausted.
    pub async fn read_chunk(&mut self, max_size: usize) -> StorageResult<Option<Vec<u8>>> {
        if self.eof || max_size == 0 {
            return Ok(None);
        }

        let mut buf = vec![0u8; max_size];
        let mut filled = 0;
        while filled < max_size {
            let n = self.file.read(&mut buf[filled..]).await?;
            if n == 0 {
                self.eof = true;
                break;
            }
            filled += n;
        }

        if filled == 0 {
            return Ok(None);
        }
        buf.truncate(filled);
        Ok(Some(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::CHUNK_SIZE;
    use tempfile::TempDir;

    fn storage() -> (TempDir, FileStorage) {
        let temp = TempDir::new().unwrap();
        let storage = FileStorage::new(temp.path().join("storage")).unwrap();
        (temp, storage)
    }

    async fn write_file(storage: &FileStorage, name: &str, chunks: &[&[u8]]) -> u64 {
        let mut writer = storage.create(name).await.unwrap();
        for chunk in chunks {
            writer.write_chunk(chunk).await.unwrap();
        }
        writer.close().await.unwrap()
    }

    async fn read_all(storage: &FileStorage, name: &str) -> (Vec<u8>, usize) {
        let mut reader = storage.open(name).await.unwrap();
        let mut data = Vec::new();
        let mut chunks = 0;
        while let Some(chunk) = reader.read_chunk(CHUNK_SIZE).await.unwrap() {
            assert!(chunk.len() <= CHUNK_SIZE);
            data.extend_from_slice(&chunk);
            chunks += 1;
        }
        (data, chunks)
    }

    #[test]
    fn test_new_creates_missing_root_with_parents() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("a").join("b").join("storage");

        let storage = FileStorage::new(&root).unwrap();

        assert!(root.is_dir());
        assert_eq!(storage.root(), root.as_path());
    }

    #[test]
    fn test_new_rejects_file_as_root() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("file.txt");
        std::fs::write(&root, "not a directory").unwrap();

        assert!(matches!(
            FileStorage::new(&root),
            Err(StorageError::NotADirectory(_))
        ));
    }

    #[test]
    fn test_validate_filename() {
        for ok in ["a.txt", "report 2024.pdf", "..hidden", "a..b", ".env"] {
            assert!(validate_filename(ok).is_ok(), "{ok} should be accepted");
        }
        for bad in [
            "", ".", "..", "../etc/passwd", "a/b", "/abs", "dir\\file", "nul\0byte", "a/",
        ] {
            assert!(
                matches!(validate_filename(bad), Err(StorageError::InvalidFilename(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_round_trip_various_sizes() {
        let (_temp, storage) = storage();

        for (i, size) in [0, 1, CHUNK_SIZE - 1, CHUNK_SIZE, CHUNK_SIZE * 3 + 7]
            .into_iter()
            .enumerate()
        {
            let data: Vec<u8> = (0..size).map(|b| (b % 251) as u8).collect();
            let name = format!("file-{i}.bin");
            let pieces: Vec<&[u8]> = data.chunks(300).collect();

            let written = write_file(&storage, &name, &pieces).await;
            assert_eq!(written, size as u64);

            let (read, chunks) = read_all(&storage, &name).await;
            assert_eq!(read, data);
            assert_eq!(chunks, size.div_ceil(CHUNK_SIZE));
        }
    }

    #[tokio::test]
    async fn test_create_truncates_existing_file() {
        let (_temp, storage) = storage();

        write_file(&storage, "f.txt", &[b"a much longer first version"]).await;
        write_file(&storage, "f.txt", &[b"B"]).await;

        let (data, _) = read_all(&storage, "f.txt").await;
        assert_eq!(data, b"B");
    }

    #[tokio::test]
    async fn test_dropped_writer_leaves_partial_file() {
        let (_temp, storage) = storage();

        let mut writer = storage.create("partial.bin").await.unwrap();
        for _ in 0..4 {
            writer.write_chunk(&[7u8; CHUNK_SIZE]).await.unwrap();
        }
        assert_eq!(writer.written(), 4 * CHUNK_SIZE as u64);
        drop(writer);

        let on_disk = std::fs::metadata(storage.root().join("partial.bin")).unwrap();
        assert_eq!(on_disk.len(), 4 * CHUNK_SIZE as u64);
        let (data, _) = read_all(&storage, "partial.bin").await;
        assert_eq!(data, vec![7u8; 4 * CHUNK_SIZE]);
    }

    #[tokio::test]
    async fn test_open_missing_is_not_found_and_creates_nothing() {
        let (_temp, storage) = storage();

        assert!(matches!(
            storage.open("missing.txt").await,
            Err(StorageError::NotFound)
        ));
        assert!(!storage.root().join("missing.txt").exists());
        assert!(storage.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_directory_is_not_found() {
        let (_temp, storage) = storage();
        std::fs::create_dir(storage.root().join("sub")).unwrap();

        assert!(matches!(storage.open("sub").await, Err(StorageError::NotFound)));
    }

    #[tokio::test]
    async fn test_traversal_is_rejected_before_touching_disk() {
        let (temp, storage) = storage();

        assert!(matches!(
            storage.create("../escaped.txt").await,
            Err(StorageError::InvalidFilename(_))
        ));
        assert!(!temp.path().join("escaped.txt").exists());
        assert!(matches!(
            storage.open("../storage").await,
            Err(StorageError::InvalidFilename(_))
        ));
        assert!(matches!(
            storage.delete("..").await,
            Err(StorageError::InvalidFilename(_))
        ));
    }

    #[tokio::test]
    async fn test_list_skips_directories_and_shares_timestamps() {
        let (_temp, storage) = storage();
        write_file(&storage, "b.txt", &[b"b"]).await;
        write_file(&storage, "a.txt", &[b"a"]).await;
        std::fs::create_dir(storage.root().join("nested")).unwrap();

        let files = storage.list().await.unwrap();

        let names: Vec<&str> = files.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(names, ["a.txt", "b.txt"]);
        for file in &files {
            assert_eq!(file.created_at, file.updated_at);
            assert_eq!(file.created_at_rfc3339(), file.updated_at_rfc3339());
            assert!(DateTime::parse_from_rfc3339(&file.created_at_rfc3339()).is_ok());
        }
    }

    #[tokio::test]
    async fn test_delete_then_missing() {
        let (_temp, storage) = storage();
        write_file(&storage, "one.txt", &[b"1"]).await;
        write_file(&storage, "two.txt", &[b"2"]).await;

        storage.delete("one.txt").await.unwrap();

        let files = storage.list().await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].filename, "two.txt");
        assert!(matches!(
            storage.delete("one.txt").await,
            Err(StorageError::NotFound)
        ));
    }
}
