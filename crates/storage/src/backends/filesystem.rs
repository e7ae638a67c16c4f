//! Local filesystem storage backend.
//!
//! Every upload is stored as two files under the root directory: `<id>`
//! holds the raw bytes, `<id>.info` the JSON-encoded descriptor. The backend
//! implements every optional capability (termination, concatenation, length
//! deferral).

use crate::composer::StoreComposer;
use crate::error::{StoreError, StoreResult};
use crate::lock::Locker;
use crate::traits::{
    BodySource, ByteStream, ChunkWriteError, ConcatableUpload, DataStore, LengthDeclarableUpload,
    TerminatableUpload, Upload,
};
use async_trait::async_trait;
use freight_core::FileInfo;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::instrument;
use uuid::Uuid;

/// Read buffer size for appending chunks (64 KiB).
const COPY_BUF_SIZE: usize = 64 * 1024;

/// Local filesystem upload store. Cheap to clone; upload handles keep their
/// own clone.
#[derive(Clone)]
pub struct FilesystemStore {
    root: Arc<PathBuf>,
}

impl FilesystemStore {
    /// Create a new filesystem store rooted at `root`.
    pub async fn new(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root: Arc::new(root),
        })
    }

    /// Compose this store with all of its capabilities installed.
    pub fn compose(&self, locker: impl Locker) -> StoreComposer {
        StoreComposer::new(Arc::new(self.clone()))
            .enable_termination()
            .enable_concatenation()
            .enable_length_deferral()
            .with_locker(Arc::new(locker))
    }

    /// Validate an upload ID and return the data file path for it.
    ///
    /// IDs are generated by this store (hex UUIDs) or supplied by a
    /// pre-create hook, so anything that could traverse out of the root is
    /// rejected rather than sanitized.
    fn data_path(&self, id: &str) -> StoreResult<PathBuf> {
        if id.is_empty()
            || !id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(StoreError::InvalidId(id.to_string()));
        }
        Ok(self.root.join(id))
    }

    fn info_path(&self, id: &str) -> StoreResult<PathBuf> {
        Ok(self.data_path(id)?.with_extension("info"))
    }

    async fn read_info(&self, id: &str) -> StoreResult<FileInfo> {
        let path = self.info_path(id)?;
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id.to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        serde_json::from_slice(&raw)
            .map_err(|err| StoreError::CorruptDescriptor(format!("{id}: {err}")))
    }

    async fn write_info(&self, info: &FileInfo) -> StoreResult<()> {
        let path = self.info_path(&info.id)?;
        let raw = serde_json::to_vec(info)
            .map_err(|err| StoreError::CorruptDescriptor(format!("{}: {err}", info.id)))?;
        fs::write(&path, raw).await?;
        Ok(())
    }
}

#[async_trait]
impl DataStore for FilesystemStore {
    #[instrument(skip(self, info), fields(backend = "filesystem"))]
    async fn create_upload(&self, mut info: FileInfo) -> StoreResult<Box<dyn Upload>> {
        if info.id.is_empty() {
            info.id = Uuid::new_v4().simple().to_string();
        }

        let data_path = self.data_path(&info.id)?;
        info.storage
            .insert("type".to_string(), "filesystem".to_string());
        info.storage
            .insert("path".to_string(), data_path.display().to_string());

        fs::write(&data_path, b"").await?;
        self.write_info(&info).await?;

        Ok(Box::new(FilesystemUpload {
            store: self.clone(),
            id: info.id,
        }))
    }

    async fn get_upload(&self, id: &str) -> StoreResult<Box<dyn Upload>> {
        // Fails with NotFound if the descriptor is missing.
        let info = self.read_info(id).await?;
        Ok(Box::new(FilesystemUpload {
            store: self.clone(),
            id: info.id,
        }))
    }
}

struct FilesystemUpload {
    store: FilesystemStore,
    id: String,
}

#[async_trait]
impl Upload for FilesystemUpload {
    async fn info(&self) -> StoreResult<FileInfo> {
        self.store.read_info(&self.id).await
    }

    async fn write_chunk(&self, offset: u64, src: &mut BodySource) -> Result<u64, ChunkWriteError> {
        let mut info = self
            .store
            .read_info(&self.id)
            .await
            .map_err(|err| ChunkWriteError::new(0, err))?;

        let path = self
            .store
            .data_path(&self.id)
            .map_err(|err| ChunkWriteError::new(0, err))?;

        let current = fs::metadata(&path)
            .await
            .map_err(|err| ChunkWriteError::new(0, err.into()))?
            .len();
        if current != offset {
            return Err(ChunkWriteError::new(
                0,
                StoreError::OffsetMismatch {
                    expected: current,
                    actual: offset,
                },
            ));
        }

        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .map_err(|err| ChunkWriteError::new(0, err.into()))?;

        let mut written: u64 = 0;
        let mut buf = vec![0u8; COPY_BUF_SIZE];
        let result = loop {
            let n = match src.read(&mut buf).await {
                Ok(0) => break Ok(()),
                Ok(n) => n,
                Err(err) => break Err(StoreError::Io(err)),
            };
            if let Err(err) = file.write_all(&buf[..n]).await {
                break Err(StoreError::Io(err));
            }
            written += n as u64;
        };

        if let Err(err) = file.flush().await {
            return Err(ChunkWriteError::new(written, err.into()));
        }

        info.offset = offset + written;
        if let Err(err) = self.store.write_info(&info).await {
            return Err(ChunkWriteError::new(written, err));
        }

        match result {
            Ok(()) => Ok(written),
            Err(err) => Err(ChunkWriteError::new(written, err)),
        }
    }

    async fn finish(&self) -> StoreResult<()> {
        // Data and descriptor are already durable; nothing to seal.
        Ok(())
    }

    async fn reader(&self) -> StoreResult<ByteStream> {
        let path = self.store.data_path(&self.id)?;
        let file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(self.id.clone()));
            }
            Err(err) => return Err(err.into()),
        };
        let stream = ReaderStream::new(file).map(|item| item.map_err(StoreError::Io));
        Ok(Box::pin(stream))
    }

    fn as_terminatable(&self) -> Option<&dyn TerminatableUpload> {
        Some(self)
    }

    fn as_concatable(&self) -> Option<&dyn ConcatableUpload> {
        Some(self)
    }

    fn as_length_declarable(&self) -> Option<&dyn LengthDeclarableUpload> {
        Some(self)
    }
}

#[async_trait]
impl TerminatableUpload for FilesystemUpload {
    async fn terminate(&self) -> StoreResult<()> {
        let info_path = self.store.info_path(&self.id)?;
        match fs::remove_file(&info_path).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(self.id.clone()));
            }
            Err(err) => return Err(err.into()),
        }
        let data_path = self.store.data_path(&self.id)?;
        match fs::remove_file(&data_path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl ConcatableUpload for FilesystemUpload {
    async fn concat_uploads(&self, partials: &[Box<dyn Upload>]) -> StoreResult<()> {
        let mut info = self.store.read_info(&self.id).await?;
        let path = self.store.data_path(&self.id)?;

        let mut dest = fs::OpenOptions::new().append(true).open(&path).await?;
        let mut total: u64 = 0;
        for partial in partials {
            let mut stream = partial.reader().await?;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                dest.write_all(&chunk).await?;
                total += chunk.len() as u64;
            }
        }
        dest.flush().await?;

        info.offset = total;
        self.store.write_info(&info).await
    }
}

#[async_trait]
impl LengthDeclarableUpload for FilesystemUpload {
    async fn declare_length(&self, length: u64) -> StoreResult<()> {
        let mut info = self.store.read_info(&self.id).await?;
        info.size = Some(length);
        self.store.write_info(&info).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn store() -> (tempfile::TempDir, FilesystemStore) {
        let temp = tempdir().unwrap();
        let store = FilesystemStore::new(temp.path()).await.unwrap();
        (temp, store)
    }

    #[tokio::test]
    async fn test_create_assigns_id_and_storage() {
        let (_temp, store) = store().await;
        let upload = store.create_upload(FileInfo::default()).await.unwrap();
        let info = upload.info().await.unwrap();
        assert!(!info.id.is_empty());
        assert_eq!(info.storage["type"], "filesystem");
        assert_eq!(info.offset, 0);
    }

    #[tokio::test]
    async fn test_create_respects_preset_id() {
        let (_temp, store) = store().await;
        let upload = store
            .create_upload(FileInfo {
                id: "hook-chosen".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(upload.info().await.unwrap().id, "hook-chosen");
    }

    #[tokio::test]
    async fn test_rejects_traversal_ids() {
        let (_temp, store) = store().await;
        assert!(matches!(
            store.get_upload("../etc/passwd").await,
            Err(StoreError::InvalidId(_))
        ));
    }

    #[tokio::test]
    async fn test_write_chunk_appends_and_updates_offset() {
        let (_temp, store) = store().await;
        let upload = store
            .create_upload(FileInfo {
                size: Some(11),
                ..Default::default()
            })
            .await
            .unwrap();

        let mut src: &[u8] = b"hello ";
        assert_eq!(upload.write_chunk(0, &mut src).await.unwrap(), 6);
        let mut src: &[u8] = b"world";
        assert_eq!(upload.write_chunk(6, &mut src).await.unwrap(), 5);

        let info = upload.info().await.unwrap();
        assert_eq!(info.offset, 11);
    }

    #[tokio::test]
    async fn test_write_chunk_rejects_wrong_offset() {
        let (_temp, store) = store().await;
        let upload = store.create_upload(FileInfo::default()).await.unwrap();
        let mut src: &[u8] = b"x";
        let err = upload.write_chunk(5, &mut src).await.unwrap_err();
        assert!(matches!(
            err.source,
            StoreError::OffsetMismatch {
                expected: 0,
                actual: 5
            }
        ));
        assert_eq!(err.bytes_written, 0);
    }

    #[tokio::test]
    async fn test_reader_streams_written_bytes() {
        let (_temp, store) = store().await;
        let upload = store.create_upload(FileInfo::default()).await.unwrap();
        let mut src: &[u8] = b"abcdef";
        upload.write_chunk(0, &mut src).await.unwrap();

        let mut stream = upload.reader().await.unwrap();
        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected, b"abcdef");
    }

    #[tokio::test]
    async fn test_terminate_removes_upload() {
        let (_temp, store) = store().await;
        let upload = store.create_upload(FileInfo::default()).await.unwrap();
        let id = upload.info().await.unwrap().id;

        upload.as_terminatable().unwrap().terminate().await.unwrap();
        assert!(matches!(
            store.get_upload(&id).await,
            Err(StoreError::NotFound(_))
        ));

        // Terminating again reports NotFound.
        assert!(matches!(
            upload.as_terminatable().unwrap().terminate().await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_concat_uploads() {
        let (_temp, store) = store().await;

        let a = store
            .create_upload(FileInfo {
                size: Some(3),
                ..Default::default()
            })
            .await
            .unwrap();
        let mut src: &[u8] = b"abc";
        a.write_chunk(0, &mut src).await.unwrap();

        let b = store
            .create_upload(FileInfo {
                size: Some(3),
                ..Default::default()
            })
            .await
            .unwrap();
        let mut src: &[u8] = b"def";
        b.write_chunk(0, &mut src).await.unwrap();

        let fin = store
            .create_upload(FileInfo {
                size: Some(6),
                ..Default::default()
            })
            .await
            .unwrap();
        fin.as_concatable()
            .unwrap()
            .concat_uploads(&[a, b])
            .await
            .unwrap();

        let info = fin.info().await.unwrap();
        assert_eq!(info.offset, 6);

        let mut stream = fin.reader().await.unwrap();
        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected, b"abcdef");
    }

    #[tokio::test]
    async fn test_declare_length() {
        let (_temp, store) = store().await;
        let upload = store.create_upload(FileInfo::default()).await.unwrap();
        assert!(upload.info().await.unwrap().size_is_deferred());

        upload
            .as_length_declarable()
            .unwrap()
            .declare_length(99)
            .await
            .unwrap();
        let info = upload.info().await.unwrap();
        assert_eq!(info.size, Some(99));
        assert!(!info.size_is_deferred());
    }
}
