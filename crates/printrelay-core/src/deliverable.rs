//! A source file plus the transfer metadata shared by every delivery of it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::error::{DispatchError, Result};
use crate::fsutil;

/// Computes the content digest of a file.
pub trait ContentDigester: Send + Sync {
    /// Digest of the file at `path`, lowercase hex.
    fn digest(&self, path: &Path) -> std::io::Result<String>;
}

/// MD5 digester used by the chunked upload protocol.
#[derive(Debug, Default, Clone, Copy)]
pub struct Md5Digester;

impl ContentDigester for Md5Digester {
    fn digest(&self, path: &Path) -> std::io::Result<String> {
        fsutil::md5_file(path)
    }
}

/// A file about to be delivered to one or more destinations.
///
/// Length and session id are fixed at construction. The digest is computed on
/// first request and cached, so every attempt for this file sees the same value
/// no matter how many destinations it fans out to.
pub struct DeliverableFile {
    path: PathBuf,
    total_size: u64,
    session_id: Uuid,
    digest: OnceCell<String>,
    digester: Arc<dyn ContentDigester>,
}

impl DeliverableFile {
    /// Open `path` with the MD5 digester.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::with_digester(path, Arc::new(Md5Digester))
    }

    /// Open `path` with a custom digester.
    pub fn with_digester(
        path: impl Into<PathBuf>,
        digester: Arc<dyn ContentDigester>,
    ) -> Result<Self> {
        let path = path.into();
        let total_size = fsutil::file_len(&path)?;
        Ok(Self {
            path,
            total_size,
            session_id: Uuid::new_v4(),
            digest: OnceCell::new(),
            digester,
        })
    }

    /// Source path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name used for the upload part, falling back to the full path.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    /// Size in bytes at construction time.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Identifier shared by every chunk of every delivery of this file.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Content digest, computed once on a blocking thread and then cached.
    pub async fn digest(&self) -> Result<&str> {
        let digest = self
            .digest
            .get_or_try_init(|| async {
                let path = self.path.clone();
                let digester = Arc::clone(&self.digester);
                tokio::task::spawn_blocking(move || digester.digest(&path))
                    .await
                    .map_err(|e| {
                        DispatchError::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
                    })?
                    .map_err(DispatchError::Io)
            })
            .await?;
        Ok(digest.as_str())
    }
}

impl fmt::Debug for DeliverableFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliverableFile")
            .field("path", &self.path)
            .field("total_size", &self.total_size)
            .field("session_id", &self.session_id)
            .field("digest", &self.digest.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingDigester {
        calls: AtomicUsize,
    }

    impl ContentDigester for CountingDigester {
        fn digest(&self, path: &Path) -> std::io::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            fsutil::md5_file(path)
        }
    }

    fn write_source(dir: &Path, body: &[u8]) -> PathBuf {
        let path = dir.join("benchy.gcode");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[tokio::test]
    async fn test_metadata_fixed_at_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_source(dir.path(), b";Sliced for Ender3\nG28\n");

        let file = DeliverableFile::open(&path).unwrap();
        assert_eq!(file.total_size(), 22);
        assert_eq!(file.file_name(), "benchy.gcode");
        assert_eq!(file.path(), path.as_path());
    }

    #[tokio::test]
    async fn test_open_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = DeliverableFile::open(dir.path().join("missing.gcode")).unwrap_err();
        assert!(matches!(err, DispatchError::Io(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_digest_computed_once_across_concurrent_users() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_source(dir.path(), b"G1 X10 Y10\n");
        let digester = Arc::new(CountingDigester {
            calls: AtomicUsize::new(0),
        });
        let file = Arc::new(DeliverableFile::with_digester(&path, digester.clone()).unwrap());

        let mut handles = Vec::new();
        for _ in 0..3 {
            let file = Arc::clone(&file);
            handles.push(tokio::spawn(async move {
                file.digest().await.unwrap().to_string()
            }));
        }
        let mut digests = Vec::new();
        for handle in handles {
            digests.push(handle.await.unwrap());
        }

        assert_eq!(digester.calls.load(Ordering::SeqCst), 1);
        assert!(digests.iter().all(|d| d == &digests[0]));
        assert_eq!(digests[0].len(), 32);
    }

    #[tokio::test]
    async fn test_session_id_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_source(dir.path(), b"G28\n");
        let file = DeliverableFile::open(&path).unwrap();
        assert_eq!(file.session_id(), file.session_id());

        let other = DeliverableFile::open(&path).unwrap();
        assert_ne!(file.session_id(), other.session_id());
    }
}
