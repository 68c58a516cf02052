//! Small file helpers used by the dispatch engine.

use std::fs::{File, TryLockError};
use std::io::{self, Read};
use std::path::Path;
use std::time::{Duration, Instant};

use md5::{Digest, Md5};

const HASH_BUFFER: usize = 64 * 1024;
const UNLOCK_POLL: Duration = Duration::from_millis(200);

/// MD5 of the file contents as lowercase hex.
///
/// The file is opened and held under a shared lock only for the duration of
/// this call, so writers honouring advisory locks cannot change it mid-hash.
pub fn md5_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    file.lock_shared()?;

    let mut hasher = Md5::new();
    let mut buf = vec![0u8; HASH_BUFFER];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    file.unlock()?;
    Ok(hex::encode(hasher.finalize()))
}

/// Length of the file in bytes.
pub fn file_len(path: &Path) -> io::Result<u64> {
    Ok(std::fs::metadata(path)?.len())
}

/// Delete a file. A missing file is not an error.
pub fn delete_file(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Returns true when another process holds a lock on the file or it cannot be
/// opened. A missing file is reported as unlocked.
pub fn is_file_locked(path: &Path) -> bool {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return false,
        Err(_) => return true,
    };

    match file.try_lock() {
        Ok(()) => {
            let _ = file.unlock();
            false
        }
        Err(TryLockError::WouldBlock) => true,
        Err(TryLockError::Error(_)) => true,
    }
}

/// Poll until the file is unlocked or `timeout` (at least one second) expires.
/// Returns false on timeout.
pub async fn wait_for_unlock(path: &Path, timeout: Duration) -> bool {
    let timeout = timeout.max(Duration::from_secs(1));
    let started = Instant::now();

    while is_file_locked(path) {
        if started.elapsed() > timeout {
            tracing::warn!("File {} did not unlock in time, aborting", path.display());
            return false;
        }
        tracing::debug!("Waiting for file lock on {}", path.display());
        tokio::time::sleep(UNLOCK_POLL).await;
    }

    true
}
