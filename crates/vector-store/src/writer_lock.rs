use crate::error::{Result, VectorStoreError};
use fs2::FileExt;
use std::path::{Path, PathBuf};

/// Exclusive advisory lock on `<base>.lock`, held for as long as an index is open for writing.
///
/// In-process writers are serialized by [`crate::PostIndex`]'s own lock; this one keeps a second
/// process from appending to the same file pair.
#[derive(Debug)]
pub(crate) struct WriterLock {
    file: std::fs::File,
    path: PathBuf,
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        if self.file.unlock().is_ok() {
            log::debug!("Released index writer lock {}", self.path.display());
        }
    }
}

pub(crate) async fn acquire_writer_lock(path: &Path) -> Result<WriterLock> {
    let path = path.to_path_buf();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    tokio::task::spawn_blocking(move || -> Result<WriterLock> {
        use std::fs::OpenOptions;

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        if let Err(err) = file.try_lock_exclusive() {
            return Err(lock_error(path, err));
        }
        log::debug!("Acquired index writer lock {}", path.display());
        Ok(WriterLock { file, path })
    })
    .await
    .map_err(|err| VectorStoreError::Other(format!("join writer lock task: {err}")))?
}

/// Contention means another writer holds the index; any other failure is a plain I/O error.
fn lock_error(path: PathBuf, err: std::io::Error) -> VectorStoreError {
    let contended = err.kind() == std::io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error();
    if contended {
        VectorStoreError::Locked(path)
    } else {
        VectorStoreError::IoError(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error, ErrorKind};

    #[test]
    fn only_contention_maps_to_locked() {
        let path = PathBuf::from("index.lock");
        assert!(matches!(
            lock_error(path.clone(), fs2::lock_contended_error()),
            VectorStoreError::Locked(_)
        ));
        assert!(matches!(
            lock_error(path.clone(), Error::from(ErrorKind::WouldBlock)),
            VectorStoreError::Locked(_)
        ));
        assert!(matches!(
            lock_error(path.clone(), Error::from(ErrorKind::PermissionDenied)),
            VectorStoreError::IoError(_)
        ));
        assert!(matches!(
            lock_error(path, Error::new(ErrorKind::Other, "no locks available")),
            VectorStoreError::IoError(_)
        ));
    }

    #[tokio::test]
    async fn lock_is_released_on_drop() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("index.lock");
        let first = acquire_writer_lock(&path).await.unwrap();
        assert!(matches!(
            acquire_writer_lock(&path).await,
            Err(VectorStoreError::Locked(_))
        ));
        drop(first);
        assert!(acquire_writer_lock(&path).await.is_ok());
    }
}
