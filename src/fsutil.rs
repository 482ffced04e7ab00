//! Filesystem helpers shared by the cache and the file-backed stores.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::fs;

/// Sequence for temp file names, unique within the process.
static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Writes `data` to `path` through a sibling temp file and a rename, so
/// readers never observe a partially written file.
///
/// Each call writes its own temp file; concurrent writers to one path
/// resolve as last rename wins.
pub async fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let temp_path = temp_sibling(path);
    fs::write(&temp_path, data).await?;

    if let Err(err) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err);
    }
    Ok(())
}

/// Removes a file, treating "already gone" as success.
///
/// Returns whether this call removed the file.
pub async fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Removes a directory tree, treating "already gone" as success.
pub async fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

/// `<name>.<pid>.<seq>.tmp` next to `path`.
fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
    name.push(format!(".{}.{}.tmp", std::process::id(), seq));
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_atomic_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/file.json");

        write_atomic(&path, b"{}").await.unwrap();

        assert_eq!(fs::read(&path).await.unwrap(), b"{}");
        let leftovers = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[tokio::test]
    async fn test_write_atomic_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file");

        write_atomic(&path, b"first").await.unwrap();
        write_atomic(&path, b"second").await.unwrap();

        assert_eq!(fs::read(&path).await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_remove_if_exists_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file");
        fs::write(&path, b"x").await.unwrap();

        assert!(remove_if_exists(&path).await.unwrap());
        assert!(!remove_if_exists(&path).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_dir_if_exists_missing() {
        let dir = tempfile::tempdir().unwrap();
        remove_dir_if_exists(&dir.path().join("nope")).await.unwrap();
    }

    #[test]
    fn test_temp_sibling_is_unique() {
        let path = Path::new("/cache/data/abc.json");
        let first = temp_sibling(path);
        let second = temp_sibling(path);

        assert_ne!(first, second);
        assert_eq!(first.parent(), Some(Path::new("/cache/data")));
        let name = first.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("abc.json."));
        assert!(name.ends_with(".tmp"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.bin");

        let mut handles = Vec::new();
        for writer in 0u8..8 {
            let path = path.clone();
            handles.push(tokio::spawn(async move {
                let payload = vec![writer; 256 * 1024];
                for _ in 0..10 {
                    write_atomic(&path, &payload).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let data = fs::read(&path).await.unwrap();
        assert_eq!(data.len(), 256 * 1024);
        assert!(data.iter().all(|b| *b == data[0]), "torn write");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
