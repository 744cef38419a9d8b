//! File system placer implementation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::error::PlacerError;
use super::types::{PlacementAction, PlacementRequest, PlacementResult};
use crate::job::CollisionPolicy;

/// Highest ` (n)` suffix tried before giving up.
const MAX_UNIQUIFY_ATTEMPTS: u32 = 9999;

/// Places finished files into the output directory.
///
/// Placements that target the same path are serialized by a per-path lock.
#[derive(Default)]
pub struct FsPlacer {
    locks: std::sync::Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl FsPlacer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to move a file atomically (rename).
    async fn try_atomic_move(source: &Path, destination: &Path) -> Result<bool, std::io::Error> {
        match fs::rename(source, destination).await {
            Ok(()) => Ok(true),
            Err(e) => {
                // Cross-filesystem moves fail with EXDEV (18 on Linux)
                if e.kind() == std::io::ErrorKind::CrossesDevices || e.raw_os_error() == Some(18) {
                    Ok(false)
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Moves `source` to `destination`, replacing it if present.
    ///
    /// Falls back to copying into a hidden temp file next to the destination
    /// and renaming it, so readers never see a half-written file.
    async fn move_into_place(source: &Path, destination: &Path) -> Result<(), PlacerError> {
        if Self::try_atomic_move(source, destination)
            .await
            .map_err(|e| PlacerError::move_failed(source.to_path_buf(), destination.to_path_buf(), e))?
        {
            return Ok(());
        }

        let dir = destination.parent().unwrap_or_else(|| Path::new("."));
        let file_name = destination
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let temp = dir.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

        if let Err(e) = fs::copy(source, &temp).await {
            let _ = fs::remove_file(&temp).await;
            return Err(PlacerError::copy_failed(
                source.to_path_buf(),
                temp.clone(),
                e,
            ));
        }
        if let Err(e) = fs::rename(&temp, destination).await {
            let _ = fs::remove_file(&temp).await;
            return Err(PlacerError::move_failed(temp, destination.to_path_buf(), e));
        }
        let _ = fs::remove_file(source).await;
        Ok(())
    }

    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn release_lock(&self, path: &Path) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(lock) = locks.get(path) {
            if Arc::strong_count(lock) == 1 {
                locks.remove(path);
            }
        }
    }

    /// First free `stem (n).ext` path, starting at 2.
    async fn free_candidate(target: &Path) -> Result<PathBuf, PlacerError> {
        let dir = target.parent().unwrap_or_else(|| Path::new("."));
        let stem = target
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let ext = target.extension().map(|e| e.to_string_lossy().to_string());

        for n in 2..=MAX_UNIQUIFY_ATTEMPTS {
            let name = match &ext {
                Some(ext) => format!("{} ({}).{}", stem, n, ext),
                None => format!("{} ({})", stem, n),
            };
            let candidate = dir.join(name);
            if !fs::try_exists(&candidate).await? {
                return Ok(candidate);
            }
        }
        Err(PlacerError::NoFreeName {
            path: target.to_path_buf(),
        })
    }

    /// Places one file according to the request's collision policy.
    pub async fn place(&self, request: PlacementRequest) -> Result<PlacementResult, PlacerError> {
        if !fs::try_exists(&request.source).await.unwrap_or(false) {
            return Err(PlacerError::SourceNotFound {
                path: request.source.clone(),
            });
        }

        fs::create_dir_all(&request.destination_dir)
            .await
            .map_err(|e| PlacerError::DirectoryCreationFailed {
                path: request.destination_dir.clone(),
                source: e,
            })?;

        let target = request.destination_dir.join(&request.file_name);
        let lock = self.lock_for(&target);
        let result = {
            let _guard = lock.lock().await;
            self.place_locked(&request, &target).await
        };
        drop(lock);
        self.release_lock(&target);

        if let Ok(placed) = &result {
            info!(
                job_id = %request.job_id,
                path = %placed.path.display(),
                action = ?placed.action,
                "Placed file"
            );
        }
        result
    }

    async fn place_locked(
        &self,
        request: &PlacementRequest,
        target: &Path,
    ) -> Result<PlacementResult, PlacerError> {
        let exists = fs::try_exists(target).await?;

        let (path, action) = match (request.policy, exists) {
            (_, false) => (target.to_path_buf(), PlacementAction::Placed),
            (CollisionPolicy::Skip, true) => {
                debug!(job_id = %request.job_id, path = %target.display(), "Destination exists, skipping");
                let size_bytes = fs::metadata(target).await?.len();
                return Ok(PlacementResult {
                    path: target.to_path_buf(),
                    action: PlacementAction::Skipped,
                    size_bytes,
                });
            }
            (CollisionPolicy::Overwrite, true) => (target.to_path_buf(), PlacementAction::Replaced),
            (CollisionPolicy::Uniquify, true) => {
                (Self::free_candidate(target).await?, PlacementAction::Placed)
            }
        };

        Self::move_into_place(&request.source, &path).await?;
        let size_bytes = fs::metadata(&path).await?.len();

        Ok(PlacementResult {
            path,
            action,
            size_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn setup(content: &[u8]) -> (TempDir, TempDir, PathBuf) {
        let work = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let source = work.path().join("final.mp3");
        fs::write(&source, content).await.unwrap();
        (work, out, source)
    }

    fn request(source: PathBuf, dir: &Path, policy: CollisionPolicy) -> PlacementRequest {
        PlacementRequest {
            job_id: "job-1".to_string(),
            source,
            destination_dir: dir.to_path_buf(),
            file_name: "Artist - Song.mp3".to_string(),
            policy,
        }
    }

    #[tokio::test]
    async fn test_place_into_empty_dir() {
        let (_work, out, source) = setup(b"new").await;
        let placer = FsPlacer::new();

        let result = placer
            .place(request(source.clone(), &out.path().join("Artist"), CollisionPolicy::Uniquify))
            .await
            .unwrap();

        assert_eq!(result.action, PlacementAction::Placed);
        assert_eq!(result.path, out.path().join("Artist").join("Artist - Song.mp3"));
        assert_eq!(result.size_bytes, 3);
        assert!(!source.exists());
        assert_eq!(fs::read(&result.path).await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_uniquify_appends_counter() {
        let (_work, out, source) = setup(b"new").await;
        fs::write(out.path().join("Artist - Song.mp3"), b"old").await.unwrap();
        fs::write(out.path().join("Artist - Song (2).mp3"), b"old2").await.unwrap();
        let placer = FsPlacer::new();

        let result = placer
            .place(request(source, out.path(), CollisionPolicy::Uniquify))
            .await
            .unwrap();

        assert_eq!(result.path, out.path().join("Artist - Song (3).mp3"));
        assert_eq!(
            fs::read(out.path().join("Artist - Song.mp3")).await.unwrap(),
            b"old"
        );
    }

    #[tokio::test]
    async fn test_skip_keeps_existing() {
        let (_work, out, source) = setup(b"new").await;
        fs::write(out.path().join("Artist - Song.mp3"), b"old").await.unwrap();
        let placer = FsPlacer::new();

        let result = placer
            .place(request(source, out.path(), CollisionPolicy::Skip))
            .await
            .unwrap();

        assert_eq!(result.action, PlacementAction::Skipped);
        assert_eq!(fs::read(&result.path).await.unwrap(), b"old");
    }

    #[tokio::test]
    async fn test_overwrite_replaces() {
        let (_work, out, source) = setup(b"new").await;
        fs::write(out.path().join("Artist - Song.mp3"), b"old").await.unwrap();
        let placer = FsPlacer::new();

        let result = placer
            .place(request(source, out.path(), CollisionPolicy::Overwrite))
            .await
            .unwrap();

        assert_eq!(result.action, PlacementAction::Replaced);
        assert_eq!(fs::read(&result.path).await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_missing_source() {
        let out = TempDir::new().unwrap();
        let placer = FsPlacer::new();
        let err = placer
            .place(request(
                out.path().join("missing.mp3"),
                out.path(),
                CollisionPolicy::Uniquify,
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, PlacerError::SourceNotFound { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_placements_get_distinct_paths() {
        let work = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let placer = Arc::new(FsPlacer::new());

        let mut handles = Vec::new();
        for i in 0..5 {
            let source = work.path().join(format!("{}.mp3", i));
            fs::write(&source, format!("{}", i)).await.unwrap();
            let placer = Arc::clone(&placer);
            let req = request(source, out.path(), CollisionPolicy::Uniquify);
            handles.push(tokio::spawn(async move { placer.place(req).await }));
        }

        let mut paths = Vec::new();
        for handle in handles {
            paths.push(handle.await.unwrap().unwrap().path);
        }
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), 5);
        assert!(placer.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_try_atomic_move_same_fs() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, b"x").await.unwrap();
        assert!(FsPlacer::try_atomic_move(&a, &b).await.unwrap());
        assert!(b.exists());
    }
}
