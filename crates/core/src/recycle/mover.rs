//! Moves files into the recycle bin.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Local;
use serde::Serialize;
use tokio::fs;
use tracing::{debug, info, warn};

use super::destination::{sanitize_category, translate_source, with_suffix, RecycleReason};
use super::error::RecycleError;
use crate::config::ConfigError;
use crate::metrics;

/// Numbered attempts after the timestamp suffix is taken.
const MAX_COLLISION_ATTEMPTS: u32 = 1000;

/// A completed (or, in dry-run, planned) move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MovedFile {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub size_bytes: u64,
}

/// Recycle bin rooted at an absolute, writable directory.
pub struct RecycleBin {
    root: PathBuf,
    /// Destinations handed out this run, so two sources never share one even
    /// when nothing has been written yet (dry-run).
    reserved: Mutex<HashSet<PathBuf>>,
}

impl RecycleBin {
    /// Open the recycle bin, checking once that the root is absolute and
    /// writable.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let root = root.into();
        let unusable = |reason: String| ConfigError::RecycleBinUnusable {
            path: root.display().to_string(),
            reason,
        };

        if !root.is_absolute() {
            return Err(unusable("path must be absolute".to_string()));
        }
        std::fs::create_dir_all(&root).map_err(|e| unusable(e.to_string()))?;

        let marker = root.join(format!(".write-check-{}", uuid::Uuid::new_v4()));
        std::fs::write(&marker, b"").map_err(|e| unusable(format!("not writable: {}", e)))?;
        if let Err(e) = std::fs::remove_file(&marker) {
            warn!(path = %marker.display(), error = %e, "Failed to remove recycle bin write check file");
        }

        debug!(root = %root.display(), "Recycle bin ready");
        Ok(Self {
            root,
            reserved: Mutex::new(HashSet::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory a file would land in, before collision handling.
    fn base_destination(
        &self,
        source: &Path,
        category: Option<&str>,
        reason: RecycleReason,
    ) -> Result<PathBuf, RecycleError> {
        Ok(self
            .root
            .join(reason.as_str())
            .join(sanitize_category(category))
            .join(translate_source(source)?))
    }

    fn reserved(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.reserved.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pick and reserve a destination that neither exists on disk nor was
    /// handed out earlier in this run.
    async fn reserve_destination(&self, base: PathBuf) -> Result<PathBuf, RecycleError> {
        let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let numbered =
            (1..=MAX_COLLISION_ATTEMPTS).map(|n| with_suffix(&base, &format!("{}_{}", stamp, n)));
        let candidates = [base.clone(), with_suffix(&base, &stamp)]
            .into_iter()
            .chain(numbered);

        for candidate in candidates {
            if self.reserved().contains(&candidate) {
                continue;
            }
            if fs::try_exists(&candidate).await? {
                continue;
            }
            if self.reserved().insert(candidate.clone()) {
                return Ok(candidate);
            }
        }

        Err(RecycleError::CollisionUnresolved { path: base })
    }

    /// Compute and reserve where `source` would go without touching the
    /// filesystem.
    pub async fn plan(
        &self,
        source: &Path,
        category: Option<&str>,
        reason: RecycleReason,
    ) -> Result<MovedFile, RecycleError> {
        let meta = fs::symlink_metadata(source).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RecycleError::SourceNotFound {
                    path: source.to_path_buf(),
                }
            } else {
                RecycleError::Io(e)
            }
        })?;
        let base = self.base_destination(source, category, reason)?;
        let destination = self.reserve_destination(base).await?;
        Ok(MovedFile {
            source: source.to_path_buf(),
            destination,
            size_bytes: meta.len(),
        })
    }

    /// Move `source` into the recycle bin.
    ///
    /// Either the file ends up at the returned destination and is gone from
    /// the source, or the source is untouched and an error is returned.
    pub async fn move_file(
        &self,
        source: &Path,
        category: Option<&str>,
        reason: RecycleReason,
    ) -> Result<MovedFile, RecycleError> {
        let planned = self.plan(source, category, reason).await?;
        let destination = &planned.destination;

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| RecycleError::DirectoryCreationFailed {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        if !Self::try_atomic_move(source, destination).await? {
            debug!(source = %source.display(), "Cross-device move, copying");
            Self::copy_then_remove(source, destination).await?;
        }

        metrics::FILES_RECYCLED
            .with_label_values(&[reason.as_str()])
            .inc();
        info!(
            source = %source.display(),
            destination = %destination.display(),
            reason = %reason,
            "Moved file to recycle bin"
        );
        Ok(planned)
    }

    /// Attempts to move a file atomically (rename). `Ok(false)` means the
    /// rename crossed filesystems.
    async fn try_atomic_move(source: &Path, destination: &Path) -> Result<bool, RecycleError> {
        match fs::rename(source, destination).await {
            Ok(()) => Ok(true),
            Err(e) => {
                // EXDEV is 18 on Linux
                if e.kind() == std::io::ErrorKind::CrossesDevices || e.raw_os_error() == Some(18) {
                    Ok(false)
                } else {
                    Err(RecycleError::move_failed(
                        source.to_path_buf(),
                        destination.to_path_buf(),
                        e,
                    ))
                }
            }
        }
    }

    /// Copy into a `.partial` sibling, rename it into place, then remove the
    /// source. Any failure leaves the source as it was.
    async fn copy_then_remove(source: &Path, destination: &Path) -> Result<(), RecycleError> {
        let mut partial_name = destination.as_os_str().to_owned();
        partial_name.push(".partial");
        let partial = PathBuf::from(partial_name);

        if let Err(e) = fs::copy(source, &partial).await {
            let _ = fs::remove_file(&partial).await;
            return Err(RecycleError::copy_failed(
                source.to_path_buf(),
                destination.to_path_buf(),
                e,
            ));
        }

        if let Err(e) = fs::rename(&partial, destination).await {
            let _ = fs::remove_file(&partial).await;
            return Err(RecycleError::move_failed(
                source.to_path_buf(),
                destination.to_path_buf(),
                e,
            ));
        }

        if let Err(e) = fs::remove_file(source).await {
            warn!(
                source = %source.display(),
                error = %e,
                "Failed to remove source after copy, rolling back"
            );
            return Err(Self::roll_back(source, destination, e).await);
        }

        Ok(())
    }

    /// Remove the landed copy after the source could not be removed.
    async fn roll_back(source: &Path, destination: &Path, cause: std::io::Error) -> RecycleError {
        match fs::remove_file(destination).await {
            Ok(()) => RecycleError::PartialMove {
                source: source.to_path_buf(),
                error: cause,
            },
            Err(rollback) => RecycleError::RollbackFailed {
                original: source.to_path_buf(),
                destination: destination.to_path_buf(),
                reason: rollback.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, RecycleBin, PathBuf) {
        let temp = TempDir::new().unwrap();
        let bin = RecycleBin::open(temp.path().join("recycle")).unwrap();
        let data = temp.path().join("data");
        fs::create_dir_all(&data).await.unwrap();
        (temp, bin, data)
    }

    #[test]
    fn test_open_rejects_relative_root() {
        let result = RecycleBin::open("relative/bin");
        assert!(matches!(result, Err(ConfigError::RecycleBinUnusable { .. })));
    }

    #[test]
    fn test_open_creates_root() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("a/b/recycle");
        let bin = RecycleBin::open(&root).unwrap();
        assert!(root.is_dir());
        assert_eq!(bin.root(), root.as_path());
        assert_eq!(std::fs::read_dir(&root).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_move_preserves_path_and_category() {
        let (_temp, bin, data) = setup().await;
        let source = data.join("x.mkv");
        fs::write(&source, b"movie").await.unwrap();

        let moved = bin
            .move_file(&source, Some("movies"), RecycleReason::Unregistered)
            .await
            .unwrap();

        let expected = bin
            .root()
            .join("unregistered/movies")
            .join(translate_source(&source).unwrap());
        assert_eq!(moved.destination, expected);
        assert_eq!(moved.size_bytes, 5);
        assert!(!source.exists());
        assert_eq!(fs::read(&moved.destination).await.unwrap(), b"movie");
    }

    #[tokio::test]
    async fn test_second_move_gets_timestamp_suffix() {
        let (_temp, bin, data) = setup().await;
        let source = data.join("x.mkv");

        fs::write(&source, b"first").await.unwrap();
        let first = bin
            .move_file(&source, Some("movies"), RecycleReason::Unregistered)
            .await
            .unwrap();

        fs::write(&source, b"second").await.unwrap();
        let second = bin
            .move_file(&source, Some("movies"), RecycleReason::Unregistered)
            .await
            .unwrap();

        assert_ne!(first.destination, second.destination);
        let name = second.destination.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("x_2"), "unexpected name {name}");
        assert!(name.ends_with(".mkv"));
        assert_eq!(fs::read(&first.destination).await.unwrap(), b"first");
        assert_eq!(fs::read(&second.destination).await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_third_move_same_second_stays_unique() {
        let (_temp, bin, data) = setup().await;
        let source = data.join("x.mkv");
        let mut seen = HashSet::new();
        for i in 0..3 {
            fs::write(&source, format!("copy {i}")).await.unwrap();
            let moved = bin
                .move_file(&source, None, RecycleReason::Orphaned)
                .await
                .unwrap();
            assert!(seen.insert(moved.destination));
        }
    }

    #[tokio::test]
    async fn test_plan_reserves_without_moving() {
        let (_temp, bin, data) = setup().await;
        let source = data.join("x.mkv");
        fs::write(&source, b"data").await.unwrap();

        let a = bin.plan(&source, None, RecycleReason::Orphaned).await.unwrap();
        let b = bin.plan(&source, None, RecycleReason::Orphaned).await.unwrap();
        assert_ne!(a.destination, b.destination);
        assert!(source.exists());
        assert!(!a.destination.exists());
    }

    #[tokio::test]
    async fn test_category_cannot_escape_root() {
        let (_temp, bin, data) = setup().await;
        let source = data.join("x.mkv");
        fs::write(&source, b"data").await.unwrap();

        let moved = bin
            .move_file(&source, Some("../../outside"), RecycleReason::Unregistered)
            .await
            .unwrap();
        assert!(moved.destination.starts_with(bin.root().join("unregistered")));
    }

    #[tokio::test]
    async fn test_missing_source() {
        let (_temp, bin, data) = setup().await;
        let result = bin
            .move_file(&data.join("gone.mkv"), None, RecycleReason::Orphaned)
            .await;
        assert!(matches!(result, Err(RecycleError::SourceNotFound { .. })));
    }

    #[tokio::test]
    async fn test_copy_then_remove() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("src.bin");
        let destination = temp.path().join("dst.bin");
        fs::write(&source, b"payload").await.unwrap();

        RecycleBin::copy_then_remove(&source, &destination)
            .await
            .unwrap();
        assert!(!source.exists());
        assert!(!temp.path().join("dst.bin.partial").exists());
        assert_eq!(fs::read(&destination).await.unwrap(), b"payload");
    }

    /// Make `dir` read-only. Returns false when the permission has no effect
    /// (running as root), in which case the caller skips the test.
    #[cfg(unix)]
    fn lock_dir(dir: &Path) -> bool {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o555)).unwrap();
        let check = dir.join(".writable");
        if std::fs::write(&check, b"").is_ok() {
            let _ = std::fs::remove_file(&check);
            unlock_dir(dir);
            return false;
        }
        true
    }

    #[cfg(unix)]
    fn unlock_dir(dir: &Path) {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_copy_rolled_back_when_source_cannot_be_removed() {
        let temp = TempDir::new().unwrap();
        let locked = temp.path().join("locked");
        std::fs::create_dir_all(&locked).unwrap();
        let source = locked.join("src.bin");
        std::fs::write(&source, b"payload").unwrap();
        let destination = temp.path().join("dst.bin");
        if !lock_dir(&locked) {
            return;
        }

        let result = RecycleBin::copy_then_remove(&source, &destination).await;
        unlock_dir(&locked);

        assert!(matches!(result, Err(RecycleError::PartialMove { .. })), "{result:?}");
        assert!(!destination.exists());
        assert!(!temp.path().join("dst.bin.partial").exists());
        assert_eq!(std::fs::read(&source).unwrap(), b"payload");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_rollback_reports_both_copies() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("src.bin");
        std::fs::write(&source, b"payload").unwrap();
        let landed = temp.path().join("bin");
        std::fs::create_dir_all(&landed).unwrap();
        let destination = landed.join("src.bin");
        std::fs::write(&destination, b"payload").unwrap();
        if !lock_dir(&landed) {
            return;
        }

        let cause = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "source busy");
        let err = RecycleBin::roll_back(&source, &destination, cause).await;
        unlock_dir(&landed);

        assert!(err.needs_attention());
        assert!(matches!(
            &err,
            RecycleError::RollbackFailed { original, destination: d, .. }
                if original == &source && d == &destination
        ));
        assert!(source.exists());
        assert!(destination.exists());
    }

    #[tokio::test]
    async fn test_rollback_removes_landed_copy() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("src.bin");
        let destination = temp.path().join("dst.bin");
        std::fs::write(&source, b"payload").unwrap();
        std::fs::write(&destination, b"payload").unwrap();

        let cause = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "source busy");
        let err = RecycleBin::roll_back(&source, &destination, cause).await;
        assert!(matches!(err, RecycleError::PartialMove { .. }));
        assert!(!err.needs_attention());
        assert!(!destination.exists());
        assert!(source.exists());
    }

    #[tokio::test]
    async fn test_existing_file_in_bin_is_not_overwritten() {
        let (_temp, bin, data) = setup().await;
        let source = data.join("x.mkv");
        fs::write(&source, b"new").await.unwrap();
        let base = bin.base_destination(&source, None, RecycleReason::Orphaned).unwrap();
        fs::create_dir_all(base.parent().unwrap()).await.unwrap();
        fs::write(&base, b"old").await.unwrap();

        let moved = bin.move_file(&source, None, RecycleReason::Orphaned).await.unwrap();
        assert_ne!(moved.destination, base);
        assert_eq!(fs::read(&base).await.unwrap(), b"old");
        assert_eq!(fs::read(&moved.destination).await.unwrap(), b"new");
    }
}
