// SPDX-License-Identifier: MPL-2.0

//! Storage for captured photos
//!
//! Photos are written in two phases: the bytes land in a hidden pending file
//! which is flushed and then renamed to its final name, so anything scanning
//! the album either sees a complete JPEG or nothing at all.
//!
//! The most recently persisted photo is published through
//! [`PersistedImageRegistry`]. Only the post-processor holds the
//! [`ImageRegistryPublisher`]; everyone else reads.

use crate::constants::file_naming;
use chrono::{DateTime, Local};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// A photo that has been fully written to storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedImage {
    pub path: PathBuf,
    pub display_name: String,
    pub timestamp: DateTime<Local>,
}

/// Destination for finished photos
pub trait MediaStore: Send + Sync {
    /// Persist `bytes` under `display_name` and return the final location
    ///
    /// The file must not be visible under `display_name` until it is complete.
    fn write(&self, display_name: &str, bytes: &[u8]) -> io::Result<PathBuf>;

    /// Directory photos end up in
    fn root(&self) -> &Path;
}

/// Filesystem-backed album (e.g. `~/Pictures/EagleEye`)
#[derive(Debug, Clone)]
pub struct FsMediaStore {
    root: PathBuf,
}

impl FsMediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn pending_path(&self, display_name: &str) -> PathBuf {
        self.root
            .join(format!("{}{}", file_naming::PENDING_PREFIX, display_name))
    }
}

impl MediaStore for FsMediaStore {
    fn write(&self, display_name: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.root)?;

        let pending = self.pending_path(display_name);
        let target = self.root.join(display_name);

        let written = (|| {
            let mut file = fs::File::create(&pending)?;
            file.write_all(bytes)?;
            file.sync_all()
        })();
        if let Err(e) = written {
            let _ = fs::remove_file(&pending);
            return Err(e);
        }

        if let Err(e) = fs::rename(&pending, &target) {
            let _ = fs::remove_file(&pending);
            return Err(e);
        }

        debug!(path = %target.display(), size = bytes.len(), "Photo finalized");
        Ok(target)
    }

    fn root(&self) -> &Path {
        &self.root
    }
}

/// True for files still being written
pub fn is_pending(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with(file_naming::PENDING_PREFIX))
        .unwrap_or(false)
}

/// File name for a photo taken at `timestamp`, e.g. `IMG_20240102_030405_006.jpg`
pub fn photo_file_name(timestamp: &DateTime<Local>) -> String {
    format!(
        "{}{}.{}",
        file_naming::PHOTO_PREFIX,
        timestamp.format(file_naming::TIMESTAMP_FORMAT),
        file_naming::PHOTO_EXTENSION
    )
}

/// Millisecond clock that never repeats or goes backwards
///
/// Burst frames can finish within the same millisecond; bumping to
/// `last + 1` keeps file names unique.
#[derive(Debug, Default)]
pub struct CaptureClock {
    last_millis: Mutex<i64>,
}

impl CaptureClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> DateTime<Local> {
        let now = Local::now().timestamp_millis();
        let millis = match self.last_millis.lock() {
            Ok(mut last) => {
                let next = now.max(*last + 1);
                *last = next;
                next
            }
            Err(_) => now,
        };
        DateTime::from_timestamp_millis(millis)
            .map(|utc| utc.with_timezone(&Local))
            .unwrap_or_else(Local::now)
    }
}

/// Create the registry pair, optionally seeded with an existing photo
pub fn image_registry(
    initial: Option<PersistedImage>,
) -> (ImageRegistryPublisher, PersistedImageRegistry) {
    let (tx, rx) = watch::channel(initial);
    (
        ImageRegistryPublisher { tx },
        PersistedImageRegistry { rx },
    )
}

/// Single writer of the latest persisted photo
#[derive(Debug)]
pub struct ImageRegistryPublisher {
    tx: watch::Sender<Option<PersistedImage>>,
}

impl ImageRegistryPublisher {
    /// Replace the latest photo; readers see either the old or the new value
    pub fn publish(&self, image: PersistedImage) {
        debug!(name = %image.display_name, "Publishing latest photo");
        self.tx.send_replace(Some(image));
    }
}

/// Read access to the latest persisted photo
#[derive(Debug, Clone)]
pub struct PersistedImageRegistry {
    rx: watch::Receiver<Option<PersistedImage>>,
}

impl PersistedImageRegistry {
    pub fn latest(&self) -> Option<PersistedImage> {
        self.rx.borrow().clone()
    }

    /// Wait until a newer photo is published
    ///
    /// Returns `None` once the publisher is gone.
    pub async fn changed(&mut self) -> Option<PersistedImage> {
        self.rx.changed().await.ok()?;
        self.rx.borrow_and_update().clone()
    }
}

/// Find the newest finished photo in `photos_dir`
///
/// Pending files are ignored. Used to seed the registry on startup.
pub async fn latest_persisted(photos_dir: PathBuf) -> Option<PersistedImage> {
    let latest = tokio::task::spawn_blocking(move || {
        let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
        let entries = match fs::read_dir(&photos_dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %photos_dir.display(), error = %e, "Photo directory not readable");
                return None;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if is_pending(&path) {
                continue;
            }
            let is_photo = path
                .extension()
                .map(|ext| file_naming::is_photo_extension(&ext.to_string_lossy()))
                .unwrap_or(false);
            if !is_photo {
                continue;
            }
            let Some(modified) = entry.metadata().ok().and_then(|m| m.modified().ok()) else {
                continue;
            };
            if newest.as_ref().is_none_or(|(time, _)| modified > *time) {
                newest = Some((modified, path));
            }
        }
        newest
    })
    .await
    .map_err(|e| warn!(error = %e, "Photo scan task failed"))
    .ok()??;

    let (modified, path) = latest;
    let display_name = path.file_name()?.to_string_lossy().into_owned();
    info!(path = %path.display(), "Found latest photo");

    Some(PersistedImage {
        path,
        display_name,
        timestamp: DateTime::<Local>::from(modified),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_photo_file_name_pattern() {
        let ts = Local
            .with_ymd_and_hms(2024, 1, 2, 3, 4, 5)
            .single()
            .unwrap()
            + chrono::Duration::milliseconds(6);
        assert_eq!(photo_file_name(&ts), "IMG_20240102_030405_006.jpg");
    }

    #[test]
    fn test_clock_is_strictly_increasing() {
        let clock = CaptureClock::new();
        let stamps: Vec<_> = (0..50).map(|_| clock.next()).collect();
        for pair in stamps.windows(2) {
            assert!(pair[1] > pair[0]);
            assert_ne!(photo_file_name(&pair[0]), photo_file_name(&pair[1]));
        }
    }

    #[test]
    fn test_write_leaves_only_final_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsMediaStore::new(dir.path().join("album"));

        let path = store.write("IMG_1.jpg", b"jpeg").unwrap();

        assert_eq!(path, dir.path().join("album").join("IMG_1.jpg"));
        assert_eq!(fs::read(&path).unwrap(), b"jpeg");
        let names: Vec<_> = fs::read_dir(store.root())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["IMG_1.jpg".to_string()]);
    }

    #[test]
    fn test_registry_publishes_latest() {
        let (publisher, registry) = image_registry(None);
        assert!(registry.latest().is_none());

        let image = PersistedImage {
            path: PathBuf::from("/tmp/IMG_1.jpg"),
            display_name: "IMG_1.jpg".into(),
            timestamp: Local::now(),
        };
        publisher.publish(image.clone());
        assert_eq!(registry.clone().latest(), Some(image));
    }

    #[tokio::test]
    async fn test_latest_persisted_ignores_pending_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("IMG_a.jpg"), b"a").unwrap();
        fs::write(dir.path().join(".pending-IMG_b.jpg"), b"b").unwrap();
        fs::write(dir.path().join("notes.txt"), b"c").unwrap();

        let latest = latest_persisted(dir.path().to_path_buf()).await.unwrap();
        assert_eq!(latest.display_name, "IMG_a.jpg");
    }

    #[tokio::test]
    async fn test_latest_persisted_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(latest_persisted(dir.path().join("missing")).await.is_none());
    }
}
