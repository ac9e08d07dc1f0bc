//! Local staging of transfer items.
//!
//! A [`StagedFile`] owns one path inside the staging directory for the duration of a
//! single download/upload attempt and removes whatever is there when it is dropped,
//! including partially written downloads.

use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};

/// Derive the local file name for an object key: its last `/`-separated segment.
///
/// Returns `None` for keys that do not name a file (directory markers such as
/// `photos/2019/`) or whose last segment is not a single plain component on this
/// platform (`..`, or `a\b` on Windows).
pub fn staging_file_name(key: &str) -> Option<&str> {
    let name = key.rsplit('/').next().unwrap_or(key);
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Some(name),
        _ => None,
    }
}

/// Scoped ownership of one staging path. The file is removed on drop.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
}

impl StagedFile {
    /// Claim `staging_dir/file_name` for the current iteration.
    pub fn new(staging_dir: &Path, file_name: &str) -> Self {
        Self {
            path: staging_dir.join(file_name),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn remove(&self) -> io::Result<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        match self.remove() {
            Ok(true) => debug!(path = %self.path.display(), "Removed staged file"),
            Ok(false) => {}
            Err(e) => warn!(path = %self.path.display(), error = ?e, "Failed to remove staged file"),
        }
    }
}
