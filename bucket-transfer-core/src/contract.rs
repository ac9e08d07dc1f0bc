//! # contract: interfaces for the source and destination stores
//!
//! This module defines the traits the transfer pipeline is written against and
//! the plain data types flowing through them:
//! - [`SourceStore`]: enumerates a bucket and fetches single objects to disk.
//! - [`DestinationStore`]: creates folders and uploads staged files.
//!
//! ## Mocking & Testing
//! - Both traits are annotated for `mockall` so consumers can generate deterministic
//!   mocks for unit and integration tests (exported with the `test-export-mocks` feature).
//!
//! ## Adding New Stores
//! - Implement the trait for your client; convert upstream errors into [`BoxError`].
//! - A source store must report a missing key as [`DownloadError::NotFound`], never
//!   as a generic failure, so the pipeline can log it distinctly.

use std::path::Path;

use async_trait::async_trait;

#[allow(unused_imports)]
use mockall::{automock, predicate::*};

/// Opaque error returned by third-party store clients.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// An object as listed by the source store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceObject {
    /// Full key of the object inside its bucket (e.g. `2019/holiday/IMG_001.jpg`).
    pub key: String,
    /// Size in bytes, when the store reports it.
    pub size: Option<u64>,
}

impl SourceObject {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            size: None,
        }
    }
}

/// Failure of a single object download.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// The key does not exist in the bucket.
    #[error("object '{key}' not found")]
    NotFound { key: String },
    /// Any other failure (network, permissions, local IO).
    #[error("download failed: {0}")]
    Failed(#[source] BoxError),
}

impl From<std::io::Error> for DownloadError {
    fn from(e: std::io::Error) -> Self {
        DownloadError::Failed(Box::new(e))
    }
}

/// Trait for reading objects out of a bucket-addressed object store.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// List every object in the bucket, in the order the store returns them.
    async fn list_objects(&self, bucket: &str) -> Result<Vec<SourceObject>, BoxError>;

    /// Fetch the object's bytes into `destination`, creating or truncating the file.
    async fn download(
        &self,
        bucket: &str,
        key: &str,
        destination: &Path,
    ) -> Result<(), DownloadError>;
}

/// The minimal data needed to create a folder in the destination store.
pub struct NewFolder<'a> {
    /// Display name of the folder.
    pub name: &'a str,
    /// Folder to nest under; `None` creates it at the root.
    pub parent_id: Option<&'a str>,
}

/// A folder created in the destination store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationFolder {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
}

/// A file created in the destination store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub id: String,
    pub name: String,
}

/// Trait for writing files into a folder-organised document store.
///
/// Implementors receive their credentials at construction time; the trait
/// itself is agnostic of authentication and transport details.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait DestinationStore: Send + Sync {
    /// Create a new folder. No check is made for an existing folder of the same name.
    async fn create_folder<'a>(&self, req: NewFolder<'a>) -> Result<DestinationFolder, BoxError>;

    /// Upload the local file at `local_path` into the folder `folder_id`.
    ///
    /// The uploaded file is named after the basename of `local_path`.
    async fn upload(&self, local_path: &Path, folder_id: &str) -> Result<UploadedFile, BoxError>;
}
