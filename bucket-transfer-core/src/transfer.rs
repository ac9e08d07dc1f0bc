//! High-level pipeline: moves every object of a bucket into one destination folder.
//!
//! This module provides the orchestration for a single transfer run:
//!   - Creates a fresh root folder in the destination store
//!   - Lists every object in the source bucket
//!   - For each object: downloads it into the staging directory, uploads it into the
//!     root folder, and removes the staged copy
//!
//! # Responsibilities
//! - Strictly sequential: one object is fully handled before the next begins
//! - Best effort per object: download and upload failures are logged and the run moves on
//! - The staged file never outlives its iteration (see [`crate::staging::StagedFile`])
//!
//! # Error Handling
//! Only folder creation and the listing itself abort the run, returning a [`TransferError`].
//!
//! # Navigation
//! - Main entrypoint: [`transfer`]
//! - Per-object step: [`transfer_object`]

use std::path::PathBuf;

use tracing::{error, info, warn};

use crate::contract::{BoxError, DestinationStore, DownloadError, NewFolder, SourceObject, SourceStore};
use crate::staging::{staging_file_name, StagedFile};

/// Display name of the folder every run creates in the destination store.
pub const DEFAULT_FOLDER_NAME: &str = "Amazon Photos Transfer";

/// Parameters of one transfer run.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Source bucket to drain.
    pub bucket: String,
    /// Scratch directory holding at most one staged file at a time.
    pub staging_dir: PathBuf,
    /// Name of the root folder created in the destination store.
    pub folder_name: String,
}

impl TransferConfig {
    pub fn new(bucket: impl Into<String>, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            bucket: bucket.into(),
            staging_dir: staging_dir.into(),
            folder_name: DEFAULT_FOLDER_NAME.to_string(),
        }
    }
}

/// Errors that abort a transfer run.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("failed to create destination folder '{name}': {source}")]
    CreateFolder {
        name: String,
        #[source]
        source: BoxError,
    },
    #[error("failed to list objects in bucket '{bucket}': {source}")]
    ListObjects {
        bucket: String,
        #[source]
        source: BoxError,
    },
}

/// What happened to a single object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Transferred { file_id: String },
    /// The key has no usable file name (e.g. a `prefix/` directory marker).
    Skipped,
    NotFound,
    DownloadFailed,
    UploadFailed,
}

/// Entrypoint: transfer every object of `config.bucket` into a new destination folder.
pub async fn transfer<S, D>(
    config: &TransferConfig,
    source: &S,
    destination: &D,
) -> Result<(), TransferError>
where
    S: SourceStore + ?Sized,
    D: DestinationStore + ?Sized,
{
    info!(bucket = %config.bucket, staging_dir = %config.staging_dir.display(), "[TRANSFER] Starting transfer");

    let folder = destination
        .create_folder(NewFolder {
            name: &config.folder_name,
            parent_id: None,
        })
        .await
        .map_err(|e| {
            error!(folder = %config.folder_name, error = ?e, "[TRANSFER][ERROR] Failed to create destination folder");
            TransferError::CreateFolder {
                name: config.folder_name.clone(),
                source: e,
            }
        })?;
    info!(folder_id = %folder.id, folder = %folder.name, "[TRANSFER] Created destination folder");

    let objects = source.list_objects(&config.bucket).await.map_err(|e| {
        error!(bucket = %config.bucket, error = ?e, "[TRANSFER][ERROR] Failed to list bucket");
        TransferError::ListObjects {
            bucket: config.bucket.clone(),
            source: e,
        }
    })?;

    if objects.is_empty() {
        info!(bucket = %config.bucket, "[TRANSFER] No objects found in bucket");
        return Ok(());
    }

    let total = objects.len();
    info!(bucket = %config.bucket, total, "[TRANSFER] Listed objects");

    for (index, object) in objects.iter().enumerate() {
        info!(key = %object.key, position = index + 1, total, "[TRANSFER] Processing object");
        transfer_object(config, source, destination, &folder.id, object).await;
    }

    info!(bucket = %config.bucket, total, "[TRANSFER] Finished processing bucket");
    Ok(())
}

/// Download, upload and clean up one object. Never fails: every error is logged
/// and reflected in the returned [`ItemOutcome`].
pub async fn transfer_object<S, D>(
    config: &TransferConfig,
    source: &S,
    destination: &D,
    folder_id: &str,
    object: &SourceObject,
) -> ItemOutcome
where
    S: SourceStore + ?Sized,
    D: DestinationStore + ?Sized,
{
    let Some(file_name) = staging_file_name(&object.key) else {
        warn!(key = %object.key, "[TRANSFER] Key has no file name, skipping");
        return ItemOutcome::Skipped;
    };

    // Dropped at the end of this function, on every path.
    let staged = StagedFile::new(&config.staging_dir, file_name);

    match source
        .download(&config.bucket, &object.key, staged.path())
        .await
    {
        Ok(()) => {
            info!(key = %object.key, path = %staged.path().display(), "[TRANSFER] Downloaded object");
        }
        Err(DownloadError::NotFound { key }) => {
            warn!(key = %key, bucket = %config.bucket, "[TRANSFER] Object not found in bucket, skipping");
            return ItemOutcome::NotFound;
        }
        Err(e) => {
            error!(key = %object.key, error = ?e, "[TRANSFER][ERROR] Download failed, skipping");
            return ItemOutcome::DownloadFailed;
        }
    }

    match destination.upload(staged.path(), folder_id).await {
        Ok(uploaded) => {
            info!(file = %file_name, file_id = %uploaded.id, "[TRANSFER] Successfully transferred");
            ItemOutcome::Transferred {
                file_id: uploaded.id,
            }
        }
        Err(e) => {
            error!(file = %file_name, error = ?e, "[TRANSFER][ERROR] Upload failed");
            ItemOutcome::UploadFailed
        }
    }
}
