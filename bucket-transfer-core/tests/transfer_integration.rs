use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use bucket_transfer_core::contract::{
    DestinationFolder, DownloadError, MockDestinationStore, MockSourceStore, NewFolder,
    SourceObject, UploadedFile,
};
use bucket_transfer_core::transfer::{
    transfer, transfer_object, ItemOutcome, TransferConfig, TransferError, DEFAULT_FOLDER_NAME,
};
use mockall::Sequence;
use tempfile::tempdir;

const ROOT_FOLDER_ID: &str = "root-folder-id";

fn objects(keys: &[&str]) -> Vec<SourceObject> {
    keys.iter().map(|k| SourceObject::new(*k)).collect()
}

fn staged_files(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect()
}

/// Destination mock that creates the root folder exactly once.
fn destination_with_root_folder() -> MockDestinationStore {
    let mut destination = MockDestinationStore::new();
    destination
        .expect_create_folder()
        .times(1)
        .returning(|req: NewFolder<'_>| {
            assert_eq!(req.name, DEFAULT_FOLDER_NAME);
            assert!(req.parent_id.is_none(), "Root folder must not have a parent");
            Ok(DestinationFolder {
                id: ROOT_FOLDER_ID.to_string(),
                name: req.name.to_owned(),
                parent_id: None,
            })
        });
    destination
}

/// Source mock whose downloads succeed by writing a small file at the staging path.
fn source_listing(keys: &'static [&'static str]) -> MockSourceStore {
    let mut source = MockSourceStore::new();
    source
        .expect_list_objects()
        .times(1)
        .returning(move |_| Ok(objects(keys)));
    source
}

#[tokio::test]
async fn test_empty_bucket_creates_folder_and_transfers_nothing() {
    let staging = tempdir().unwrap();
    let config = TransferConfig::new("photos", staging.path());

    let mut destination = destination_with_root_folder();
    destination.expect_upload().never();

    let mut source = source_listing(&[]);
    source.expect_download().never();

    transfer(&config, &source, &destination)
        .await
        .expect("An empty bucket is not an error");
    assert!(staged_files(staging.path()).is_empty());
}

#[tokio::test]
async fn test_all_objects_transferred_and_staging_cleaned() {
    let staging = tempdir().unwrap();
    let config = TransferConfig::new("photos", staging.path());

    let mut source = source_listing(&["a.jpg", "b.jpg"]);
    source
        .expect_download()
        .times(2)
        .returning(|bucket, _key, path| {
            assert_eq!(bucket, "photos");
            std::fs::write(path, b"jpeg bytes").unwrap();
            Ok(())
        });

    let uploads: Arc<Mutex<Vec<PathBuf>>> = Arc::new(Mutex::new(Vec::new()));
    let recorded = uploads.clone();
    let mut destination = destination_with_root_folder();
    destination
        .expect_upload()
        .times(2)
        .returning(move |path, folder_id| {
            assert!(path.exists(), "Staged file must exist while uploading");
            assert_eq!(folder_id, ROOT_FOLDER_ID);
            recorded.lock().unwrap().push(path.to_path_buf());
            Ok(UploadedFile {
                id: format!("drive-{}", path.file_name().unwrap().to_string_lossy()),
                name: path.file_name().unwrap().to_string_lossy().into_owned(),
            })
        });

    transfer(&config, &source, &destination)
        .await
        .expect("Transfer should succeed");

    let uploads = uploads.lock().unwrap();
    assert_eq!(
        *uploads,
        vec![staging.path().join("a.jpg"), staging.path().join("b.jpg")],
        "Uploads happen in listing order with the staged paths"
    );
    assert!(staged_files(staging.path()).is_empty(), "No staging files remain");
}

#[tokio::test]
async fn test_not_found_object_is_skipped_without_upload() {
    let staging = tempdir().unwrap();
    let config = TransferConfig::new("photos", staging.path());

    let mut source = source_listing(&["gone.jpg"]);
    source.expect_download().times(1).returning(|_, key, _| {
        Err(DownloadError::NotFound {
            key: key.to_string(),
        })
    });

    let mut destination = destination_with_root_folder();
    destination.expect_upload().never();

    transfer(&config, &source, &destination)
        .await
        .expect("A missing object does not abort the run");
    assert!(!staging.path().join("gone.jpg").exists());
}

#[tokio::test]
async fn test_failed_download_removes_partial_file() {
    let staging = tempdir().unwrap();
    let config = TransferConfig::new("photos", staging.path());

    let mut source = source_listing(&["partial.jpg"]);
    source.expect_download().times(1).returning(|_, _, path| {
        std::fs::write(path, b"half a jp").unwrap();
        Err(DownloadError::Failed("connection reset".into()))
    });

    let mut destination = destination_with_root_folder();
    destination.expect_upload().never();

    transfer(&config, &source, &destination).await.unwrap();
    assert!(
        !staging.path().join("partial.jpg").exists(),
        "Partially downloaded file must be removed"
    );
}

#[tokio::test]
async fn test_failed_upload_still_removes_staged_file() {
    let staging = tempdir().unwrap();
    let config = TransferConfig::new("photos", staging.path());

    let mut source = source_listing(&["a.jpg"]);
    source.expect_download().times(1).returning(|_, _, path| {
        std::fs::write(path, b"jpeg bytes").unwrap();
        Ok(())
    });

    let mut destination = destination_with_root_folder();
    destination
        .expect_upload()
        .times(1)
        .returning(|_, _| Err("quota exceeded".into()));

    transfer(&config, &source, &destination)
        .await
        .expect("Upload failures do not abort the run");
    assert!(staged_files(staging.path()).is_empty());
}

#[tokio::test]
async fn test_folder_creation_failure_aborts_before_listing() {
    let staging = tempdir().unwrap();
    let config = TransferConfig::new("photos", staging.path());

    let mut destination = MockDestinationStore::new();
    destination
        .expect_create_folder()
        .times(1)
        .returning(|_| Err("unauthorized".into()));
    destination.expect_upload().never();

    let mut source = MockSourceStore::new();
    source.expect_list_objects().never();
    source.expect_download().never();

    let err = transfer(&config, &source, &destination)
        .await
        .expect_err("Folder creation failure is fatal");
    assert!(matches!(err, TransferError::CreateFolder { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_listing_failure_is_fatal() {
    let staging = tempdir().unwrap();
    let config = TransferConfig::new("missing-bucket", staging.path());

    let mut seq = Sequence::new();
    let mut destination = MockDestinationStore::new();
    destination
        .expect_create_folder()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|req| {
            Ok(DestinationFolder {
                id: ROOT_FOLDER_ID.into(),
                name: req.name.to_owned(),
                parent_id: None,
            })
        });
    destination.expect_upload().never();

    let mut source = MockSourceStore::new();
    source
        .expect_list_objects()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Err("NoSuchBucket".into()));
    source.expect_download().never();

    let err = transfer(&config, &source, &destination)
        .await
        .expect_err("Listing failure is fatal");
    match err {
        TransferError::ListObjects { bucket, .. } => assert_eq!(bucket, "missing-bucket"),
        other => panic!("Unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_run_continues_past_individual_failures() {
    let staging = tempdir().unwrap();
    let config = TransferConfig::new("photos", staging.path());

    let mut source = source_listing(&["albums/", "missing.jpg", "broken.jpg", "2019/good.jpg"]);
    source.expect_download().times(3).returning(|_, key, path| {
        if key == "missing.jpg" {
            return Err(DownloadError::NotFound { key: key.into() });
        }
        std::fs::write(path, key.as_bytes()).unwrap();
        Ok(())
    });

    let uploaded: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let recorded = uploaded.clone();
    let mut destination = destination_with_root_folder();
    destination.expect_upload().times(2).returning(move |path, _| {
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        if name == "broken.jpg" {
            return Err("internal error".into());
        }
        recorded.lock().unwrap().push(name.clone());
        Ok(UploadedFile { id: "ok".into(), name })
    });

    transfer(&config, &source, &destination).await.unwrap();

    assert_eq!(*uploaded.lock().unwrap(), vec!["good.jpg".to_string()]);
    assert!(staged_files(staging.path()).is_empty());
}

#[tokio::test]
async fn test_transfer_object_reports_outcomes() {
    let staging = tempdir().unwrap();
    let config = TransferConfig::new("photos", staging.path());

    let mut source = MockSourceStore::new();
    source.expect_download().returning(|_, key, path| match key {
        "missing.jpg" => Err(DownloadError::NotFound { key: key.into() }),
        "denied.jpg" => Err(DownloadError::Failed("AccessDenied".into())),
        _ => {
            std::fs::write(path, b"x").unwrap();
            Ok(())
        }
    });

    let mut destination = MockDestinationStore::new();
    destination.expect_upload().returning(|path, _| {
        if path.ends_with("reject.jpg") {
            Err("rejected".into())
        } else {
            Ok(UploadedFile {
                id: "file-1".into(),
                name: "ok.jpg".into(),
            })
        }
    });

    let cases = [
        ("ok.jpg", ItemOutcome::Transferred { file_id: "file-1".into() }),
        ("missing.jpg", ItemOutcome::NotFound),
        ("denied.jpg", ItemOutcome::DownloadFailed),
        ("reject.jpg", ItemOutcome::UploadFailed),
        ("prefix/", ItemOutcome::Skipped),
    ];
    for (key, expected) in cases {
        let outcome = transfer_object(
            &config,
            &source,
            &destination,
            ROOT_FOLDER_ID,
            &SourceObject::new(key),
        )
        .await;
        assert_eq!(outcome, expected, "key {key}");
    }
    assert!(staged_files(staging.path()).is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_backslash_in_key_is_transferred_under_its_full_name() {
    let staging = tempdir().unwrap();
    let config = TransferConfig::new("photos", staging.path());

    let mut source = MockSourceStore::new();
    source
        .expect_download()
        .times(1)
        .returning(|_, key, path| {
            assert_eq!(key, "albums/trip\\beach.jpg");
            assert!(path.ends_with("trip\\beach.jpg"));
            std::fs::write(path, b"x").unwrap();
            Ok(())
        });

    let mut destination = MockDestinationStore::new();
    destination
        .expect_upload()
        .times(1)
        .returning(|path, folder_id| {
            assert_eq!(folder_id, ROOT_FOLDER_ID);
            Ok(UploadedFile {
                id: "file-7".into(),
                name: path.file_name().unwrap().to_string_lossy().into_owned(),
            })
        });

    let outcome = transfer_object(
        &config,
        &source,
        &destination,
        ROOT_FOLDER_ID,
        &SourceObject::new("albums/trip\\beach.jpg"),
    )
    .await;

    assert_eq!(outcome, ItemOutcome::Transferred { file_id: "file-7".into() });
    assert!(staged_files(staging.path()).is_empty());
}
