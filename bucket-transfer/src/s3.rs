//! Source store backed by Amazon S3 (or any S3-compatible endpoint).
//!
//! - Listing walks every `ListObjectsV2` page using continuation tokens.
//! - Downloads stream the `GetObject` body straight into the staging file.
//! - A missing key (`NoSuchKey` or a bare HTTP 404) becomes [`DownloadError::NotFound`].

use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3::config::{Credentials, Region};
use bucket_transfer_core::contract::{BoxError, DownloadError, SourceObject, SourceStore};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::load_config::SourceSettings;

pub struct S3Source {
    client: aws_sdk_s3::Client,
}

impl S3Source {
    /// Build a client from the loaded source settings.
    pub async fn new(settings: &SourceSettings) -> Self {
        let mut loader = aws_config::from_env().region(Region::new(settings.region.clone()));
        if let Some(keys) = &settings.keys {
            loader = loader.credentials_provider(Credentials::new(
                keys.access_key_id.clone(),
                keys.secret_access_key.clone(),
                None,
                None,
                "environment",
            ));
        }
        if let Some(endpoint_url) = &settings.endpoint_url {
            loader = loader.endpoint_url(endpoint_url);
        }
        let aws_config = loader.load().await;

        // Custom endpoints rarely support virtual-hosted buckets.
        let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
            .force_path_style(settings.endpoint_url.is_some())
            .build();

        info!(
            region = %settings.region,
            endpoint = settings.endpoint_url.as_deref().unwrap_or("aws"),
            static_keys = settings.keys.is_some(),
            "Initialized S3 client"
        );
        Self {
            client: aws_sdk_s3::Client::from_conf(s3_config),
        }
    }
}

#[async_trait]
impl SourceStore for S3Source {
    async fn list_objects(&self, bucket: &str) -> Result<Vec<SourceObject>, BoxError> {
        let mut objects = Vec::new();
        let mut continuation_token = None;

        loop {
            let res = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .set_continuation_token(continuation_token)
                .send()
                .await
                .map_err(|e| Box::new(e.into_service_error()) as BoxError)?;

            if let Some(contents) = res.contents {
                for object in contents {
                    if let Some(key) = object.key {
                        objects.push(SourceObject {
                            key,
                            size: object.size.and_then(|s| u64::try_from(s).ok()),
                        });
                    }
                }
            }
            debug!(bucket, listed = objects.len(), "Fetched listing page");

            if res.is_truncated.unwrap_or(false) {
                continuation_token = res.next_continuation_token;
                if continuation_token.is_none() {
                    break;
                }
            } else {
                break;
            }
        }

        info!(bucket, count = objects.len(), "Listed bucket");
        Ok(objects)
    }

    async fn download(
        &self,
        bucket: &str,
        key: &str,
        destination: &Path,
    ) -> Result<(), DownloadError> {
        let output = match self.client.get_object().bucket(bucket).key(key).send().await {
            Ok(output) => output,
            Err(e) => {
                let status = e.raw_response().map(|r| r.status().as_u16());
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() || status == Some(404) {
                    return Err(DownloadError::NotFound {
                        key: key.to_string(),
                    });
                }
                return Err(DownloadError::Failed(Box::new(service_error)));
            }
        };

        let mut reader = output.body.into_async_read();
        let mut file = tokio::fs::File::create(destination).await?;
        let written = tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;

        debug!(bucket, key, bytes = written, path = %destination.display(), "Wrote object to disk");
        Ok(())
    }
}
