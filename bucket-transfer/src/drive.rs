//! Destination store backed by the Google Drive v3 REST API.
//!
//! Implements [`DestinationStore`] on top of `reqwest`:
//! - `create_folder` issues `files.create` with the Drive folder MIME type.
//! - `upload` sends a single `multipart/related` request (metadata part + media part);
//!   the media part is typed from the file extension.
//!
//! The client is constructed with an already-resolved [`Credentials`] value, see
//! [`bucket_transfer_core::credentials::obtain_credentials`]. With [`DriveClient::with_renewal`]
//! it refreshes that token when it expires mid-run, and retries a request once after a 401.

use std::path::Path;

use async_trait::async_trait;
use bucket_transfer_core::contract::{
    BoxError, DestinationFolder, DestinationStore, NewFolder, UploadedFile,
};
use bucket_transfer_core::credentials::{
    refresh_credentials, CredentialProvider, Credentials, TokenStore,
};
use chrono::Utc;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

pub const GOOGLE_API_BASE: &str = "https://www.googleapis.com";
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

pub struct DriveClient {
    http: reqwest::Client,
    credentials: Mutex<Credentials>,
    renewal: Option<Renewal>,
    base_url: String,
}

/// Where refreshed tokens come from and where they are persisted.
struct Renewal {
    provider: Box<dyn CredentialProvider>,
    store: Box<dyn TokenStore>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FileMetadata<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    mime_type: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    parents: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    parents: Vec<String>,
}

impl DriveClient {
    pub fn new(http: reqwest::Client, credentials: Credentials) -> Self {
        Self::with_base_url(http, credentials, GOOGLE_API_BASE)
    }

    /// Point the client at another API host (used against local test servers).
    pub fn with_base_url(
        http: reqwest::Client,
        credentials: Credentials,
        base_url: impl Into<String>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        tracing::info!(base_url = %base_url, "Initialized Drive client");
        Self {
            http,
            credentials: Mutex::new(credentials),
            renewal: None,
            base_url,
        }
    }

    /// Refresh the token through `provider` when it expires, saving every new token to `store`.
    pub fn with_renewal(
        mut self,
        provider: impl CredentialProvider + 'static,
        store: impl TokenStore + 'static,
    ) -> Self {
        self.renewal = Some(Renewal {
            provider: Box::new(provider),
            store: Box::new(store),
        });
        self
    }

    /// The access token to send, refreshed first when it has expired.
    async fn access_token(&self) -> Result<String, BoxError> {
        let mut credentials = self.credentials.lock().await;
        if self.renewal.is_some() && credentials.is_expired(Utc::now()) {
            tracing::info!(expiry = ?credentials.expiry, "Drive access token expired, refreshing");
            self.renew(&mut credentials).await?;
        }
        Ok(credentials.access_token.clone())
    }

    async fn renew(&self, credentials: &mut Credentials) -> Result<(), BoxError> {
        let Some(renewal) = &self.renewal else {
            return Err("no credential renewal configured".into());
        };
        let fresh = refresh_credentials(renewal.store.as_ref(), renewal.provider.as_ref(), credentials).await?;
        *credentials = fresh;
        Ok(())
    }

    /// Send the request built by `build` with the bearer token attached. A 401 triggers one refresh and retry.
    async fn send_authorized<F>(&self, build: F) -> Result<reqwest::Response, BoxError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let token = self.access_token().await?;
        let resp = build().bearer_auth(&token).send().await?;
        if resp.status() != StatusCode::UNAUTHORIZED || self.renewal.is_none() {
            return Ok(resp);
        }

        tracing::warn!("Drive rejected the access token, refreshing and retrying once");
        let token = {
            let mut credentials = self.credentials.lock().await;
            if credentials.access_token == token {
                self.renew(&mut credentials).await?;
            }
            credentials.access_token.clone()
        };
        Ok(build().bearer_auth(&token).send().await?)
    }

    async fn parse_file(resp: reqwest::Response) -> Result<DriveFile, BoxError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(format!("Drive API error {status}: {body}").into());
        }
        Ok(resp.json::<DriveFile>().await?)
    }
}

/// Assemble a `multipart/related` body: JSON metadata first, then the media.
fn multipart_related_body(boundary: &str, metadata: &[u8], media_type: &str, media: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(metadata.len() + media.len() + 256);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata);
    body.extend_from_slice(format!("\r\n--{boundary}\r\n").as_bytes());
    body.extend_from_slice(format!("Content-Type: {media_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(media);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

#[async_trait]
impl DestinationStore for DriveClient {
    async fn create_folder<'a>(&self, req: NewFolder<'a>) -> Result<DestinationFolder, BoxError> {
        tracing::info!(name = req.name, parent_id = ?req.parent_id, "Creating Drive folder");
        let metadata = FileMetadata {
            name: req.name,
            mime_type: Some(FOLDER_MIME_TYPE),
            parents: req.parent_id.into_iter().collect(),
        };

        let url = format!("{}/drive/v3/files", self.base_url);
        let resp = self
            .send_authorized(|| {
                self.http
                    .post(&url)
                    .query(&[("fields", "id,name,parents")])
                    .json(&metadata)
            })
            .await?;

        match Self::parse_file(resp).await {
            Ok(file) => {
                tracing::info!(folder_id = %file.id, "Created Drive folder");
                Ok(DestinationFolder {
                    name: file.name.unwrap_or_else(|| req.name.to_string()),
                    parent_id: file
                        .parents
                        .into_iter()
                        .next()
                        .or_else(|| req.parent_id.map(str::to_string)),
                    id: file.id,
                })
            }
            Err(e) => {
                tracing::error!(error = %e, name = req.name, "Failed to create Drive folder");
                Err(e)
            }
        }
    }

    async fn upload(&self, local_path: &Path, folder_id: &str) -> Result<UploadedFile, BoxError> {
        let name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| format!("path {} has no file name", local_path.display()))?;
        let media = tokio::fs::read(local_path).await?;
        let media_type = mime_guess::from_path(local_path).first_or_octet_stream();

        let metadata = serde_json::to_vec(&FileMetadata {
            name: &name,
            mime_type: None,
            parents: vec![folder_id],
        })?;
        let boundary = format!("bucket-transfer-{}", uuid::Uuid::new_v4().simple());
        let body = multipart_related_body(&boundary, &metadata, media_type.essence_str(), &media);

        tracing::info!(file = %name, folder_id, bytes = media.len(), mime = %media_type, "Uploading file to Drive");
        let url = format!("{}/upload/drive/v3/files", self.base_url);
        let content_type = format!("multipart/related; boundary={boundary}");
        let resp = self
            .send_authorized(|| {
                self.http
                    .post(&url)
                    .query(&[("uploadType", "multipart"), ("fields", "id,name")])
                    .header(reqwest::header::CONTENT_TYPE, &content_type)
                    .body(body.clone())
            })
            .await?;

        let file = Self::parse_file(resp).await?;
        tracing::info!(file = %name, file_id = %file.id, "Uploaded file to Drive");
        Ok(UploadedFile {
            name: file.name.unwrap_or(name),
            id: file.id,
        })
    }
}
