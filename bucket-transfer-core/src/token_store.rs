use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::credentials::{CredentialError, Credentials, TokenStore};

/// OAuth client the token was issued to. Written next to the token so the file
/// can be read back as an `authorized_user` credential by Google's client libraries.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizedClient {
    pub client_id: String,
    pub client_secret: String,
    pub token_uri: String,
}

impl std::fmt::Debug for AuthorizedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizedClient")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

#[derive(Serialize)]
struct TokenFile<'a> {
    #[serde(flatten)]
    credentials: &'a Credentials,
    #[serde(flatten)]
    client: Option<&'a AuthorizedClient>,
}

/// Stores the credential as a JSON file (by default `token.json`).
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
    client: Option<AuthorizedClient>,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            client: None,
        }
    }

    /// Also persist the issuing client with every save.
    pub fn with_client(mut self, client: AuthorizedClient) -> Self {
        self.client = Some(client);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<Credentials>, CredentialError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No cached token file");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let creds = serde_json::from_str(&content)?;
        debug!(path = %self.path.display(), "Loaded cached token file");
        Ok(Some(creds))
    }

    fn save(&self, credentials: &Credentials) -> Result<(), CredentialError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&TokenFile {
            credentials,
            client: self.client.as_ref(),
        })?;
        // Write-then-rename so an interrupted save never leaves a truncated token behind.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        info!(path = %self.path.display(), "Saved token file");
        Ok(())
    }
}
