//! Google OAuth 2.0 credential provider for installed applications.
//!
//! - `refresh` exchanges a refresh token at the client's token endpoint.
//! - `authorize` runs the loopback flow: bind `127.0.0.1` on an ephemeral port, print the
//!   consent URL, wait for the browser redirect, check the `state` nonce and exchange the code.
//!   With interaction disabled it fails immediately with
//!   [`CredentialError::InteractionRequired`], so unattended runs never block on a browser.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use bucket_transfer_core::credentials::{CredentialError, CredentialProvider, Credentials};
use chrono::{Duration, Utc};
use reqwest::Url;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, error, info, warn};

/// Full read/write access to the user's Drive.
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";

const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const CONSENT_PAGE: &str = "<html><body>The authentication flow has completed. You may close this window.</body></html>";
const FAILURE_PAGE: &str = "<html><body>Authorization failed. Return to the terminal.</body></html>";

/// OAuth client registration, as downloaded from the Google Cloud console.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

/// Read the `installed` (or `web`) section of a client secrets file.
pub fn load_client_secrets<P: AsRef<Path>>(path: P) -> anyhow::Result<ClientSecrets> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read client secrets file {}", path.display()))?;
    let file: ClientSecretsFile = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse client secrets file {}", path.display()))?;
    let secrets = file
        .installed
        .or(file.web)
        .with_context(|| format!("{} has neither an 'installed' nor a 'web' section", path.display()))?;
    info!(path = %path.display(), client_id = %secrets.client_id, "Loaded OAuth client secrets");
    Ok(secrets)
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

pub struct GoogleOAuth {
    http: reqwest::Client,
    secrets: ClientSecrets,
    scopes: Vec<String>,
    interactive: bool,
}

impl GoogleOAuth {
    pub fn new(http: reqwest::Client, secrets: ClientSecrets, scopes: Vec<String>, interactive: bool) -> Self {
        Self {
            http,
            secrets,
            scopes,
            interactive,
        }
    }

    /// The consent page URL for a given redirect and anti-forgery `state`.
    pub fn authorization_url(&self, redirect_uri: &str, state: &str) -> Result<Url, CredentialError> {
        let scope = self.scopes.join(" ");
        Url::parse_with_params(
            &self.secrets.auth_uri,
            &[
                ("response_type", "code"),
                ("client_id", self.secrets.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("scope", scope.as_str()),
                ("state", state),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .map_err(|e| CredentialError::Authorization(format!("invalid auth_uri: {e}")))
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<Credentials, CredentialError> {
        let response = self
            .token_request(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("client_id", self.secrets.client_id.as_str()),
                ("client_secret", self.secrets.client_secret.as_str()),
            ])
            .await
            .map_err(CredentialError::Authorization)?;
        Ok(self.credentials_from(response))
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<TokenResponse, String> {
        let resp = self
            .http
            .post(&self.secrets.token_uri)
            .form(params)
            .send()
            .await
            .map_err(|e| format!("token endpoint unreachable: {e}"))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let reason = match serde_json::from_str::<TokenErrorResponse>(&body) {
                Ok(err) => match err.error_description {
                    Some(desc) => format!("{}: {}", err.error, desc),
                    None => err.error,
                },
                Err(_) => format!("HTTP {status}: {body}"),
            };
            error!(%status, reason = %reason, "Token endpoint rejected the request");
            return Err(reason);
        }

        resp.json::<TokenResponse>()
            .await
            .map_err(|e| format!("malformed token response: {e}"))
    }

    fn credentials_from(&self, response: TokenResponse) -> Credentials {
        Credentials {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expiry: response.expires_in.map(|secs| Utc::now() + Duration::seconds(secs)),
            scopes: response
                .scope
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_else(|| self.scopes.clone()),
        }
    }

    /// Serve the redirect target on `listener` until the browser delivers the authorization code.
    async fn receive_code(listener: TcpListener, state: &str) -> Result<String, CredentialError> {
        let (code_tx, code_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let redirect = Arc::new(RedirectState {
            expected_state: state.to_string(),
            code_tx: Mutex::new(Some(code_tx)),
        });
        let app = Router::new().route("/", get(handle_redirect)).with_state(redirect);

        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        let outcome = code_rx
            .await
            .unwrap_or_else(|_| Err(CredentialError::Authorization("redirect listener stopped".into())));
        let _ = shutdown_tx.send(());
        match server.await {
            Ok(Ok(())) => debug!("Redirect listener shut down"),
            Ok(Err(e)) => warn!(error = ?e, "Redirect listener failed"),
            Err(e) => warn!(error = ?e, "Redirect listener task panicked"),
        }
        outcome
    }
}

struct RedirectState {
    expected_state: String,
    code_tx: Mutex<Option<oneshot::Sender<Result<String, CredentialError>>>>,
}

async fn handle_redirect(
    State(redirect): State<Arc<RedirectState>>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Html<&'static str>) {
    let outcome = parse_redirect(&params, &redirect.expected_state);
    let response = match &outcome {
        Ok(_) => (StatusCode::OK, Html(CONSENT_PAGE)),
        Err(e) => {
            warn!(error = %e, "Rejected OAuth redirect");
            (StatusCode::BAD_REQUEST, Html(FAILURE_PAGE))
        }
    };
    // Only the first redirect counts; later ones get a page but change nothing.
    if let Some(tx) = redirect.code_tx.lock().await.take() {
        let _ = tx.send(outcome);
    }
    response
}

/// Check the query of a loopback redirect and extract the authorization code.
pub fn parse_redirect(
    params: &HashMap<String, String>,
    expected_state: &str,
) -> Result<String, CredentialError> {
    if let Some(failure) = params.get("error") {
        return Err(CredentialError::Authorization(format!("consent denied: {failure}")));
    }
    if params.get("state").map(String::as_str) != Some(expected_state) {
        return Err(CredentialError::Authorization("state mismatch in redirect".into()));
    }
    params
        .get("code")
        .cloned()
        .ok_or_else(|| CredentialError::Authorization("redirect carried no code".into()))
}

#[async_trait]
impl CredentialProvider for GoogleOAuth {
    async fn refresh(&self, credentials: &Credentials) -> Result<Credentials, CredentialError> {
        let refresh_token = credentials
            .refresh_token
            .as_deref()
            .ok_or_else(|| CredentialError::Refresh("no refresh token".into()))?;
        info!(token_uri = %self.secrets.token_uri, "Refreshing access token");
        let response = self
            .token_request(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.secrets.client_id.as_str()),
                ("client_secret", self.secrets.client_secret.as_str()),
            ])
            .await
            .map_err(CredentialError::Refresh)?;
        Ok(self.credentials_from(response))
    }

    async fn authorize(&self) -> Result<Credentials, CredentialError> {
        if !self.interactive {
            error!("Authorization needed but interactive consent is disabled");
            return Err(CredentialError::InteractionRequired);
        }

        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let redirect_uri = format!("http://127.0.0.1:{}/", listener.local_addr()?.port());
        let state = uuid::Uuid::new_v4().simple().to_string();
        let url = self.authorization_url(&redirect_uri, &state)?;

        info!(%redirect_uri, "Waiting for OAuth consent in the browser");
        println!("Please visit this URL to authorize this application:\n{url}");

        let code = Self::receive_code(listener, &state).await?;
        info!("Received authorization code, exchanging for tokens");
        self.exchange_code(&code, &redirect_uri).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(token_uri: &str, interactive: bool) -> GoogleOAuth {
        GoogleOAuth::new(
            reqwest::Client::new(),
            ClientSecrets {
                client_id: "client-id".into(),
                client_secret: "client-secret".into(),
                auth_uri: DEFAULT_AUTH_URI.into(),
                token_uri: token_uri.into(),
            },
            vec![DRIVE_SCOPE.to_string()],
            interactive,
        )
    }

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn parses_redirect_with_code() {
        let code = parse_redirect(&params(&[("state", "abc"), ("code", "4/0Ab"), ("scope", "drive")]), "abc");
        assert_eq!(code.unwrap(), "4/0Ab");
    }

    #[test]
    fn rejects_state_mismatch_denial_and_missing_code() {
        assert!(parse_redirect(&params(&[("state", "evil"), ("code", "x")]), "abc").is_err());
        assert!(parse_redirect(&params(&[("code", "x")]), "abc").is_err());
        assert!(parse_redirect(&params(&[("state", "abc")]), "abc").is_err());
        let err = parse_redirect(&params(&[("error", "access_denied"), ("state", "abc")]), "abc").unwrap_err();
        assert!(err.to_string().contains("access_denied"));
    }

    #[tokio::test]
    async fn redirect_listener_hands_back_code() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let waiting = tokio::spawn(GoogleOAuth::receive_code(listener, "nonce"));

        let client = reqwest::Client::new();
        let favicon = client
            .get(format!("http://127.0.0.1:{port}/favicon.ico"))
            .send()
            .await
            .unwrap();
        assert_eq!(favicon.status(), reqwest::StatusCode::NOT_FOUND);

        let resp = client
            .get(format!("http://127.0.0.1:{port}/?state=nonce&code=4%2F0Ab&scope=drive"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert!(resp.text().await.unwrap().contains("completed"));
        drop(client);

        assert_eq!(waiting.await.unwrap().unwrap(), "4/0Ab");
    }

    #[tokio::test]
    async fn redirect_listener_rejects_forged_state() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let waiting = tokio::spawn(GoogleOAuth::receive_code(listener, "nonce"));

        let client = reqwest::Client::new();
        let resp = client
            .get(format!("http://127.0.0.1:{port}/?state=forged&code=x"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
        drop(client);

        let err = waiting.await.unwrap().unwrap_err();
        assert!(err.to_string().contains("state mismatch"), "got: {err}");
    }

    #[test]
    fn authorization_url_requests_offline_drive_access() {
        let url = provider(DEFAULT_TOKEN_URI, true)
            .authorization_url("http://127.0.0.1:5555/", "nonce")
            .unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("client_id".into(), "client-id".into())));
        assert!(pairs.contains(&("scope".into(), DRIVE_SCOPE.into())));
        assert!(pairs.contains(&("access_type".into(), "offline".into())));
        assert!(pairs.contains(&("state".into(), "nonce".into())));
        assert!(pairs.contains(&("redirect_uri".into(), "http://127.0.0.1:5555/".into())));
    }

    #[tokio::test]
    async fn non_interactive_authorize_fails_fast() {
        let err = provider(DEFAULT_TOKEN_URI, false).authorize().await.unwrap_err();
        assert!(matches!(err, CredentialError::InteractionRequired));
    }

    #[test]
    fn reads_installed_client_secrets() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            file.path(),
            r#"{"installed":{"client_id":"id","client_secret":"s","project_id":"p",
                "auth_uri":"https://accounts.google.com/o/oauth2/auth",
                "token_uri":"https://oauth2.googleapis.com/token",
                "redirect_uris":["http://localhost"]}}"#,
        )
        .unwrap();
        let secrets = load_client_secrets(file.path()).unwrap();
        assert_eq!(secrets.client_id, "id");
        assert_eq!(secrets.token_uri, DEFAULT_TOKEN_URI);
    }

    #[test]
    fn rejects_secrets_without_known_section() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), r#"{"service_account":{}}"#).unwrap();
        assert!(load_client_secrets(file.path()).is_err());
    }
}
