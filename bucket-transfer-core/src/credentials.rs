//! Credential lifecycle for the destination store.
//!
//! Acquiring a usable credential is a linear check over the cached token:
//! absent or unusable → reauthorize; expired with a refresh token → refresh;
//! otherwise use as-is. Whatever comes out of a refresh or reauthorization is
//! persisted before it is returned. [`assess`] makes the decision without side
//! effects; [`obtain_credentials`] runs it against a [`TokenStore`] and a
//! [`CredentialProvider`].

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[allow(unused_imports)]
use mockall::{automock, predicate::*};

/// Tokens expiring within this window are treated as already expired.
pub const EXPIRY_SKEW_SECS: i64 = 60;

/// Access/refresh token material for the destination store.
///
/// Serialises to the `token.json` layout used by Google's client libraries.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(rename = "token")]
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expiry", &self.expiry)
            .field("scopes", &self.scopes)
            .finish()
    }
}

impl Credentials {
    /// A token without an expiry never expires.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) => expiry - Duration::seconds(EXPIRY_SKEW_SECS) <= now,
            None => false,
        }
    }

    pub fn covers_scopes(&self, required: &[String]) -> bool {
        required.iter().all(|s| self.scopes.contains(s))
    }
}

/// Outcome of inspecting a cached credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialState {
    /// Usable as-is.
    Valid(Credentials),
    /// Expired, but carries a refresh token.
    Refresh(Credentials),
    /// Nothing usable; a full authorization is required.
    Reauthorize,
}

/// Decide what to do with the cached credential. Pure; no IO.
pub fn assess(cached: Option<Credentials>, required_scopes: &[String], now: DateTime<Utc>) -> CredentialState {
    let Some(creds) = cached else {
        return CredentialState::Reauthorize;
    };
    if creds.access_token.is_empty() || !creds.covers_scopes(required_scopes) {
        return CredentialState::Reauthorize;
    }
    if !creds.is_expired(now) {
        return CredentialState::Valid(creds);
    }
    if creds.refresh_token.as_deref().is_some_and(|t| !t.is_empty()) {
        CredentialState::Refresh(creds)
    } else {
        CredentialState::Reauthorize
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed token data: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("token refresh failed: {0}")]
    Refresh(String),
    #[error("authorization failed: {0}")]
    Authorization(String),
    #[error("interactive authorization required but disabled")]
    InteractionRequired,
}

/// Persistence for the credential state between runs.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait TokenStore: Send + Sync {
    /// Load the cached credential, `Ok(None)` when nothing is stored.
    fn load(&self) -> Result<Option<Credentials>, CredentialError>;
    fn save(&self, credentials: &Credentials) -> Result<(), CredentialError>;
}

/// Issues new credentials, either by refresh or by a full authorization flow.
///
/// Interactive consent (browser + loopback server) and non-interactive flows
/// for automated environments both sit behind this trait.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn refresh(&self, credentials: &Credentials) -> Result<Credentials, CredentialError>;
    async fn authorize(&self) -> Result<Credentials, CredentialError>;
}

/// Load, check, refresh or reissue, and persist the destination credential.
pub async fn obtain_credentials<S, P>(
    store: &S,
    provider: &P,
    required_scopes: &[String],
) -> Result<Credentials, CredentialError>
where
    S: TokenStore + ?Sized,
    P: CredentialProvider + ?Sized,
{
    let cached = match store.load() {
        Ok(cached) => cached,
        Err(CredentialError::Malformed(e)) => {
            warn!(error = %e, "Cached token is malformed, ignoring it");
            None
        }
        Err(e) => return Err(e),
    };

    let fresh = match assess(cached, required_scopes, Utc::now()) {
        CredentialState::Valid(creds) => {
            info!(expiry = ?creds.expiry, "Using cached credentials");
            return Ok(creds);
        }
        CredentialState::Refresh(expired) => {
            info!(expiry = ?expired.expiry, "Cached credentials expired, refreshing");
            match refresh_with(provider, &expired).await {
                Ok(refreshed) => refreshed,
                Err(e) => {
                    warn!(error = %e, "Refresh failed, falling back to authorization");
                    provider.authorize().await?
                }
            }
        }
        CredentialState::Reauthorize => {
            info!("No usable cached credentials, starting authorization");
            provider.authorize().await?
        }
    };

    store.save(&fresh)?;
    info!(expiry = ?fresh.expiry, "Persisted credentials");
    Ok(fresh)
}

/// Refresh `current` and persist the result. Used when a token goes stale during a run;
/// unlike [`obtain_credentials`] there is no fallback to a new authorization.
pub async fn refresh_credentials<S, P>(
    store: &S,
    provider: &P,
    current: &Credentials,
) -> Result<Credentials, CredentialError>
where
    S: TokenStore + ?Sized,
    P: CredentialProvider + ?Sized,
{
    let refreshed = refresh_with(provider, current).await?;
    store.save(&refreshed)?;
    info!(expiry = ?refreshed.expiry, "Refreshed and persisted credentials");
    Ok(refreshed)
}

/// A refresh response without a refresh token keeps the current one.
async fn refresh_with<P>(provider: &P, current: &Credentials) -> Result<Credentials, CredentialError>
where
    P: CredentialProvider + ?Sized,
{
    let mut refreshed = provider.refresh(current).await?;
    if refreshed.refresh_token.is_none() {
        refreshed.refresh_token = current.refresh_token.clone();
    }
    Ok(refreshed)
}
