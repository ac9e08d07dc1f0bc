/// `load_config` module: Loads a static YAML config and injects environment secrets into the run configuration.
///
/// This module is the only place where untrusted YAML is parsed and mapped to typed structs.
///
/// # Responsibilities
/// - Parse the user-supplied YAML configuration file
/// - Fill in defaults (region, folder name, credential paths, staging directory)
/// - Inject the S3 access key pair from the environment (`AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`)
///   and the region from `AWS_REGION` when the file does not pin one
///
/// # Errors
/// All errors in this module use `anyhow::Error` and are surfaced at the CLI boundary.
use anyhow::Result;
use bucket_transfer_core::transfer::DEFAULT_FOLDER_NAME;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_CREDENTIALS_PATH: &str = "credentials.json";
pub const DEFAULT_TOKEN_PATH: &str = "token.json";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub source: SourceSettings,
    pub destination: DestinationSettings,
    /// Scratch directory for one staged file at a time.
    pub staging_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible stores (MinIO, R2, ...).
    pub endpoint_url: Option<String>,
    /// Static keys from the environment; `None` falls back to the default AWS provider chain.
    pub keys: Option<AccessKeys>,
}

#[derive(Clone)]
pub struct AccessKeys {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl std::fmt::Debug for AccessKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessKeys")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct DestinationSettings {
    pub folder_name: String,
    /// OAuth client secrets file (`installed` or `web` application).
    pub credentials_path: PathBuf,
    /// Token cache written after every authorization or refresh.
    pub token_path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    source: RawSource,
    #[serde(default)]
    destination: RawDestination,
    #[serde(default)]
    staging_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct RawSource {
    bucket: String,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    endpoint_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawDestination {
    #[serde(default)]
    folder_name: Option<String>,
    #[serde(default)]
    credentials_path: Option<PathBuf>,
    #[serde(default)]
    token_path: Option<PathBuf>,
}

/// Loads a static YAML config file (no secrets) and injects env vars for secrets.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    let raw: RawConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    if raw.source.bucket.trim().is_empty() {
        error!(config_path = ?path_ref, "source.bucket is empty");
        anyhow::bail!("source.bucket must not be empty");
    }

    let region = raw
        .source
        .region
        .or_else(|| non_empty_env("AWS_REGION"))
        .unwrap_or_else(|| DEFAULT_REGION.to_string());

    let keys = match (
        non_empty_env("AWS_ACCESS_KEY_ID"),
        non_empty_env("AWS_SECRET_ACCESS_KEY"),
    ) {
        (Some(access_key_id), Some(secret_access_key)) => {
            info!("AWS access key pair found in env");
            Some(AccessKeys {
                access_key_id,
                secret_access_key,
            })
        }
        (None, None) => {
            info!("No AWS access key pair in env, using the default credential chain");
            None
        }
        _ => {
            warn!("Only one of AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY is set, ignoring both");
            None
        }
    };

    let destination = DestinationSettings {
        folder_name: raw
            .destination
            .folder_name
            .unwrap_or_else(|| DEFAULT_FOLDER_NAME.to_string()),
        credentials_path: raw
            .destination
            .credentials_path
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CREDENTIALS_PATH)),
        token_path: raw
            .destination
            .token_path
            .unwrap_or_else(|| PathBuf::from(DEFAULT_TOKEN_PATH)),
    };

    let config = AppConfig {
        source: SourceSettings {
            bucket: raw.source.bucket,
            region,
            endpoint_url: raw.source.endpoint_url,
            keys,
        },
        destination,
        staging_dir: raw.staging_dir.unwrap_or_else(std::env::temp_dir),
    };

    info!(
        bucket = %config.source.bucket,
        region = %config.source.region,
        staging_dir = %config.staging_dir.display(),
        "Config loaded and merged successfully"
    );
    Ok(config)
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
