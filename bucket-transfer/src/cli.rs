///
/// This module implements the CLI interface for bucket-transfer: command parsing,
/// overrides on top of the loaded config, client construction and the run itself.
///
/// All pipeline logic (contracts, orchestration, credential lifecycle) lives in the
/// [`bucket-transfer-core`] crate. This module is strictly glue.
///
/// ## How To Use
/// - For command-line users: use the installed `bucket-transfer` binary with `--help`.
/// - For programmatic/integration use: call [`run`] with a constructed [`Cli`].
///
/// [`bucket-transfer-core`]: ../../bucket-transfer-core/
use crate::drive::DriveClient;
use crate::load_config::{load_config, AppConfig};
use crate::oauth::{load_client_secrets, GoogleOAuth, DRIVE_SCOPE};
use crate::s3::S3Source;
use anyhow::{Context, Result};
use bucket_transfer_core::credentials::obtain_credentials;
use bucket_transfer_core::token_store::{AuthorizedClient, FileTokenStore};
use bucket_transfer_core::transfer::{transfer, TransferConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI for bucket-transfer: move a media library from S3 into Google Drive.
#[derive(Parser)]
#[clap(
    name = "bucket-transfer",
    version,
    about = "Move every object of an S3 bucket into a new Google Drive folder"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Transfer all objects of the configured bucket into a fresh Drive folder
    Transfer {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Bucket to drain, overriding `source.bucket`
        #[clap(long)]
        bucket: Option<String>,
        /// Staging directory, overriding `staging_dir`
        #[clap(long)]
        staging_dir: Option<PathBuf>,
        /// Fail instead of opening the browser consent flow when no usable token is cached
        #[clap(long)]
        non_interactive: bool,
    },
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Transfer {
            config,
            bucket,
            staging_dir,
            non_interactive,
        } => {
            let mut config = load_config(config)?;
            if let Some(bucket) = bucket {
                config.source.bucket = bucket;
            }
            if let Some(staging_dir) = staging_dir {
                config.staging_dir = staging_dir;
            }
            tracing::info!(command = "transfer", bucket = %config.source.bucket, "Starting transfer process");

            match execute(&config, !non_interactive).await {
                Ok(()) => {
                    tracing::info!(command = "transfer", "Transfer complete");
                    Ok(())
                }
                Err(e) => {
                    tracing::error!(command = "transfer", error = %e, "Transfer failed");
                    Err(e)
                }
            }
        }
    }
}

async fn execute(config: &AppConfig, interactive: bool) -> Result<()> {
    let http = reqwest::Client::new();
    let scopes = vec![DRIVE_SCOPE.to_string()];

    let secrets = load_client_secrets(&config.destination.credentials_path)?;
    let token_store = FileTokenStore::new(&config.destination.token_path).with_client(AuthorizedClient {
        client_id: secrets.client_id.clone(),
        client_secret: secrets.client_secret.clone(),
        token_uri: secrets.token_uri.clone(),
    });
    let provider = GoogleOAuth::new(http.clone(), secrets, scopes.clone(), interactive);
    let credentials = obtain_credentials(&token_store, &provider, &scopes)
        .await
        .context("Failed to obtain Google Drive credentials")?;
    let drive = DriveClient::new(http, credentials).with_renewal(provider, token_store);

    let source = S3Source::new(&config.source).await;

    tokio::fs::create_dir_all(&config.staging_dir)
        .await
        .with_context(|| format!("Failed to create staging directory {}", config.staging_dir.display()))?;

    let transfer_config = TransferConfig {
        bucket: config.source.bucket.clone(),
        staging_dir: config.staging_dir.clone(),
        folder_name: config.destination.folder_name.clone(),
    };
    transfer(&transfer_config, &source, &drive).await?;
    Ok(())
}
