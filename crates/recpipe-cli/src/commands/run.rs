//! The `run` command: execute the migration.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::Args;
use recpipe_box::{BoxClient, BoxTokenManager};
use recpipe_core::config::Config;
use recpipe_core::ports::{ObjectStore, RecordingSource};
use recpipe_engine::{MigrationRun, RunOptions, UserProcessor};
use recpipe_http::{CircuitBreaker, RetryPolicy, RetryTransport};
use recpipe_state::{ActiveUsersFile, StatusStore};
use recpipe_zoom::{DownloaderConfig, RangedDownloader, TokenManager, ZoomClient};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Earliest listing date when `--from` is not given.
const DEFAULT_FROM: &str = "2020-01-01";

/// Connect deadline for the download stream client; the streams themselves
/// have no overall timeout and run under the cancellation token.
const DOWNLOAD_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Name of the status store document under the output directory.
const STATUS_FILE_NAME: &str = "download_status.json";

#[derive(Debug, Args)]
pub struct RunCommand {
    /// Start of the listing range (YYYY-MM-DD)
    #[arg(long)]
    from: Option<NaiveDate>,

    /// End of the listing range (YYYY-MM-DD, default: today)
    #[arg(long)]
    to: Option<NaiveDate>,

    /// Restrict the run to one upstream email
    #[arg(long)]
    user: Option<String>,

    /// Log intended work without performing any I/O
    #[arg(long)]
    dry_run: bool,

    /// Only produce and upload metadata sidecars
    #[arg(long)]
    meta_only: bool,

    /// Stop each user after this many files
    #[arg(long)]
    limit: Option<u32>,
}

impl RunCommand {
    pub async fn execute(self, mut config: Config) -> anyhow::Result<u8> {
        if self.dry_run {
            config.pipeline.dry_run = true;
        }
        if self.meta_only {
            config.pipeline.meta_only = true;
        }
        if let Some(limit) = self.limit {
            config.pipeline.limit = limit;
        }

        let problems = config.validate();
        if !problems.is_empty() {
            for problem in &problems {
                eprintln!("config error: {problem}");
            }
            return Ok(1);
        }

        let from = self
            .from
            .unwrap_or_else(|| DEFAULT_FROM.parse().expect("valid default date"));
        let to = self.to.unwrap_or_else(|| Utc::now().date_naive());
        if from > to {
            eprintln!("config error: --from {from} is after --to {to}");
            return Ok(1);
        }

        // Cancellation: first Ctrl-C requests a graceful stop; state stays
        // consistent because every transition is durable before use.
        let cancel = CancellationToken::new();
        {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, finishing the current chunk and stopping");
                    cancel.cancel();
                }
            });
        }

        let source = build_source(&config)?;
        let store = build_store(&config)?;
        let status = Arc::new(
            StatusStore::open(config.pipeline.base_output_dir.join(STATUS_FILE_NAME))
                .await
                .context("failed to open the status store")?,
        );
        let users = match ActiveUsersFile::load(&config.active_users.file_path).await {
            Ok(users) => users,
            Err(e) => {
                eprintln!(
                    "failed to load active users file {}: {e}",
                    config.active_users.file_path.display()
                );
                return Ok(1);
            }
        };

        let processor = UserProcessor::new(source, store, status, config.pipeline.clone());
        let mut run = MigrationRun::new(
            users,
            processor,
            config.active_users.check_enabled,
            config.pipeline.continue_on_error,
        );

        let summary = run
            .execute(
                &cancel,
                &RunOptions {
                    from,
                    to,
                    only_user: self.user,
                },
            )
            .await
            .context("migration run failed")?;

        info!(
            processed = summary.processed_users,
            failed = summary.failed_users,
            "run complete"
        );
        println!(
            "processed {} user(s), {} failed; downloaded {}, uploaded {}, skipped {}, deleted {}, errors {}",
            summary.processed_users,
            summary.failed_users,
            summary.totals.downloaded,
            summary.totals.uploaded,
            summary.totals.skipped,
            summary.totals.deleted,
            summary.totals.errors,
        );

        Ok(if summary.failed_users > 0 { 2 } else { 0 })
    }
}

/// Builds the upstream client stack from configuration.
fn build_source(config: &Config) -> anyhow::Result<Arc<dyn RecordingSource>> {
    let tokens = Arc::new(TokenManager::new(
        config.zoom.auth_url.as_str(),
        config.zoom.account_id.as_str(),
        config.zoom.client_id.as_str(),
        config.zoom.client_secret.as_str(),
    ));

    let metadata_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.pipeline.timeout_seconds))
        .build()
        .context("failed to build the metadata HTTP client")?;
    let transport = RetryTransport::new(
        metadata_client,
        RetryPolicy::with_max_attempts(config.pipeline.retry_attempts + 1),
    )
    .with_breaker(CircuitBreaker::with_defaults());

    let download_client = reqwest::Client::builder()
        .connect_timeout(DOWNLOAD_CONNECT_TIMEOUT)
        .build()
        .context("failed to build the download HTTP client")?;
    let downloader = RangedDownloader::new(
        download_client,
        DownloaderConfig {
            max_retries: config.pipeline.retry_attempts,
            ..DownloaderConfig::default()
        },
    );

    Ok(Arc::new(ZoomClient::new(
        config.zoom.base_url.as_str(),
        tokens,
        transport,
        downloader,
    )))
}

/// Builds the downstream client stack, or `None` when Box is disabled.
fn build_store(config: &Config) -> anyhow::Result<Option<Arc<dyn ObjectStore>>> {
    if !config.r#box.enabled {
        info!("downstream uploads disabled, keeping files locally");
        return Ok(None);
    }

    let tokens = Arc::new(BoxTokenManager::new(
        config.r#box.auth_url.as_str(),
        config.r#box.client_id.as_str(),
        config.r#box.client_secret.as_str(),
        config.r#box.enterprise_id.as_str(),
    ));
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.pipeline.timeout_seconds))
        .build()
        .context("failed to build the Box HTTP client")?;
    let transport = RetryTransport::new(
        client,
        RetryPolicy::with_max_attempts(config.pipeline.retry_attempts + 1),
    );

    Ok(Some(Arc::new(BoxClient::new(
        config.r#box.base_url.as_str(),
        config.r#box.upload_url.as_str(),
        tokens,
        transport,
    ))))
}
