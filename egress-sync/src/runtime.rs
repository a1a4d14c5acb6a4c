use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use egress_core::{EgressClient, RetryPolicy};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{SinkConfig, SyncConfig};
use crate::sync::engine::{EngineError, SyncEngine, SyncPlan, SyncReport};
use crate::sync::sink::{DirectorySink, HttpObjectSink, TransferSink};
use crate::sync::tracking::TrackingStore;

pub type DynSink = Box<dyn TransferSink>;

pub struct SyncRuntime {
    engine: SyncEngine<DynSink>,
}

impl SyncRuntime {
    pub fn bootstrap(config: &SyncConfig) -> anyhow::Result<Self> {
        let http = http_client(config.request_timeout).context("failed to build http client")?;
        let retry = RetryPolicy::default()
            .with_max_attempts(config.max_attempts)
            .with_base_delay(config.backoff_base);
        let client = EgressClient::with_base_url(
            &config.api_base_url,
            config.workspace_id.clone(),
            config.auth_token.clone(),
        )
        .context("invalid EGRESS_API_BASE_URL")?
        .with_http(http.clone())
        .with_retry(retry);

        let tracking = match &config.tracking_file {
            Some(path) => TrackingStore::new(path),
            None => TrackingStore::new_default(&config.workspace_id)
                .context("no location for tracking state")?,
        };

        let sink: DynSink = match &config.sink {
            SinkConfig::Http {
                endpoint,
                bucket,
                token,
            } => {
                let mut sink = HttpObjectSink::new(endpoint, bucket.clone())
                    .context("invalid EGRESS_SINK_ENDPOINT")?
                    .with_http(http);
                if let Some(token) = token {
                    sink = sink.with_token(token.clone());
                }
                Box::new(sink)
            }
            SinkConfig::Directory(root) => Box::new(DirectorySink::new(root)),
        };

        info!(
            workspace = %config.workspace_id,
            tracking = %tracking.path().display(),
            concurrency = config.concurrency,
            "egress-sync configured"
        );
        let engine = SyncEngine::new(client, tracking, sink).with_options(config.sync_options());
        Ok(Self { engine })
    }

    /// Runs one pass, cancelling cooperatively on Ctrl-C.
    pub async fn run_once(&self) -> anyhow::Result<ExitCode> {
        let cancel = CancellationToken::new();
        let signal_cancel = cancel.clone();
        let signal_task = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, finishing in-flight transfers");
                signal_cancel.cancel();
            }
        });

        let result = self.engine.run_with_cancel(cancel).await;
        signal_task.abort();
        finish(result)
    }

    pub async fn dry_run(&self) -> anyhow::Result<ExitCode> {
        let plan = self.engine.plan().await?;
        print_plan(&self.engine, &plan);
        Ok(ExitCode::SUCCESS)
    }
}

/// Shared client for the API and the object store. The timeout bounds
/// connecting and each idle gap between reads, never a whole transfer, so
/// large files keep streaming as long as bytes keep arriving.
fn http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(timeout)
        .read_timeout(timeout)
        .build()
}

/// Maps a finished pass to the process outcome. Failed or cancelled files
/// give a non-zero status; an unsaved tracking state is an error.
fn finish(result: Result<SyncReport, EngineError>) -> anyhow::Result<ExitCode> {
    match result {
        Ok(report) => {
            print_report(&report);
            Ok(ExitCode::from(exit_status(&report)))
        }
        Err(EngineError::Persist { report, source }) => {
            print_report(&report);
            error!(error = %source, "tracking state was not saved");
            Err(anyhow::Error::new(source).context("failed to persist tracking state"))
        }
        Err(err) => Err(err.into()),
    }
}

fn exit_status(report: &SyncReport) -> u8 {
    if report.is_success() { 0 } else { 1 }
}

fn print_report(report: &SyncReport) {
    println!(
        "files considered: {}, transferred: {}, skipped: {}, failed: {}, cancelled: {}",
        report.considered,
        report.transferred,
        report.skipped,
        report.failed(),
        report.cancelled
    );
    for failure in &report.failures {
        println!(
            "  failed: {} ({}): {}",
            failure.name, failure.file_id, failure.error
        );
    }
}

fn print_plan<S: TransferSink>(engine: &SyncEngine<S>, plan: &SyncPlan) {
    println!(
        "files considered: {}, pending: {}, unchanged: {}",
        plan.considered,
        plan.pending.len(),
        plan.unchanged
    );
    for file in &plan.pending {
        match engine.destination_key(file) {
            Ok(key) => println!("  {} -> {}", file.id, key),
            Err(err) => println!("  {} -> invalid key: {}", file.id, err),
        }
    }
}
