use std::collections::HashSet;
use std::fmt;
use std::io;
use std::time::Duration;

use egress_core::{EgressClient, EgressError, RemoteFile};
use futures_util::StreamExt;
use futures_util::stream;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::paths::{PathError, destination_key};
use super::sink::{ByteStream, SinkError, TransferSink};
use super::tracking::{TrackingError, TrackingRecord, TrackingStore};

pub const DEFAULT_DESTINATION_PREFIX: &str = "uploads/";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to load tracking state: {0}")]
    Tracking(#[source] TrackingError),
    #[error("failed to list remote files: {0}")]
    Listing(#[source] EgressError),
    #[error("failed to persist tracking state ({report}): {source}")]
    Persist {
        report: Box<SyncReport>,
        #[source]
        source: TrackingError,
    },
}

/// Why a single file was not transferred.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("download failed: {0}")]
    Download(#[source] EgressError),
    #[error("sink rejected object: {0}")]
    Sink(#[source] SinkError),
    #[error("no usable destination key: {0}")]
    Key(#[source] PathError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Init,
    Listing,
    Diffing,
    Transferring,
    Persisting,
    Done,
    Failed,
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub destination_prefix: String,
    pub concurrency: usize,
    pub persist_each_success: bool,
    pub deadline: Option<Duration>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            destination_prefix: DEFAULT_DESTINATION_PREFIX.to_string(),
            concurrency: 1,
            persist_each_success: false,
            deadline: None,
        }
    }
}

/// Outcome of diffing a listing against tracking state.
#[derive(Debug, Default)]
pub struct SyncPlan {
    pub considered: usize,
    pub pending: Vec<RemoteFile>,
    pub unchanged: usize,
    pub duplicates: usize,
}

#[derive(Debug)]
pub struct FileFailure {
    pub file_id: String,
    pub name: String,
    pub error: TransferError,
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub considered: usize,
    pub transferred: usize,
    pub skipped: usize,
    pub cancelled: usize,
    pub failures: Vec<FileFailure>,
}

impl SyncReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// True when every file that needed a transfer got one.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.cancelled == 0
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "considered={}, transferred={}, skipped={}, failed={}, cancelled={}",
            self.considered,
            self.transferred,
            self.skipped,
            self.failed(),
            self.cancelled
        )
    }
}

enum Outcome {
    Transferred,
    Failed(TransferError),
    Cancelled,
}

/// A file needs a transfer when it was never synced, carries no marker, or
/// its marker is newer than the recorded one.
pub fn needs_sync(record: &TrackingRecord, file: &RemoteFile) -> bool {
    match (record.get(&file.id), &file.last_modified) {
        (None, _) | (_, None) => true,
        (Some(recorded), Some(current)) => current.is_newer_than(recorded),
    }
}

pub fn plan_transfers(record: &TrackingRecord, files: Vec<RemoteFile>) -> SyncPlan {
    let mut plan = SyncPlan {
        considered: files.len(),
        ..SyncPlan::default()
    };
    let mut seen = HashSet::new();
    for file in files {
        if !seen.insert(file.id.clone()) {
            warn!(file_id = %file.id, name = %file.name, "duplicate file id in listing, ignoring");
            plan.duplicates += 1;
            continue;
        }
        if needs_sync(record, &file) {
            plan.pending.push(file);
        } else {
            debug!(file_id = %file.id, name = %file.name, "unchanged, skipping");
            plan.unchanged += 1;
        }
    }
    plan
}

pub struct SyncEngine<S> {
    client: EgressClient,
    tracking: TrackingStore,
    sink: S,
    options: SyncOptions,
}

impl<S: TransferSink> SyncEngine<S> {
    pub fn new(client: EgressClient, tracking: TrackingStore, sink: S) -> Self {
        Self {
            client,
            tracking,
            sink,
            options: SyncOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn destination_key(&self, file: &RemoteFile) -> Result<String, PathError> {
        destination_key(&self.options.destination_prefix, &file.name)
    }

    /// Loads tracking state and lists the workspace without transferring or
    /// persisting anything.
    pub async fn plan(&self) -> Result<SyncPlan, EngineError> {
        let record = self.tracking.load().await.map_err(EngineError::Tracking)?;
        let files = self
            .client
            .list_files()
            .await
            .map_err(EngineError::Listing)?;
        Ok(plan_transfers(&record, files))
    }

    pub async fn run(&self) -> Result<SyncReport, EngineError> {
        self.run_with_cancel(CancellationToken::new()).await
    }

    /// Runs one sync pass. Cancellation and the optional deadline stop new
    /// transfers from starting; progress made so far is still persisted.
    pub async fn run_with_cancel(
        &self,
        cancel: CancellationToken,
    ) -> Result<SyncReport, EngineError> {
        enter(SyncPhase::Init);
        let deadline = self.options.deadline.map(|limit| Instant::now() + limit);
        let mut record = self.tracking.load().await.map_err(|err| {
            enter(SyncPhase::Failed);
            error!(path = %self.tracking.path().display(), error = %err, "cannot load tracking state");
            EngineError::Tracking(err)
        })?;

        enter(SyncPhase::Listing);
        let files = self.client.list_files().await.map_err(|err| {
            enter(SyncPhase::Failed);
            error!(error = %err, "cannot list remote files");
            EngineError::Listing(err)
        })?;

        enter(SyncPhase::Diffing);
        let plan = plan_transfers(&record, files);
        let mut report = SyncReport {
            considered: plan.considered,
            skipped: plan.unchanged + plan.duplicates,
            ..SyncReport::default()
        };
        info!(
            considered = plan.considered,
            pending = plan.pending.len(),
            unchanged = plan.unchanged,
            "diff complete"
        );

        if !plan.pending.is_empty() {
            enter(SyncPhase::Transferring);
        }
        let mut outcomes = stream::iter(plan.pending)
            .map(|file| {
                let cancel = cancel.clone();
                async move {
                    if cancel.is_cancelled() || deadline.is_some_and(|d| Instant::now() >= d) {
                        return (file, Outcome::Cancelled);
                    }
                    let outcome = match self.transfer(&file).await {
                        Ok(()) => Outcome::Transferred,
                        Err(err) => Outcome::Failed(err),
                    };
                    (file, outcome)
                }
            })
            .buffer_unordered(self.options.concurrency.max(1));

        while let Some((file, outcome)) = outcomes.next().await {
            match outcome {
                Outcome::Transferred => {
                    report.transferred += 1;
                    info!(file_id = %file.id, name = %file.name, "transferred");
                    let Some(marker) = file.last_modified else {
                        continue;
                    };
                    record.insert(file.id, marker);
                    if self.options.persist_each_success
                        && let Err(err) = self.tracking.save(&record).await
                    {
                        warn!(error = %err, "incremental tracking save failed");
                    }
                }
                Outcome::Failed(err) => {
                    error!(file_id = %file.id, name = %file.name, error = %err, "transfer failed");
                    report.failures.push(FileFailure {
                        file_id: file.id,
                        name: file.name,
                        error: err,
                    });
                }
                Outcome::Cancelled => {
                    debug!(file_id = %file.id, "not started before cancellation");
                    report.cancelled += 1;
                }
            }
        }
        if report.cancelled > 0 {
            warn!(cancelled = report.cancelled, "run stopped before all transfers");
        }

        enter(SyncPhase::Persisting);
        if let Err(source) = self.tracking.save(&record).await {
            enter(SyncPhase::Failed);
            error!(
                path = %self.tracking.path().display(),
                error = %source,
                transferred = report.transferred,
                "cannot persist tracking state; transferred files will be sent again next run"
            );
            return Err(EngineError::Persist {
                report: Box::new(report),
                source,
            });
        }

        enter(SyncPhase::Done);
        info!(%report, "sync pass finished");
        Ok(report)
    }

    async fn transfer(&self, file: &RemoteFile) -> Result<(), TransferError> {
        let key = self.destination_key(file).map_err(TransferError::Key)?;
        debug!(file_id = %file.id, name = %file.name, %key, "downloading");
        let download = self
            .client
            .download(&file.id)
            .await
            .map_err(TransferError::Download)?;
        let source: ByteStream = download
            .stream
            .map(|chunk| chunk.map_err(io::Error::other))
            .boxed();
        self.sink
            .put(&key, source)
            .await
            .map_err(TransferError::Sink)
    }
}

fn enter(phase: SyncPhase) {
    debug!(?phase, "sync phase");
}
