use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use egress_core::VersionMarker;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use super::paths::partial_path;

/// File id to the version marker last transferred successfully.
pub type TrackingRecord = BTreeMap<String, VersionMarker>;

const DEFAULT_FILE_NAME: &str = "downloaded_files.json";

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("tracking state at {path} is malformed: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("XDG data directory is unavailable")]
    MissingDataDir,
}

/// Durable high-water marks, one JSON document per workspace.
#[derive(Debug, Clone)]
pub struct TrackingStore {
    path: PathBuf,
}

impl TrackingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store under the user data directory, one file per workspace.
    pub fn new_default(workspace_id: &str) -> Result<Self, TrackingError> {
        let data_dir = dirs::data_dir().ok_or(TrackingError::MissingDataDir)?;
        Ok(Self::new(default_tracking_path(&data_dir, workspace_id)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the persisted record. A missing file is a first run and yields
    /// an empty record.
    pub async fn load(&self) -> Result<TrackingRecord, TrackingError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(TrackingRecord::new());
            }
            Err(source) => return Err(self.io_error(&self.path, source)),
        };
        serde_json::from_slice(&raw).map_err(|source| TrackingError::Malformed {
            path: self.path.clone(),
            source,
        })
    }

    /// Replaces the persisted record atomically: the new document is
    /// written and fsynced next to the target, then renamed over it.
    pub async fn save(&self, record: &TrackingRecord) -> Result<(), TrackingError> {
        let payload =
            serde_json::to_vec_pretty(record).map_err(|source| TrackingError::Malformed {
                path: self.path.clone(),
                source,
            })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| self.io_error(parent, source))?;
        }

        let partial = partial_path(&self.path);
        if let Err(source) = write_synced(&partial, &payload).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(self.io_error(&partial, source));
        }
        tokio::fs::rename(&partial, &self.path)
            .await
            .map_err(|source| self.io_error(&self.path, source))
    }

    fn io_error(&self, path: &Path, source: io::Error) -> TrackingError {
        TrackingError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

async fn write_synced(path: &Path, payload: &[u8]) -> io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(payload).await?;
    file.flush().await?;
    file.sync_all().await
}

fn default_tracking_path(data_dir: &Path, workspace_id: &str) -> PathBuf {
    data_dir
        .join("egress-sync")
        .join(workspace_dir_name(workspace_id))
        .join(DEFAULT_FILE_NAME)
}

/// Workspace id reduced to a single safe path component.
fn workspace_dir_name(workspace_id: &str) -> String {
    let name: String = workspace_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match name.as_str() {
        "" | "." | ".." => format!("_{name}"),
        _ => name,
    }
}
