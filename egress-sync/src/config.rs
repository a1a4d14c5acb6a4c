use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use egress_core::DEFAULT_MAX_ATTEMPTS;

use crate::sync::engine::{DEFAULT_DESTINATION_PREFIX, SyncOptions};

const DEFAULT_API_BASE_URL: &str = "https://api.egress.com/";
const DEFAULT_BACKOFF_BASE_MS: u64 = 1000;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
const DEFAULT_CONCURRENCY: u64 = 1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkConfig {
    Http {
        endpoint: String,
        bucket: String,
        token: Option<String>,
    },
    Directory(PathBuf),
}

#[derive(Clone)]
pub struct SyncConfig {
    pub api_base_url: String,
    pub workspace_id: String,
    pub auth_token: String,
    pub sink: SinkConfig,
    /// `None` selects the per-user data directory.
    pub tracking_file: Option<PathBuf>,
    pub destination_prefix: String,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub request_timeout: Duration,
    pub concurrency: usize,
    pub persist_each_success: bool,
    pub run_deadline: Option<Duration>,
}

impl SyncConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let home = dirs::home_dir();
        let expand = |value: String| match &home {
            Some(home) => expand_with_home(&value, home),
            None => PathBuf::from(value),
        };

        let workspace_id = required(&lookup, "EGRESS_WORKSPACE_ID")?;
        let auth_token = required(&lookup, "EGRESS_AUTH_TOKEN")?;
        let sink = match (
            non_empty(&lookup, "EGRESS_SINK_DIR"),
            non_empty(&lookup, "EGRESS_SINK_ENDPOINT"),
        ) {
            (Some(dir), None) => SinkConfig::Directory(expand(dir)),
            (None, Some(endpoint)) => SinkConfig::Http {
                endpoint,
                bucket: required(&lookup, "EGRESS_SINK_BUCKET")
                    .context("EGRESS_SINK_ENDPOINT requires a bucket")?,
                token: non_empty(&lookup, "EGRESS_SINK_TOKEN"),
            },
            (Some(_), Some(_)) => {
                anyhow::bail!("set either EGRESS_SINK_DIR or EGRESS_SINK_ENDPOINT, not both")
            }
            (None, None) => anyhow::bail!("EGRESS_SINK_ENDPOINT or EGRESS_SINK_DIR is not set"),
        };

        Ok(Self {
            api_base_url: non_empty(&lookup, "EGRESS_API_BASE_URL")
                .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
            workspace_id,
            auth_token,
            sink,
            tracking_file: non_empty(&lookup, "EGRESS_TRACKING_FILE").map(expand),
            destination_prefix: lookup("EGRESS_DEST_PREFIX")
                .unwrap_or_else(|| DEFAULT_DESTINATION_PREFIX.to_string()),
            max_attempts: read_u64(&lookup, "EGRESS_MAX_ATTEMPTS", u64::from(DEFAULT_MAX_ATTEMPTS))
                .min(u64::from(u32::MAX)) as u32,
            backoff_base: Duration::from_millis(read_u64(
                &lookup,
                "EGRESS_BACKOFF_BASE_MS",
                DEFAULT_BACKOFF_BASE_MS,
            )),
            request_timeout: Duration::from_secs(read_u64(
                &lookup,
                "EGRESS_REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )),
            concurrency: read_u64(&lookup, "EGRESS_CONCURRENCY", DEFAULT_CONCURRENCY) as usize,
            persist_each_success: read_bool(&lookup, "EGRESS_PERSIST_EACH", false),
            run_deadline: lookup("EGRESS_RUN_DEADLINE_SECS")
                .and_then(|value| value.trim().parse::<u64>().ok())
                .filter(|value| *value > 0)
                .map(Duration::from_secs),
        })
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            destination_prefix: self.destination_prefix.clone(),
            concurrency: self.concurrency,
            persist_each_success: self.persist_each_success,
            deadline: self.run_deadline,
        }
    }
}

fn required<F>(lookup: &F, name: &str) -> anyhow::Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    non_empty(lookup, name).with_context(|| format!("{name} is not set"))
}

fn non_empty<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name).filter(|value| !value.trim().is_empty())
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn read_u64<F>(lookup: &F, name: &str, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn read_bool<F>(lookup: &F, name: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}
