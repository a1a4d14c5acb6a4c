use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::marker::VersionMarker;
use crate::retry::RetryPolicy;

const DEFAULT_BASE_URL: &str = "https://api.egress.com/";

#[derive(Debug, Error)]
pub enum EgressError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("base url cannot carry path segments: {0}")]
    InvalidBaseUrl(String),
    #[error("listing response is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("request exhausted after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<EgressError>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

#[derive(Clone)]
pub struct EgressClient {
    http: Client,
    base_url: Url,
    workspace_id: String,
    token: String,
    retry: RetryPolicy,
}

impl EgressClient {
    pub fn new(
        workspace_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self, EgressError> {
        Self::with_base_url(DEFAULT_BASE_URL, workspace_id, token)
    }

    pub fn with_base_url(
        base_url: &str,
        workspace_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self, EgressError> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(EgressError::InvalidBaseUrl(base_url.to_string()));
        }
        Ok(Self {
            http: Client::new(),
            base_url,
            workspace_id: workspace_id.into(),
            token: token.into(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_http(mut self, http: Client) -> Self {
        self.http = http;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    /// Lists every file in the configured workspace.
    ///
    /// The body is read inside the retry loop so a connection dropped
    /// mid-body is retried; only a complete body that fails to parse is fatal.
    pub async fn list_files(&self) -> Result<Vec<RemoteFile>, EgressError> {
        let url = self.endpoint(&["workspaces", &self.workspace_id, "files"])?;
        let body = self
            .retry
            .run("list_files", || async {
                let response = self.get_checked(url.clone()).await?;
                Ok::<_, EgressError>(response.bytes().await?)
            })
            .await?;
        let payload: FileList = serde_json::from_slice(&body)?;
        Ok(payload.files)
    }

    /// Opens a streaming download of one file.
    ///
    /// Only the request itself is retried; once headers arrive the body is
    /// handed to the caller chunk by chunk and never buffered here.
    pub async fn download(&self, file_id: &str) -> Result<Download, EgressError> {
        let url = self.endpoint(&["files", file_id, "download"])?;
        let response = self
            .retry
            .run("download", || self.get_checked(url.clone()))
            .await?;
        Ok(Download {
            content_length: response.content_length(),
            stream: response
                .bytes_stream()
                .map(|chunk| chunk.map_err(EgressError::from))
                .boxed(),
        })
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, EgressError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| EgressError::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_checked(&self, url: Url) -> Result<reqwest::Response, EgressError> {
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(EgressError::Api { status, body })
        }
    }
}

impl EgressError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            EgressError::Api { status, .. } => Some(classify_api_status(*status)),
            EgressError::Request(err) if err.is_builder() => Some(ApiErrorClass::Permanent),
            // Body read failures surface as decode errors and are transient.
            EgressError::Request(_) => Some(ApiErrorClass::Transient),
            EgressError::Malformed(_) => Some(ApiErrorClass::Permanent),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.classification(),
            Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
        )
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
    #[serde(rename = "lastModified", default)]
    pub last_modified: Option<VersionMarker>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct FileList {
    pub files: Vec<RemoteFile>,
}

pub struct Download {
    pub content_length: Option<u64>,
    pub stream: BoxStream<'static, Result<Bytes, EgressError>>,
}
