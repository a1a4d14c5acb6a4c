use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use url::Url;

use super::paths::{PathError, local_path_for, partial_path};

/// Chunked payload handed from a download to a sink.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid object key: {0}")]
    Key(#[from] PathError),
    #[error("object store endpoint cannot carry path segments: {0}")]
    InvalidEndpoint(String),
    #[error("object store returned {status}: {body}")]
    Rejected { status: StatusCode, body: String },
}

/// Destination store that commits a byte stream under a key.
///
/// `put` returns only once the store has acknowledged the whole object.
#[async_trait]
pub trait TransferSink: Send + Sync {
    async fn put(&self, key: &str, source: ByteStream) -> Result<(), SinkError>;
}

#[async_trait]
impl<T: TransferSink + ?Sized> TransferSink for Box<T> {
    async fn put(&self, key: &str, source: ByteStream) -> Result<(), SinkError> {
        (**self).put(key, source).await
    }
}

/// Path-style object store reachable over HTTP (`PUT {endpoint}/{bucket}/{key}`).
#[derive(Clone)]
pub struct HttpObjectSink {
    http: Client,
    endpoint: Url,
    bucket: String,
    token: Option<String>,
}

impl HttpObjectSink {
    pub fn new(endpoint: &str, bucket: impl Into<String>) -> Result<Self, SinkError> {
        let endpoint = Url::parse(endpoint)?;
        if endpoint.cannot_be_a_base() {
            return Err(SinkError::InvalidEndpoint(endpoint.to_string()));
        }
        Ok(Self {
            http: Client::new(),
            endpoint,
            bucket: bucket.into(),
            token: None,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_http(mut self, http: Client) -> Self {
        self.http = http;
        self
    }

    fn object_url(&self, key: &str) -> Result<Url, SinkError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| SinkError::InvalidEndpoint(self.endpoint.to_string()))?
            .pop_if_empty()
            .push(&self.bucket)
            .extend(key.split('/').filter(|part| !part.is_empty()));
        Ok(url)
    }
}

#[async_trait]
impl TransferSink for HttpObjectSink {
    async fn put(&self, key: &str, source: ByteStream) -> Result<(), SinkError> {
        let url = self.object_url(key)?;
        let mut request = self
            .http
            .put(url)
            .body(reqwest::Body::wrap_stream(source));
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }
        let response = request.send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(SinkError::Rejected { status, body })
        }
    }
}

/// Local directory mirror. Objects appear under their final name only
/// after the whole stream has been written and synced.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl TransferSink for DirectorySink {
    async fn put(&self, key: &str, source: ByteStream) -> Result<(), SinkError> {
        let target = local_path_for(&self.root, key)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let partial = partial_path(&target);
        if let Err(err) = write_stream(&partial, source).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(err.into());
        }
        tokio::fs::rename(partial, target).await?;
        Ok(())
    }
}

async fn write_stream(path: &Path, mut source: ByteStream) -> io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    while let Some(chunk) = source.next().await {
        file.write_all(&chunk?).await?;
    }
    file.flush().await?;
    file.sync_all().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use tempfile::tempdir;
    use wiremock::matchers::{body_bytes, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn chunks(parts: &[&'static [u8]]) -> ByteStream {
        stream::iter(
            parts
                .iter()
                .map(|part| Ok(Bytes::from_static(part)))
                .collect::<Vec<_>>(),
        )
        .boxed()
    }

    #[tokio::test]
    async fn http_sink_puts_streamed_body_under_bucket_and_key() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/archive/uploads/Docs/a.txt"))
            .and(header("authorization", "Bearer sink-token"))
            .and(body_bytes(b"hello world".to_vec()))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let sink = HttpObjectSink::new(&server.uri(), "archive")
            .unwrap()
            .with_token("sink-token");
        sink.put("uploads/Docs/a.txt", chunks(&[b"hello ", b"world"]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn http_sink_reports_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(403).set_body_string("denied"))
            .mount(&server)
            .await;

        let sink = HttpObjectSink::new(&server.uri(), "archive").unwrap();
        let err = sink
            .put("uploads/a.txt", chunks(&[b"x"]))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SinkError::Rejected { status, ref body } if status == StatusCode::FORBIDDEN && body == "denied"
        ));
    }

    #[tokio::test]
    async fn directory_sink_writes_object() {
        let dir = tempdir().unwrap();
        let sink = DirectorySink::new(dir.path());

        sink.put("uploads/nested/a.txt", chunks(&[b"pay", b"load"]))
            .await
            .unwrap();

        let target = dir.path().join("uploads/nested/a.txt");
        assert_eq!(std::fs::read(&target).unwrap(), b"payload");
        assert!(!partial_path(&target).exists());
    }

    #[tokio::test]
    async fn directory_sink_discards_partial_on_stream_error() {
        let dir = tempdir().unwrap();
        let sink = DirectorySink::new(dir.path());
        let failing: ByteStream = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::other("connection reset")),
        ])
        .boxed();

        let err = sink.put("uploads/a.txt", failing).await.unwrap_err();

        assert!(matches!(err, SinkError::Io(_)));
        let target = dir.path().join("uploads/a.txt");
        assert!(!target.exists());
        assert!(!partial_path(&target).exists());
    }

    #[tokio::test]
    async fn directory_sink_rejects_escaping_keys() {
        let dir = tempdir().unwrap();
        let sink = DirectorySink::new(dir.path());
        let err = sink.put("../outside", chunks(&[b"x"])).await.unwrap_err();
        assert!(matches!(err, SinkError::Key(_)));
    }
}
