mod client;
mod marker;
mod retry;

pub use client::{ApiErrorClass, Download, EgressClient, EgressError, FileList, RemoteFile};
pub use marker::VersionMarker;
pub use retry::{DEFAULT_MAX_ATTEMPTS, RetryPolicy};
