//! Streaming HTTP downloads.
//!
//! A download is a single GET whose body is handed out as a forward-only
//! byte stream; nothing is buffered beyond what the transport holds. The
//! stream ends early once the request's cancellation token fires.

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Settings;
use crate::error::{GetToolError, Result};

/// An opened download.
pub struct Download {
    /// Response body chunks.
    pub body: BoxStream<'static, io::Result<Bytes>>,
    /// Declared body length in bytes, `0` when the server did not send one.
    pub length: u64,
}

impl std::fmt::Debug for Download {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Download")
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

/// A transport failure while the body was being read.
///
/// Travels inside an `io::Error` through the decompressors so the extractor
/// can report it as a download failure.
#[derive(Debug, Error)]
#[error("failed to read the response body: {message}")]
pub(crate) struct TransferError {
    pub(crate) url: String,
    pub(crate) message: String,
}

/// Recovers a download failure from an error raised while reading the body.
pub(crate) fn transfer_failure(err: &io::Error) -> Option<GetToolError> {
    let transfer = err.get_ref()?.downcast_ref::<TransferError>()?;
    Some(GetToolError::DownloadFailed {
        url: transfer.url.clone(),
        status: None,
        reason: transfer.to_string(),
    })
}

/// HTTP client for tool archives.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
}

impl Downloader {
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .build()
            .map_err(|e| GetToolError::io("Failed to build the HTTP client", io::Error::other(e)))?;

        Ok(Self { client })
    }

    /// Issues the GET request and returns the body stream.
    ///
    /// # Errors
    ///
    /// - `Cancelled` if the token fires before the response headers arrive.
    /// - `DownloadFailed` on transport errors or a non-success status.
    pub async fn open(&self, url: &str, cancel: &CancellationToken) -> Result<Download> {
        info!("Downloading {}", url);

        let request = self.client.get(url).send();
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Download of {} cancelled before response", url);
                return Err(GetToolError::Cancelled);
            }
            response = request => response.map_err(|e| GetToolError::DownloadFailed {
                url: url.to_string(),
                status: None,
                reason: e.to_string(),
            })?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(GetToolError::DownloadFailed {
                url: url.to_string(),
                status: Some(status.as_u16()),
                reason: format!(
                    "unexpected status {} {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown error")
                ),
            });
        }

        let length = response.content_length().unwrap_or(0);
        debug!("Content-Length: {}", length);

        let source = url.to_string();
        let body = response
            .bytes_stream()
            .map_err(move |e| {
                io::Error::other(TransferError {
                    url: source.clone(),
                    message: e.to_string(),
                })
            })
            .take_until(cancel.clone().cancelled_owned())
            .boxed();

        Ok(Download { body, length })
    }
}
