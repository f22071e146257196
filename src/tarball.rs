use crate::client::UplinkClient;
use crate::error::UplinkError;
use crate::headers::RequestContext;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, CONTENT_LENGTH};
use reqwest::StatusCode;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

// Bounded so a slow consumer backpressures the body read.
const CHANNEL_CAPACITY: usize = 8;

/// Options for [`UplinkClient::fetch_tarball`].
#[derive(Debug, Default, Clone)]
pub struct TarballOptions {
    pub etag: Option<String>,
    pub remote_address: Option<String>,
    pub headers: Option<HeaderMap>,
}

/// Items yielded by a [`TarballStream`].
///
/// When the upstream advertises a length it arrives as the first item,
/// before any body bytes.
#[derive(Debug)]
pub enum TarballEvent {
    ContentLength(u64),
    Chunk(Bytes),
}

/// Byte stream for one tarball download.
///
/// Protocol-level failures (offline uplink, 404, bad status, truncation)
/// are delivered as `Err` items rather than thrown by `fetch_tarball`, so
/// the caller always gets a stream to wire up first. Dropping the stream
/// aborts the transfer and returns the connection to the pool.
#[derive(Debug)]
pub struct TarballStream {
    events: ReceiverStream<Result<TarballEvent, UplinkError>>,
    cancel: CancellationToken,
}

impl TarballStream {
    pub fn abort(&self) {
        self.cancel.cancel();
    }
}

impl Drop for TarballStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Stream for TarballStream {
    type Item = Result<TarballEvent, UplinkError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

impl UplinkClient {
    /// Streams a tarball from `url` (an absolute URL taken from a manifest's
    /// `dist.tarball` field).
    pub fn fetch_tarball(self: &Arc<Self>, url: &str, options: TarballOptions) -> TarballStream {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let client = Arc::clone(self);
        let url = url.to_string();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            if let Err(err) = client
                .stream_tarball(&url, &options, &tx, &task_cancel)
                .await
            {
                let _ = tx.send(Err(err)).await;
            }
        });

        TarballStream {
            events: ReceiverStream::new(rx),
            cancel,
        }
    }

    async fn stream_tarball(
        &self,
        url: &str,
        options: &TarballOptions,
        tx: &mpsc::Sender<Result<TarballEvent, UplinkError>>,
        cancel: &CancellationToken,
    ) -> Result<(), UplinkError> {
        self.health.ensure_online()?;

        let ctx = RequestContext {
            caller_headers: options.headers.as_ref(),
            etag: options.etag.as_deref(),
            remote_address: options.remote_address.as_deref(),
            inject_auth: true,
        };
        let headers = self.headers.build(&ctx)?;

        let _permit = self
            .concurrency
            .acquire()
            .await
            .map_err(|_| UplinkError::config("uplink client is shutting down"))?;
        self.health.mark_request();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            response = self.http.get(url).headers(headers).send() => response,
        };
        let response = match response {
            Ok(response) => response,
            Err(err) => {
                self.health.on_failure();
                warn!(uplink = self.upname(), error = %err, "uplink tarball request failed");
                return Err(err.into());
            }
        };

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            self.health.on_success();
            debug!(uplink = self.upname(), "tarball not found on uplink");
            return Err(UplinkError::FileNotFound);
        }
        if status.is_server_error() {
            self.health.on_failure();
            warn!(uplink = self.upname(), status = status.as_u16(), "uplink tarball error status");
            return Err(UplinkError::BadStatus {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            self.health.on_success();
            warn!(uplink = self.upname(), status = status.as_u16(), "unexpected uplink tarball status");
            return Err(UplinkError::BadStatus {
                status: status.as_u16(),
            });
        }
        self.health.on_success();

        let advertised = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());
        if let Some(length) = advertised {
            if tx.send(Ok(TarballEvent::ContentLength(length))).await.is_err() {
                return Ok(());
            }
        }

        let mut body = response.bytes_stream();
        let mut received = 0u64;
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                chunk = body.next() => chunk,
            };
            match chunk {
                Some(Ok(bytes)) => {
                    received += bytes.len() as u64;
                    if tx.send(Ok(TarballEvent::Chunk(bytes))).await.is_err() {
                        // Consumer went away; dropping the body aborts the
                        // transfer.
                        return Ok(());
                    }
                }
                Some(Err(err)) => {
                    // HTTP/1.1 framing reports truncation as a body error;
                    // surface it as a length mismatch when we know how many
                    // bytes were promised.
                    if let Some(expected) = advertised {
                        if received < expected {
                            return Err(UplinkError::ContentLengthMismatch {
                                expected,
                                actual: received,
                            });
                        }
                    }
                    return Err(err.into());
                }
                None => break,
            }
        }

        if let Some(expected) = advertised {
            if received != expected {
                return Err(UplinkError::ContentLengthMismatch {
                    expected,
                    actual: received,
                });
            }
        }
        debug!(uplink = self.upname(), bytes = received, "tarball transfer complete");
        Ok(())
    }
}
