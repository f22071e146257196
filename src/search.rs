use crate::client::UplinkClient;
use crate::error::UplinkError;
use crate::headers::RequestContext;
use crate::urls;
use futures::Stream;
use reqwest::header::HeaderMap;
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const CHANNEL_CAPACITY: usize = 16;

/// Options for [`UplinkClient::search`].
#[derive(Debug, Default, Clone)]
pub struct SearchOptions {
    /// Request path relative to the uplink base, e.g. `/-/v1/search`.
    pub url: String,
    /// Raw query string to append when the path carries none.
    pub query: Option<String>,
    /// Cancelling this token aborts the in-flight request and tears down
    /// the stream.
    pub abort: CancellationToken,
    /// Headers forwarded from the downstream request.
    pub headers: Option<HeaderMap>,
}

/// Object stream over the `objects` array of an upstream search response.
/// The envelope's `total` and `date` fields are dropped.
#[derive(Debug)]
pub struct SearchStream {
    items: ReceiverStream<Result<Value, UplinkError>>,
    abort: CancellationToken,
}

impl SearchStream {
    pub fn abort(&self) {
        self.abort.cancel();
    }
}

impl Stream for SearchStream {
    type Item = Result<Value, UplinkError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.items).poll_next(cx)
    }
}

impl UplinkClient {
    /// Runs a federated search against the uplink. Search endpoints are
    /// public; configured credentials are not forwarded here.
    pub fn search(self: &Arc<Self>, options: SearchOptions) -> SearchStream {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let client = Arc::clone(self);
        let abort = options.abort.clone();

        tokio::spawn(async move {
            if let Err(err) = client.stream_search(&options, &tx).await {
                let _ = tx.send(Err(err)).await;
            }
        });

        SearchStream {
            items: ReceiverStream::new(rx),
            abort,
        }
    }

    async fn stream_search(
        &self,
        options: &SearchOptions,
        tx: &mpsc::Sender<Result<Value, UplinkError>>,
    ) -> Result<(), UplinkError> {
        self.health.ensure_online()?;

        let ctx = RequestContext {
            caller_headers: options.headers.as_ref(),
            inject_auth: false,
            ..RequestContext::default()
        };
        let headers = self.headers.build(&ctx)?;

        let mut target = urls::join_collapsing(self.base_url(), &options.url);
        if let Some(query) = &options.query {
            if !query.is_empty() {
                target.push(if target.contains('?') { '&' } else { '?' });
                target.push_str(query);
            }
        }

        let _permit = self
            .concurrency
            .acquire()
            .await
            .map_err(|_| UplinkError::config("uplink client is shutting down"))?;
        self.health.mark_request();

        let cancel = &options.abort;
        let response = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            response = self.http.get(target.as_str()).headers(headers).send() => response,
        };
        let response = match response {
            Ok(response) => response,
            Err(err) => {
                self.health.on_failure();
                warn!(uplink = self.upname(), error = %err, "uplink search request failed");
                return Err(err.into());
            }
        };

        let status = response.status();
        if status.as_u16() >= 400 {
            if status.is_server_error() {
                self.health.on_failure();
            } else {
                self.health.on_success();
            }
            warn!(uplink = self.upname(), status = status.as_u16(), "unexpected uplink search status");
            return Err(UplinkError::BadStatus {
                status: status.as_u16(),
            });
        }
        self.health.on_success();

        let body = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            body = response.json::<Value>() => body?,
        };
        let objects = body
            .get("objects")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        debug!(uplink = self.upname(), result_count = objects.len(), "fetched upstream search page");

        for item in objects {
            let delivered = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                delivered = tx.send(Ok(item)) => delivered,
            };
            if delivered.is_err() {
                return Ok(());
            }
        }
        Ok(())
    }
}
