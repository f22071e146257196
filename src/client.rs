use crate::config::{Interval, MainConfig, UplinkConfig};
use crate::error::UplinkError;
use crate::headers::{HeaderBuilder, RequestContext};
use crate::health::HealthTracker;
use crate::interval::parse_interval;
use crate::proxy::resolve_proxy;
use crate::urls;
use reqwest::header::{HeaderMap, ETAG};
use reqwest::{Certificate, Method, Proxy, StatusCode, Url};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_MAXAGE_MS: u64 = 120_000;
const DEFAULT_FAIL_TIMEOUT_MS: u64 = 300_000;
const DEFAULT_MAX_FAILS: u32 = 2;
const MAX_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const MAX_REDIRECTS: usize = 3;

/// Options for [`UplinkClient::get_remote_metadata`].
#[derive(Debug, Default, Clone)]
pub struct MetadataOptions {
    /// Cached etag; a match upstream yields `NotModified`.
    pub etag: Option<String>,
    /// Downstream client address, forwarded when not behind a proxy.
    pub remote_address: Option<String>,
    /// Request method, GET when unset.
    pub method: Option<Method>,
    /// Extra attempts on transport errors and 5xx responses.
    pub retry: Option<u32>,
    /// Per-request override of the configured timeout.
    pub timeout: Option<Duration>,
    /// Headers forwarded from the downstream request.
    pub headers: Option<HeaderMap>,
}

/// Proxy client for one configured upstream registry.
///
/// Constructed once per uplink at server start and shared for the process
/// lifetime; all fields are immutable after construction except the health
/// state, which the tracker serializes internally.
#[derive(Debug)]
pub struct UplinkClient {
    upname: String,
    base_url: String,
    maxage: Duration,
    timeout: Duration,
    proxy_url: Option<String>,
    pub(crate) http: reqwest::Client,
    pub(crate) headers: HeaderBuilder,
    pub(crate) health: HealthTracker,
    pub(crate) concurrency: Arc<Semaphore>,
}

impl UplinkClient {
    /// Builds the client from parsed configuration. Performs no network
    /// I/O; the CA bundle (when configured) is the only filesystem touch.
    #[instrument(skip(upname, config, main), fields(uplink = %upname.as_ref(), url = %config.url))]
    pub fn new(
        upname: impl AsRef<str>,
        config: &UplinkConfig,
        main: &MainConfig,
    ) -> Result<Self, UplinkError> {
        let upname = upname.as_ref().to_string();
        let base_url = config.url.trim_end_matches('/').to_string();
        let parsed = Url::parse(&base_url)
            .map_err(|err| UplinkError::config(format!("invalid url '{base_url}': {err}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| UplinkError::config(format!("url '{base_url}' has no host")))?
            .to_string();
        let https = parsed.scheme() == "https";

        let timeout = interval_or(&config.timeout, DEFAULT_TIMEOUT_MS)?;
        let maxage = interval_or(&config.maxage, DEFAULT_MAXAGE_MS)?;
        let fail_timeout = interval_or(&config.fail_timeout, DEFAULT_FAIL_TIMEOUT_MS)?;
        let max_fails = config.max_fails.unwrap_or(DEFAULT_MAX_FAILS).max(1);
        warn_on_suspicious_timeout(&upname, &config.timeout);

        let proxy_url = resolve_proxy(&host, https, config, main);
        let auth = config.auth.as_ref().map(|auth| auth.resolve()).transpose()?;
        let headers = HeaderBuilder::new(main, auth, &config.headers, proxy_url.is_some())?;

        let http = build_http_client(config, timeout, proxy_url.as_deref())?;
        let health = HealthTracker::new(upname.clone(), max_fails, fail_timeout);
        let concurrency = Arc::new(Semaphore::new(config.agent_options.max_sockets.max(1)));

        debug!(
            timeout_ms = timeout.as_millis() as u64,
            max_fails,
            fail_timeout_ms = fail_timeout.as_millis() as u64,
            proxied = proxy_url.is_some(),
            "initialized uplink client"
        );

        Ok(Self {
            upname,
            base_url,
            maxage,
            timeout,
            proxy_url,
            http,
            headers,
            health,
            concurrency,
        })
    }

    pub fn upname(&self) -> &str {
        &self.upname
    }

    /// Base URL in stored form, never with a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// How long a cached copy fetched from this uplink stays fresh; the
    /// enclosing cache layer consults this before calling back in.
    pub fn maxage(&self) -> Duration {
        self.maxage
    }

    pub fn proxy_url(&self) -> Option<&str> {
        self.proxy_url.as_deref()
    }

    pub fn is_offline(&self) -> bool {
        self.health.is_offline()
    }

    pub fn failed_requests(&self) -> u32 {
        self.health.failed_requests()
    }

    /// Fetches the package manifest for `name`.
    ///
    /// Returns the decoded JSON body and the response etag (empty when the
    /// upstream sent none). A 304 against `options.etag` surfaces as
    /// `NotModified` so the cache layer can reuse its copy.
    #[instrument(skip(self, options), fields(uplink = %self.upname, package = name))]
    pub async fn get_remote_metadata(
        &self,
        name: &str,
        options: &MetadataOptions,
    ) -> Result<(Value, String), UplinkError> {
        self.health.ensure_online()?;

        let ctx = RequestContext {
            caller_headers: options.headers.as_ref(),
            etag: options.etag.as_deref(),
            remote_address: options.remote_address.as_deref(),
            inject_auth: true,
        };
        let headers = self.headers.build(&ctx)?;
        let url = urls::join(&self.base_url, &urls::encode_package(name));
        let method = options.method.clone().unwrap_or(Method::GET);
        let timeout = options.timeout.unwrap_or(self.timeout);
        let attempts = options.retry.unwrap_or(0) + 1;

        let _permit = self
            .concurrency
            .acquire()
            .await
            .map_err(|_| UplinkError::config("uplink client is shutting down"))?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            self.health.mark_request();
            let response = self
                .http
                .request(method.clone(), url.as_str())
                .headers(headers.clone())
                .timeout(timeout)
                .send()
                .await;

            let response = match response {
                Ok(response) => response,
                Err(err) => {
                    self.health.on_failure();
                    if attempt < attempts {
                        debug!(attempt, error = %err, "uplink request failed, retrying");
                        continue;
                    }
                    return Err(err.into());
                }
            };

            let status = response.status();
            if status.is_server_error() {
                self.health.on_failure();
                if attempt < attempts {
                    debug!(attempt, status = status.as_u16(), "uplink error status, retrying");
                    continue;
                }
                return Err(UplinkError::BadStatus {
                    status: status.as_u16(),
                });
            }

            // Any non-5xx response means the uplink answered.
            self.health.on_success();

            if status == StatusCode::NOT_MODIFIED {
                debug!("remote copy not modified");
                return Err(UplinkError::NotModified);
            }
            if status == StatusCode::NOT_FOUND {
                debug!("package not found on uplink");
                return Err(UplinkError::PackageNotFound);
            }
            if !status.is_success() {
                warn!(status = status.as_u16(), "unexpected uplink metadata status");
                return Err(UplinkError::BadStatus {
                    status: status.as_u16(),
                });
            }

            let etag = response
                .headers()
                .get(ETAG)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_string();
            let body = response.json::<Value>().await?;
            debug!(etag = etag.as_str(), "fetched manifest from uplink");
            return Ok((body, etag));
        }
    }
}

fn interval_or(value: &Option<Interval>, default_ms: u64) -> Result<Duration, UplinkError> {
    let ms = match value {
        Some(interval) => parse_interval(interval)?,
        None => default_ms,
    };
    Ok(Duration::from_millis(ms))
}

// Legacy heuristic: a bare-number timeout that large is almost certainly
// seconds misread as milliseconds.
fn warn_on_suspicious_timeout(upname: &str, timeout: &Option<Interval>) {
    if let Some(Interval::Millis(ms)) = timeout {
        if *ms >= 1000 {
            warn!(
                uplink = upname,
                timeout_ms = ms,
                "timeout is too big, assuming the value is in milliseconds; use '30s' style literals"
            );
        }
    }
}

fn build_http_client(
    config: &UplinkConfig,
    timeout: Duration,
    proxy_url: Option<&str>,
) -> Result<reqwest::Client, UplinkError> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(timeout.min(MAX_CONNECT_TIMEOUT))
        .timeout(timeout)
        .pool_max_idle_per_host(config.agent_options.max_free_sockets)
        .http1_only()
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS));

    if config.agent_options.keep_alive {
        builder = builder
            .tcp_keepalive(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(15));
    } else {
        builder = builder.pool_max_idle_per_host(0);
    }

    if !config.strict_ssl {
        builder = builder.danger_accept_invalid_certs(true);
    }

    if let Some(path) = &config.ca {
        let pem = std::fs::read(path).map_err(|err| {
            UplinkError::config(format!("failed to read ca bundle {}: {err}", path.display()))
        })?;
        let certs = Certificate::from_pem_bundle(&pem).map_err(|err| {
            UplinkError::config(format!("invalid ca bundle {}: {err}", path.display()))
        })?;
        for cert in certs {
            builder = builder.add_root_certificate(cert);
        }
    }

    match proxy_url {
        Some(url) => {
            let proxy = Proxy::all(url)
                .map_err(|err| UplinkError::config(format!("invalid proxy url '{url}': {err}")))?;
            builder = builder.proxy(proxy);
        }
        // The selector is authoritative; keep reqwest from sniffing the
        // process environment on its own.
        None => builder = builder.no_proxy(),
    }

    builder.build().map_err(UplinkError::Transport)
}
