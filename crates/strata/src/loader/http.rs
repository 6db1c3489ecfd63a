//! # HTTP Loader
//!
//! The default loader. Streams the response body with progress reporting,
//! retries transient failures with exponential back-off, and can share one
//! in-flight fetch between concurrent requests for the same URL.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::future::{BoxFuture, Shared};
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::HttpLoaderConfig;
use crate::context::RequestContext;
use crate::error::FetchError;
use crate::identifier::ResourceId;
use crate::loader::provider::{LoadRequest, LoaderEvents, ResourceLoader};

/// Cap on the buffer preallocated from `Content-Length`
const MAX_PREALLOCATION: u64 = 8 * 1024 * 1024;

type SharedFetch = Shared<BoxFuture<'static, Result<Bytes, FetchError>>>;
type InFlightMap = Arc<Mutex<HashMap<Url, InFlight>>>;

/// A fetch shared between every request currently waiting on it
struct InFlight {
    id: u64,
    fetch: SharedFetch,
    waiters: usize,
    abort: AbortHandle,
}

/// Held by each request joined to an in-flight fetch. The last one to go
/// aborts the fetch.
struct Waiter {
    in_flight: InFlightMap,
    url: Url,
    id: u64,
}

impl Drop for Waiter {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock();
        let Some(entry) = in_flight.get_mut(&self.url) else {
            return;
        };
        if entry.id != self.id {
            return;
        }
        entry.waiters -= 1;
        if entry.waiters == 0 {
            if let Some(entry) = in_flight.remove(&self.url) {
                debug!(url = %self.url, "Last waiter left, aborting shared fetch");
                entry.abort.abort();
            }
        }
    }
}

/// Create a reqwest Client with the provided configuration
pub fn create_client(config: &HttpLoaderConfig) -> Result<Client, FetchError> {
    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(5)
        .user_agent(&config.user_agent)
        .default_headers(config.headers.clone())
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if !config.timeout.is_zero() {
        client_builder = client_builder.timeout(config.timeout);
    }

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    if !config.pool_idle_timeout.is_zero() {
        client_builder = client_builder.pool_idle_timeout(config.pool_idle_timeout);
    }

    if let Some(proxy_url) = &config.proxy_url {
        // Explicit proxy configuration takes precedence
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|e| FetchError::InvalidUrl(format!("Invalid proxy URL {proxy_url}: {e}")))?;
        client_builder = client_builder.proxy(proxy);
        info!(proxy_url = %proxy_url, "Using explicitly configured proxy");
    } else if !config.use_system_proxy {
        client_builder = client_builder.no_proxy();
        debug!("Proxy disabled for loads");
    }

    client_builder.build().map_err(FetchError::from)
}

/// Loads `http` and `https` identifiers with reqwest
#[derive(Clone)]
pub struct HttpLoader {
    client: Client,
    config: Arc<HttpLoaderConfig>,
    in_flight: InFlightMap,
    next_fetch: Arc<AtomicU64>,
}

impl HttpLoader {
    pub fn new(config: HttpLoaderConfig) -> Result<Self, FetchError> {
        let client = create_client(&config)?;
        Ok(Self::with_client(client, config))
    }

    /// Use an existing client; `config` still drives retries and coalescing
    pub fn with_client(client: Client, config: HttpLoaderConfig) -> Self {
        Self {
            client,
            config: Arc::new(config),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_fetch: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn config(&self) -> &HttpLoaderConfig {
        &self.config
    }

    /// Number of fetches currently shared between requests
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Fetches with retry logic.
    /// Retries on connect errors, timeouts and server errors (5xx, 429).
    async fn fetch_with_retries(
        &self,
        url: &Url,
        headers: &HeaderMap,
        progressive: bool,
        events: &LoaderEvents,
    ) -> Result<Bytes, FetchError> {
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            let error = match self.fetch_once(url, headers, progressive, events).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => e,
            };

            if !error.is_retryable() {
                return Err(error);
            }
            if attempts > self.config.max_retries {
                warn!(
                    url = %url,
                    attempts,
                    error = %error,
                    "Max retries exceeded"
                );
                return Err(error);
            }

            let delay = self.config.retry_delay_base * 2_u32.pow(attempts.saturating_sub(1).min(16));
            debug!(url = %url, attempt = attempts, delay = ?delay, error = %error, "Retrying fetch");
            tokio::time::sleep(delay).await;
        }
    }

    async fn fetch_once(
        &self,
        url: &Url,
        headers: &HeaderMap,
        progressive: bool,
        events: &LoaderEvents,
    ) -> Result<Bytes, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .headers(headers.clone())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(match status {
                StatusCode::NOT_FOUND | StatusCode::GONE => FetchError::NotFound(url.to_string()),
                _ => FetchError::Status {
                    code: status.as_u16(),
                    url: url.to_string(),
                },
            });
        }

        let expected = response.content_length();
        let mut buffer =
            BytesMut::with_capacity(expected.unwrap_or(0).min(MAX_PREALLOCATION) as usize);
        let mut last_partial = 0;
        let mut stream = response.bytes_stream();

        events.progress(0, expected);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            buffer.extend_from_slice(&chunk);
            events.progress(buffer.len() as u64, expected);

            if progressive && buffer.len() - last_partial >= self.config.partial_threshold {
                last_partial = buffer.len();
                events.partial(Bytes::copy_from_slice(&buffer));
            }
        }

        debug!(url = %url, size = buffer.len(), "Fetched resource");
        Ok(buffer.freeze())
    }

    /// Join an in-flight fetch of `url`, or start one that later requests can join.
    ///
    /// The fetch runs on its own task so that one requester leaving does not
    /// fail the others; it is aborted once no requester is left.
    async fn fetch_shared(&self, url: Url, events: LoaderEvents) -> Result<Bytes, FetchError> {
        let (shared, _waiter) = {
            let mut in_flight = self.in_flight.lock();
            let (id, fetch) = match in_flight.get_mut(&url) {
                Some(existing) => {
                    debug!(url = %url, waiters = existing.waiters, "Joining in-flight fetch");
                    existing.waiters += 1;
                    (existing.id, existing.fetch.clone())
                }
                None => {
                    let id = self.next_fetch.fetch_add(1, Ordering::Relaxed);
                    let this = self.clone();
                    let fetch_url = url.clone();
                    // Only the first requester sees progress
                    let handle = tokio::spawn(async move {
                        let result = this
                            .fetch_with_retries(&fetch_url, &HeaderMap::new(), false, &events)
                            .await;
                        let mut in_flight = this.in_flight.lock();
                        if in_flight.get(&fetch_url).is_some_and(|entry| entry.id == id) {
                            in_flight.remove(&fetch_url);
                        }
                        result
                    });
                    let abort = handle.abort_handle();
                    let fetch = async move {
                        handle.await.unwrap_or_else(|e| {
                            Err(FetchError::Other(format!("Fetch task failed: {e}")))
                        })
                    }
                    .boxed()
                    .shared();
                    in_flight.insert(
                        url.clone(),
                        InFlight {
                            id,
                            fetch: fetch.clone(),
                            waiters: 1,
                            abort,
                        },
                    );
                    (id, fetch)
                }
            };
            let waiter = Waiter {
                in_flight: self.in_flight.clone(),
                url,
                id,
            };
            (fetch, waiter)
        };

        shared.await
    }
}

/// Convert the context's `headers` entry into a header map
fn context_headers(context: &RequestContext) -> Result<HeaderMap, FetchError> {
    let mut headers = HeaderMap::new();
    let Some(entries) = context.headers() else {
        return Ok(headers);
    };

    for (name, value) in entries {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| FetchError::Other(format!("Invalid header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| FetchError::Other(format!("Invalid value for header {name}: {e}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

#[async_trait]
impl ResourceLoader for HttpLoader {
    fn can_load(&self, identifier: &ResourceId) -> bool {
        matches!(identifier.scheme().as_deref(), Some("http" | "https"))
    }

    async fn load(&self, request: LoadRequest, events: LoaderEvents) -> Result<Bytes, FetchError> {
        let url = request
            .identifier
            .to_url()
            .map_err(|e| FetchError::InvalidUrl(format!("{}: {e}", request.identifier)))?;
        let headers = context_headers(&request.context)?;
        let progressive = request.options.is_progressive();

        // Requests with their own headers may get a different response
        let fetch = if self.config.coalesce && !progressive && headers.is_empty() {
            self.fetch_shared(url, events).boxed()
        } else {
            async move {
                self.fetch_with_retries(&url, &headers, progressive, &events)
                    .await
            }
            .boxed()
        };

        tokio::select! {
            biased;
            _ = request.cancel.cancelled() => Err(FetchError::Cancelled),
            result = fetch => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use crate::error::FetchErrorKind;
    use crate::loader::provider::LoaderEvent;
    use crate::options::RequestOptions;
    use crate::test_utils::init_tracing;

    /// Serve `status`/`body` to every connection, after `delay`
    async fn serve(status: u16, body: &'static [u8], delay: Duration) -> (SocketAddr, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => request.extend_from_slice(&buf[..n]),
                        }
                    }
                    tokio::time::sleep(delay).await;
                    let head = format!(
                        "HTTP/1.1 {status} X\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        body.len()
                    );
                    let _ = socket.write_all(head.as_bytes()).await;
                    let _ = socket.write_all(body).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        (addr, hits)
    }

    fn loader() -> HttpLoader {
        HttpLoader::new(HttpLoaderConfig {
            use_system_proxy: false,
            retry_delay_base: Duration::from_millis(10),
            partial_threshold: 1,
            ..HttpLoaderConfig::default()
        })
        .unwrap()
    }

    fn request(addr: SocketAddr, path: &str) -> LoadRequest {
        LoadRequest::new(
            ResourceId::from(format!("http://{addr}{path}")),
            RequestOptions::empty(),
            RequestContext::new(),
        )
    }

    #[tokio::test]
    async fn test_fetch_success_reports_progress() {
        init_tracing();
        let (addr, _) = serve(200, b"PNGDATA", Duration::ZERO).await;
        let (events, mut rx) = LoaderEvents::channel();

        let data = loader().load(request(addr, "/a.png"), events).await.unwrap();
        assert_eq!(data.as_ref(), b"PNGDATA");

        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            if let LoaderEvent::Progress { received, expected } = event {
                last = Some((received, expected));
            }
        }
        assert_eq!(last, Some((7, Some(7))));
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let (addr, hits) = serve(404, b"", Duration::ZERO).await;
        let err = loader()
            .load(request(addr, "/missing.png"), LoaderEvents::detached())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FetchErrorKind::NotFound);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let (addr, hits) = serve(503, b"busy", Duration::ZERO).await;
        let err = loader()
            .load(request(addr, "/a.png"), LoaderEvents::detached())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FetchErrorKind::ServerError);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_progressive_emits_partials() {
        let (addr, _) = serve(200, b"GIF89a\x01\x00\x01\x00", Duration::ZERO).await;
        let (events, mut rx) = LoaderEvents::channel();
        let mut req = request(addr, "/a.gif");
        req.options = RequestOptions::PROGRESSIVE_LOAD;

        loader().load(req, events).await.unwrap();

        let mut partials = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, LoaderEvent::Partial(_)) {
                partials += 1;
            }
        }
        assert!(partials >= 1);
    }

    #[tokio::test]
    async fn test_concurrent_fetches_are_coalesced() {
        let (addr, hits) = serve(200, b"shared", Duration::from_millis(200)).await;
        let loader = loader();

        let (a, b) = tokio::join!(
            loader.load(request(addr, "/a.png"), LoaderEvents::detached()),
            loader.load(request(addr, "/a.png"), LoaderEvents::detached()),
        );
        assert_eq!(a.unwrap().as_ref(), b"shared");
        assert_eq!(b.unwrap().as_ref(), b"shared");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(loader.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_cancelling_lone_requester_aborts_shared_fetch() {
        let (addr, _) = serve(200, b"late", Duration::from_millis(500)).await;
        let req = request(addr, "/slow.png");
        let cancel = req.cancel.clone();

        let loader = loader();
        let task_loader = loader.clone();
        let handle = tokio::spawn(async move { task_loader.load(req, LoaderEvents::detached()).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(loader.in_flight(), 1);

        cancel.cancel();
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(FetchError::Cancelled)));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(loader.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_cancelling_one_waiter_keeps_shared_fetch() {
        let (addr, hits) = serve(200, b"shared", Duration::from_millis(200)).await;
        let loader = loader();

        let first = request(addr, "/a.png");
        let cancel_first = first.cancel.clone();
        let first_loader = loader.clone();
        let first = tokio::spawn(async move { first_loader.load(first, LoaderEvents::detached()).await });
        let second_loader = loader.clone();
        let second = tokio::spawn(async move {
            second_loader
                .load(request(addr, "/a.png"), LoaderEvents::detached())
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel_first.cancel();

        assert!(matches!(first.await.unwrap(), Err(FetchError::Cancelled)));
        assert_eq!(second.await.unwrap().unwrap().as_ref(), b"shared");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(loader.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_cancel_stops_waiting() {
        let (addr, _) = serve(200, b"late", Duration::from_secs(5)).await;
        let req = request(addr, "/slow.png");
        let cancel = req.cancel.clone();

        let loader = loader();
        let handle = tokio::spawn(async move { loader.load(req, LoaderEvents::detached()).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("load returns promptly")
            .unwrap();
        assert!(matches!(result, Err(FetchError::Cancelled)));
    }

    #[test]
    fn test_can_load_http_only() {
        let loader = loader();
        assert!(loader.can_load(&ResourceId::from("https://x/a.png")));
        assert!(!loader.can_load(&ResourceId::from("file:///tmp/a.png")));
        assert!(!loader.can_load(&ResourceId::from("a.png")));
    }
}
