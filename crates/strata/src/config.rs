use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

const DEFAULT_USER_AGENT: &str = concat!("strata/", env!("CARGO_PKG_VERSION"));

/// Configurable options for the default HTTP loader
#[derive(Debug, Clone)]
pub struct HttpLoaderConfig {
    /// Overall timeout for the entire HTTP request
    pub timeout: Duration,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// How long idle pooled connections are kept
    pub pool_idle_timeout: Duration,

    /// Whether to follow redirects
    pub follow_redirects: bool,

    /// User agent string
    pub user_agent: String,

    /// Headers sent with every request; context headers override them
    pub headers: HeaderMap,

    /// Explicit proxy for all schemes (e.g. "http://proxy.example.com:8080")
    pub proxy_url: Option<String>,

    /// Whether to use system proxy settings if available
    pub use_system_proxy: bool,

    /// Retries after the first attempt, for retryable failures only
    pub max_retries: u32,

    /// Delay before the first retry; doubles on each further retry
    pub retry_delay_base: Duration,

    /// Share one fetch between concurrent non-progressive requests for the same URL
    pub coalesce: bool,

    /// Minimum growth of the body between two progressive partial payloads
    pub partial_threshold: usize,
}

impl Default for HttpLoaderConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            pool_idle_timeout: Duration::from_secs(90),
            follow_redirects: true,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: HttpLoaderConfig::get_default_headers(),
            proxy_url: None,
            use_system_proxy: true,
            max_retries: 2,
            retry_delay_base: Duration::from_millis(500),
            coalesce: true,
            partial_threshold: 16 * 1024,
        }
    }
}

impl HttpLoaderConfig {
    pub fn builder() -> crate::builder::HttpLoaderConfigBuilder {
        crate::builder::HttpLoaderConfigBuilder::new()
    }

    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        default_headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static(
                "image/avif,image/webp,image/png,image/svg+xml,image/*;q=0.8,*/*;q=0.5",
            ),
        );

        default_headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );

        default_headers
    }
}

/// Where a post-processed cache hit is stored back to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreBackPolicy {
    /// Store back into the scope the request's store options allow
    #[default]
    Always,
    /// Skip store-back when the request excludes the disk tier
    RequireDisk,
    /// Never store back
    Never,
}

/// Behaviour switches of the resource manager
#[derive(Debug, Clone, Default)]
pub struct ManagerConfig {
    pub store_back: StoreBackPolicy,
}

impl ManagerConfig {
    pub fn with_store_back(mut self, store_back: StoreBackPolicy) -> Self {
        self.store_back = store_back;
        self
    }
}
