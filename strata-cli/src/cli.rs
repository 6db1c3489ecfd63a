use clap::Parser;
use std::path::PathBuf;
use strata_engine::AggregationPolicy;

/// Define CLI arguments
#[derive(Parser)]
#[command(
    author = "hua0512 <https://github.com/hua0512>",
    version,
    about = "Layered-cache resource loader",
    long_about = "Loads resources by URL through a memory and disk cache, falling back to\n\
                  the network on a miss, and saves each payload to the output directory.\n\
                  \n\
                  Identifiers that fail permanently (404, other client errors, undecodable\n\
                  data) are remembered for the rest of the run and not fetched again unless\n\
                  --retry-failed is given."
)]
pub struct CliArgs {
    /// URL(s) to load
    #[arg(required = true, help = "URL(s) of the resources to load")]
    pub urls: Vec<String>,

    /// Output directory for loaded resources
    #[arg(
        short,
        long,
        help = "Directory where loaded resources will be saved (default: ./resources)"
    )]
    pub output_dir: Option<PathBuf>,

    /// Directory of the disk cache
    #[arg(long, help = "Directory for the disk cache (default: system temp dir)")]
    pub cache_dir: Option<PathBuf>,

    /// Memory cache size with optional unit (B, KB, MB, GB)
    #[arg(
        long,
        default_value = "64MB",
        help = "Maximum size of the memory cache with optional unit (B, KB, MB, GB). Use 0 to disable the memory tier."
    )]
    pub memory_cache: String,

    /// Disable the disk cache tier
    #[arg(long, help = "Keep cached resources in memory only")]
    pub no_disk_cache: bool,

    /// Disable caching entirely
    #[arg(long, help = "Neither query nor populate any cache")]
    pub no_cache: bool,

    /// Retry identifiers that failed before
    #[arg(long, help = "Ignore the failed-key blacklist and load again")]
    pub retry_failed: bool,

    /// Refresh cached resources
    #[arg(long, help = "Report the cached copy, then load a fresh one")]
    pub refresh: bool,

    /// Only answer from the cache
    #[arg(long, help = "Never touch the network; fail for resources that are not cached")]
    pub cache_only: bool,

    /// Deliver partial payloads while downloading
    #[arg(long, help = "Log partial payloads as they arrive")]
    pub progressive: bool,

    /// Cache query fan-out policy
    #[arg(
        long,
        value_enum,
        default_value = "serial",
        help = "How cache tiers are queried"
    )]
    pub query_policy: AggregationPolicy,

    /// Overall request timeout with optional unit (ms, s, m, h)
    #[arg(
        long,
        default_value = "30s",
        help = "Overall timeout for HTTP requests with optional unit (ms, s, m, h)"
    )]
    pub timeout: String,

    /// Connection timeout with optional unit (ms, s, m, h)
    #[arg(
        long,
        default_value = "10s",
        help = "Connection timeout (time to establish initial connection) with optional unit (ms, s, m, h)"
    )]
    pub connect_timeout: String,

    /// Retries for transient failures
    #[arg(
        long,
        default_value = "2",
        help = "Number of retries for timeouts, connection failures and server errors"
    )]
    pub retries: u32,

    /// Proxy URL (e.g., "http://proxy.example.com:8080")
    #[arg(
        long,
        help = "Proxy server URL for requests (e.g., \"http://proxy.example.com:8080\")"
    )]
    pub proxy: Option<String>,

    /// Disable all proxy settings
    #[arg(long, help = "Disable all proxy settings (including system proxy)")]
    pub no_proxy: bool,

    /// Custom HTTP headers for requests
    #[arg(
        long = "header",
        short = 'H',
        help = "Add custom HTTP header to requests (can be used multiple times). Format: 'Name: Value'",
        value_name = "HEADER"
    )]
    pub headers: Vec<String>,

    /// Show progress bars
    #[arg(
        short = 'P',
        long = "progress",
        default_value = "false",
        help = "Show progress bars for downloads"
    )]
    pub show_progress: bool,

    /// Enable verbose logging
    #[arg(short, long, help = "Enable detailed debug logging")]
    pub verbose: bool,
}
