use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderName, HeaderValue};
use strata_engine::{
    CacheConfig, CachePolicies, HttpLoaderConfig, HttpLoaderConfigBuilder, RequestOptions,
};
use tracing::{info, warn};

use crate::cli::CliArgs;
use crate::error::AppError;

/// Configuration for the entire program
#[derive(Debug, Clone)]
pub struct ProgramConfig {
    /// Default tiered cache settings
    pub cache_config: CacheConfig,

    /// Default HTTP loader settings
    pub http_config: HttpLoaderConfig,

    /// Cache fan-out policies
    pub policies: CachePolicies,

    /// Options applied to every request
    pub options: RequestOptions,

    /// Where payloads are written
    pub output_dir: PathBuf,

    /// Whether to draw progress bars
    pub show_progress: bool,
}

impl ProgramConfig {
    pub fn from_args(args: &CliArgs) -> Result<Self, AppError> {
        if args.cache_only && args.no_cache {
            return Err(AppError::InvalidInput(
                "--cache-only and --no-cache exclude each other".to_string(),
            ));
        }

        let cache_config = CacheConfig {
            enabled: !args.no_cache,
            disk_enabled: !args.no_disk_cache,
            disk_cache_path: args.cache_dir.clone(),
            max_memory_cache_size: parse_memory_size(&args.memory_cache)?,
            ..CacheConfig::default()
        };

        let http = HttpLoaderConfig::builder()
            .with_timeout(parse_duration(&args.timeout)?)
            .with_connect_timeout(parse_duration(&args.connect_timeout)?)
            .with_max_retries(args.retries);
        let mut http = apply_headers(http, &args.headers);

        // Proxy: --no-proxy overrides everything else
        http = if args.no_proxy {
            info!("All proxy settings disabled (--no-proxy flag)");
            http.with_system_proxy(false)
        } else if let Some(proxy_url) = &args.proxy {
            info!(proxy_url = %proxy_url, "Using explicit proxy configuration");
            http.with_proxy(proxy_url.clone())
        } else {
            http.with_system_proxy(true)
        };

        let policies = CachePolicies {
            query: args.query_policy,
            ..CachePolicies::default()
        };

        let mut options = RequestOptions::empty();
        if args.retry_failed {
            options |= RequestOptions::RETRY_FAILED;
        }
        if args.refresh {
            options |= RequestOptions::REFRESH_CACHED;
        }
        if args.cache_only {
            options |= RequestOptions::FROM_CACHE_ONLY;
        }
        if args.no_cache {
            options |= RequestOptions::FROM_LOADER_ONLY;
        }
        if args.progressive {
            options |= RequestOptions::PROGRESSIVE_LOAD;
        }
        if args.no_disk_cache {
            options |= RequestOptions::AVOID_DISK_STORE;
        }

        Ok(Self {
            cache_config,
            http_config: http.build(),
            policies,
            options,
            output_dir: args
                .output_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from("./resources")),
            show_progress: args.show_progress,
        })
    }
}

/// Add every valid `-H 'Name: Value'` entry to the loader config
fn apply_headers(mut http: HttpLoaderConfigBuilder, headers: &[String]) -> HttpLoaderConfigBuilder {
    for header in headers {
        let Some((name, value)) = header.split_once(':') else {
            warn!(header = %header, "Ignoring header without 'Name: Value' form");
            continue;
        };
        let (name, value) = (name.trim(), value.trim());
        if HeaderName::from_bytes(name.as_bytes()).is_err() || HeaderValue::from_str(value).is_err() {
            warn!(header = %header, "Ignoring invalid header");
            continue;
        }
        info!(name, "Adding request header");
        http = http.with_header(name, value);
    }
    http
}

/// `--memory-cache`: a byte count with an optional binary unit, e.g. `512`, `256KB`, `64MB`, `1GB`
fn parse_memory_size(value: &str) -> Result<u64, AppError> {
    let text = value.trim().to_ascii_uppercase();
    let digits = text.find(|c: char| !c.is_ascii_digit()).unwrap_or(text.len());
    let (number, unit) = text.split_at(digits);

    let multiplier: u64 = match unit.trim() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1 << 10,
        "M" | "MB" | "MIB" => 1 << 20,
        "G" | "GB" | "GIB" => 1 << 30,
        _ => return Err(AppError::ParseError(format!("Invalid memory cache size: {value}"))),
    };

    number
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(|| AppError::ParseError(format!("Invalid memory cache size: {value}")))
}

/// Timeouts: seconds by default, or a number with `ms`, `s`, `m` or `h`
fn parse_duration(value: &str) -> Result<Duration, AppError> {
    let text = value.trim().to_ascii_lowercase();
    let digits = text
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(digits);

    let scale = match unit.trim() {
        "ms" => 0.001,
        "" | "s" => 1.0,
        "m" => 60.0,
        "h" => 3600.0,
        _ => return Err(AppError::ParseError(format!("Invalid duration: {value}"))),
    };

    number
        .parse::<f64>()
        .ok()
        .and_then(|n| Duration::try_from_secs_f64(n * scale).ok())
        .ok_or_else(|| AppError::ParseError(format!("Invalid duration: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use strata_engine::AggregationPolicy;

    fn args(extra: &[&str]) -> CliArgs {
        let mut argv = vec!["strata", "http://x/a.png"];
        argv.extend_from_slice(extra);
        CliArgs::parse_from(argv)
    }

    #[test]
    fn test_defaults() {
        let config = ProgramConfig::from_args(&args(&[])).unwrap();
        assert!(config.cache_config.enabled);
        assert_eq!(config.cache_config.max_memory_cache_size, 64 * 1024 * 1024);
        assert_eq!(config.http_config.timeout, Duration::from_secs(30));
        assert_eq!(config.policies.query, AggregationPolicy::Serial);
        assert!(config.options.is_empty());
        assert_eq!(config.output_dir, PathBuf::from("./resources"));
    }

    #[test]
    fn test_flags_map_to_options() {
        let config = ProgramConfig::from_args(&args(&[
            "--retry-failed",
            "--refresh",
            "--no-disk-cache",
            "--query-policy",
            "concurrent",
            "--timeout",
            "1m",
            "-H",
            "Referer: http://x/",
        ]))
        .unwrap();
        assert!(config.options.contains(RequestOptions::RETRY_FAILED));
        assert!(config.options.contains(RequestOptions::REFRESH_CACHED));
        assert!(config.options.contains(RequestOptions::AVOID_DISK_STORE));
        assert!(!config.cache_config.disk_enabled);
        assert_eq!(config.policies.query, AggregationPolicy::Concurrent);
        assert_eq!(config.http_config.timeout, Duration::from_secs(60));
        assert_eq!(
            config.http_config.headers.get("referer").unwrap(),
            "http://x/"
        );
    }

    #[test]
    fn test_cache_only_conflicts_with_no_cache() {
        let err = ProgramConfig::from_args(&args(&["--cache-only", "--no-cache"])).unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[test]
    fn test_memory_size_units() {
        assert_eq!(parse_memory_size("0").unwrap(), 0);
        assert_eq!(parse_memory_size("512").unwrap(), 512);
        assert_eq!(parse_memory_size("256kb").unwrap(), 256 * 1024);
        assert_eq!(parse_memory_size(" 64MB ").unwrap(), 64 * 1024 * 1024);
        assert_eq!(parse_memory_size("1GiB").unwrap(), 1 << 30);
        assert!(parse_memory_size("").is_err());
        assert!(parse_memory_size("1.5MB").is_err());
        assert!(parse_memory_size("2TB").is_err());
        assert!(parse_memory_size("99999999999999999999GB").is_err());
    }

    #[test]
    fn test_duration_units() {
        assert_eq!(parse_duration("30").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration(" 2M ").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("-1s").is_err());
        assert!(parse_duration("10d").is_err());
    }

    #[test]
    fn test_headers_reach_loader_config() {
        let config = apply_headers(
            HttpLoaderConfig::builder(),
            &[
                "Referer: https://example.com/".to_string(),
                "X-Token:abc".to_string(),
                "no colon here".to_string(),
                "Bad Name: value".to_string(),
            ],
        )
        .build();

        assert_eq!(config.headers.get("referer").unwrap(), "https://example.com/");
        assert_eq!(config.headers.get("x-token").unwrap(), "abc");
        assert!(config.headers.get("bad name").is_none());
        assert_eq!(
            config.headers.len(),
            HttpLoaderConfig::builder().build().headers.len() + 2
        );
    }
}
