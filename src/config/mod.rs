//! Configuration management for scopecrawl
//!
//! A [`CrawlConfig`] can be built from defaults, from `SCOPECRAWL_*`
//! environment variables or from a TOML file, and is then overridden by
//! command-line flags in `main.rs`.

use crate::crawler::fetcher::{SessionConfig, DEFAULT_MAX_BODY_SIZE};
use crate::crawler::headers::parse_header_line;
use crate::crawler::url::validators::validate_seed;
use crate::error::{Error, Result};
use crate::pacing::canary::{BackoffStrategy, CanaryConfig};
use crate::utils::retry::RetryConfig;
use crate::utils::{secs_f64, MAX_INTERVAL_SECS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which canary, if any, gates the fetch stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CanaryMode {
    #[default]
    None,
    /// Report blocking only
    Basic,
    /// Also escalate the check interval and slow the crawl down
    Adaptive,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Crawl configuration
///
/// Durations are in seconds so they read naturally in TOML files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Seed URL; also the canary URL and the scope anchor
    pub seed_url: String,

    /// Destination SQLite store; shards are written next to it
    pub output: PathBuf,

    /// Extra seeds, one URL per line
    pub seed_file: Option<PathBuf>,

    pub max_depth: i32,

    /// Minimum gap between requests, in seconds. Zero disables pacing.
    pub delay: f64,

    /// Upper bound of random extra delay, in seconds
    pub jitter: f64,

    /// Apply robots.txt Allow/Disallow rules to the scope
    pub robots: bool,

    /// Seed robots.txt `Sitemap:` entries
    pub sitemaps: bool,

    pub subdomains: bool,

    /// Fetch scripts regardless of scope
    pub js_grabbing: bool,

    /// Store placeholders for URLs seen but never fetched
    pub unvisited: bool,

    /// Only placeholders on the seed's registrable domain
    pub unvisited_same_domain: bool,

    pub blacklist_file: Option<PathBuf>,
    pub whitelist_file: Option<PathBuf>,

    pub canary: CanaryMode,
    pub canary_check_interval: f64,
    pub max_canary_check_interval: f64,
    pub canary_baseline_spacing: f64,

    /// `host:port` of an HTTP proxy
    pub proxy: Option<String>,

    /// Pre-authenticated cookies as `name=value`
    pub cookies: Vec<String>,

    /// Extra request headers as `Name: value`
    pub headers: Vec<String>,

    pub user_agent: Option<String>,
    pub request_timeout: f64,
    pub accept_invalid_certs: bool,
    pub max_body_size: u64,
    pub fetch_retries: u32,
    pub retry_base_delay_ms: u64,

    pub num_builders: usize,
    pub num_fetchers: usize,
    pub num_parsers: usize,
    pub num_db_workers: usize,

    /// Headless browser command line; enables rendering when set
    pub render_command: Option<String>,
    pub num_drivers: usize,

    /// How often the orchestrator checks for termination, in seconds
    pub poll_interval: f64,

    /// How often a status line is logged, in seconds. Zero disables it.
    pub status_interval: f64,

    pub log_format: LogFormat,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            seed_url: String::new(),
            output: PathBuf::from("crawl.db"),
            seed_file: None,
            max_depth: 2,
            delay: 0.0,
            jitter: 0.0,
            robots: false,
            sitemaps: false,
            subdomains: false,
            js_grabbing: false,
            unvisited: false,
            unvisited_same_domain: false,
            blacklist_file: None,
            whitelist_file: None,
            canary: CanaryMode::None,
            canary_check_interval: 60.0,
            max_canary_check_interval: 21_600.0,
            canary_baseline_spacing: 30.0,
            proxy: None,
            cookies: Vec::new(),
            headers: Vec::new(),
            user_agent: None,
            request_timeout: 10.0,
            accept_invalid_certs: true,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            fetch_retries: 2,
            retry_base_delay_ms: 0,
            num_builders: 1,
            num_fetchers: 5,
            num_parsers: 2,
            num_db_workers: 3,
            render_command: None,
            num_drivers: 1,
            poll_interval: 0.5,
            status_interval: 10.0,
            log_format: LogFormat::Text,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl CrawlConfig {
    /// Defaults overridden by `SCOPECRAWL_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("SCOPECRAWL_URL") {
            config.seed_url = url;
        }
        if let Ok(output) = std::env::var("SCOPECRAWL_OUTPUT") {
            config.output = PathBuf::from(output);
        }
        if let Some(v) = env_parse("SCOPECRAWL_MAX_DEPTH") {
            config.max_depth = v;
        }
        if let Some(v) = env_parse("SCOPECRAWL_DELAY") {
            config.delay = v;
        }
        if let Some(v) = env_parse("SCOPECRAWL_JITTER") {
            config.jitter = v;
        }
        if let Some(v) = env_parse("SCOPECRAWL_REQUEST_TIMEOUT") {
            config.request_timeout = v;
        }
        if let Ok(ua) = std::env::var("SCOPECRAWL_USER_AGENT") {
            config.user_agent = Some(ua);
        }
        if let Ok(proxy) = std::env::var("SCOPECRAWL_PROXY") {
            config.proxy = Some(proxy);
        }
        if let Some(v) = env_parse("SCOPECRAWL_BUILDERS") {
            config.num_builders = v;
        }
        if let Some(v) = env_parse("SCOPECRAWL_FETCHERS") {
            config.num_fetchers = v;
        }
        if let Some(v) = env_parse("SCOPECRAWL_PARSERS") {
            config.num_parsers = v;
        }
        if let Some(v) = env_parse("SCOPECRAWL_DB_WORKERS") {
            config.num_db_workers = v;
        }

        config
    }

    /// Load configuration from a TOML file; missing keys take defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::with_source(format!("Failed to read config file: {}", path.display()), e)
        })?;

        toml::from_str(&content).map_err(|e| {
            Error::with_source(
                format!("Failed to parse TOML config file: {}", path.display()),
                e,
            )
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        validate_seed(&self.seed_url).map_err(Error::config)?;

        for (name, count) in [
            ("num_builders", self.num_builders),
            ("num_fetchers", self.num_fetchers),
            ("num_parsers", self.num_parsers),
            ("num_db_workers", self.num_db_workers),
        ] {
            if count == 0 {
                return Err(Error::config(format!("{name} must be greater than 0")));
            }
        }
        if self.render_command.is_some() && self.num_drivers == 0 {
            return Err(Error::config("num_drivers must be greater than 0 when rendering"));
        }

        for (name, value) in [
            ("delay", self.delay),
            ("jitter", self.jitter),
            ("request_timeout", self.request_timeout),
            ("poll_interval", self.poll_interval),
            ("canary_check_interval", self.canary_check_interval),
            ("max_canary_check_interval", self.max_canary_check_interval),
            ("canary_baseline_spacing", self.canary_baseline_spacing),
            ("status_interval", self.status_interval),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::config(format!("{name} must not be negative")));
            }
            if value > MAX_INTERVAL_SECS {
                return Err(Error::config(format!(
                    "{name} must not exceed {MAX_INTERVAL_SECS} seconds"
                )));
            }
        }
        if self.request_timeout == 0.0 {
            return Err(Error::config("request_timeout must be positive"));
        }
        if self.poll_interval == 0.0 {
            return Err(Error::config("poll_interval must be positive"));
        }
        if self.max_depth < 0 {
            return Err(Error::config("max_depth must not be negative"));
        }
        if self.max_body_size == 0 {
            return Err(Error::config("max_body_size must be greater than 0"));
        }

        if self.canary != CanaryMode::None {
            if self.canary_check_interval == 0.0 {
                return Err(Error::config("canary_check_interval must be positive"));
            }
            if self.canary == CanaryMode::Adaptive
                && self.max_canary_check_interval < self.canary_check_interval
            {
                return Err(Error::config(
                    "max_canary_check_interval must not be below canary_check_interval",
                ));
            }
        }

        if let Some(bad) = self.headers.iter().find(|h| parse_header_line(h).is_none()) {
            return Err(Error::config(format!("Invalid header '{bad}', expected 'Name: value'")));
        }
        if let Some(bad) = self.cookies.iter().find(|c| !c.contains('=')) {
            return Err(Error::config(format!("Invalid cookie '{bad}', expected 'name=value'")));
        }

        Ok(())
    }

    /// Request pacing is on when either delay component is set
    pub fn pacing_enabled(&self) -> bool {
        self.delay > 0.0 || self.jitter > 0.0
    }

    pub fn rendering_enabled(&self) -> bool {
        self.render_command.is_some()
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        secs_f64(self.request_timeout)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        secs_f64(self.poll_interval)
    }

    /// `None` when status logging is disabled
    #[must_use]
    pub fn status_interval(&self) -> Option<Duration> {
        (self.status_interval > 0.0).then(|| secs_f64(self.status_interval))
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            cookies: self.cookies.clone(),
            headers: self
                .headers
                .iter()
                .filter_map(|h| parse_header_line(h))
                .collect(),
            user_agent: self.user_agent.clone(),
            proxy: self.proxy.clone(),
            timeout: self.request_timeout(),
            accept_invalid_certs: self.accept_invalid_certs,
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.fetch_retries,
            base_delay_ms: self.retry_base_delay_ms,
            ..RetryConfig::default()
        }
    }

    /// Canary settings, `None` when no canary is configured
    pub fn canary_config(&self) -> Option<CanaryConfig> {
        let strategy = match self.canary {
            CanaryMode::None => return None,
            CanaryMode::Basic => BackoffStrategy::Fixed,
            CanaryMode::Adaptive => BackoffStrategy::Adaptive {
                max_interval: secs_f64(self.max_canary_check_interval),
            },
        };
        Some(CanaryConfig {
            check_interval: secs_f64(self.canary_check_interval),
            strategy,
            baseline_spacing: secs_f64(self.canary_baseline_spacing),
            initial_request_interval: self.delay,
        })
    }
}
