use anyhow::{Context, Result};
use clap::Parser;
use scopecrawl::config::{CanaryMode, CrawlConfig, LogFormat};
use scopecrawl::crawler::{CancelToken, Crawler};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "scopecrawl",
    version,
    about = "Scope-aware staged web crawler with WAF canary backoff and sharded SQLite output",
    long_about = None
)]
struct Cli {
    /// Seed URL
    #[arg(short, long)]
    url: Option<String>,

    /// Output SQLite store
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Load settings from a TOML file; flags override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// File of extra seed URLs, one per line
    #[arg(long)]
    seed_file: Option<PathBuf>,

    /// Maximum link depth from a seed
    #[arg(short, long)]
    depth: Option<i32>,

    /// Minimum seconds between requests
    #[arg(long)]
    delay: Option<f64>,

    /// Maximum random extra seconds between requests
    #[arg(long)]
    jitter: Option<f64>,

    /// Apply robots.txt Allow/Disallow rules
    #[arg(long)]
    robots: bool,

    /// Seed sitemaps listed in robots.txt
    #[arg(long)]
    sitemaps: bool,

    /// Include subdomains of the seed host in scope
    #[arg(long)]
    subdomains: bool,

    /// Fetch scripts even when out of scope
    #[arg(long)]
    js_grabbing: bool,

    /// Store placeholders for URLs seen but never fetched
    #[arg(long)]
    unvisited: bool,

    /// Only placeholders on the seed's registrable domain
    #[arg(long)]
    unvisited_same_domain: bool,

    /// File of regular expressions excluding paths from scope
    #[arg(long)]
    blacklist: Option<PathBuf>,

    /// File of regular expressions forcing paths into scope
    #[arg(long)]
    whitelist: Option<PathBuf>,

    /// Canary gating fetches
    #[arg(long, value_enum)]
    canary: Option<CanaryMode>,

    /// Seconds between canary checks
    #[arg(long)]
    canary_interval: Option<f64>,

    /// Upper bound for the adaptive canary's check interval, in seconds
    #[arg(long)]
    max_canary_interval: Option<f64>,

    /// HTTP proxy as host:port
    #[arg(long)]
    proxy: Option<String>,

    /// Cookie sent with every request, name=value (repeatable)
    #[arg(long = "cookie")]
    cookies: Vec<String>,

    /// Extra request header, "Name: value" (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    #[arg(long)]
    user_agent: Option<String>,

    /// Request timeout in seconds
    #[arg(long)]
    timeout: Option<f64>,

    /// Headless browser command that prints the rendered DOM of a URL
    #[arg(long)]
    render_command: Option<String>,

    #[arg(long)]
    drivers: Option<usize>,

    #[arg(long)]
    builders: Option<usize>,

    #[arg(long)]
    fetchers: Option<usize>,

    #[arg(long)]
    parsers: Option<usize>,

    #[arg(long)]
    db_workers: Option<usize>,

    /// Write the final Prometheus metrics export to this file
    #[arg(long)]
    metrics_out: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Suppress periodic status lines
    #[arg(short, long)]
    silent: bool,

    /// Log format
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
}

impl Cli {
    /// Layer flags over the file or environment configuration
    fn into_config(self) -> Result<CrawlConfig> {
        let mut config = match &self.config {
            Some(path) => CrawlConfig::from_file(path)?,
            None => CrawlConfig::from_env(),
        };

        if let Some(url) = self.url {
            config.seed_url = url;
        }
        if let Some(output) = self.output {
            config.output = output;
        }
        if self.seed_file.is_some() {
            config.seed_file = self.seed_file;
        }
        if let Some(depth) = self.depth {
            config.max_depth = depth;
        }
        if let Some(delay) = self.delay {
            config.delay = delay;
        }
        if let Some(jitter) = self.jitter {
            config.jitter = jitter;
        }
        config.robots |= self.robots;
        config.sitemaps |= self.sitemaps;
        config.subdomains |= self.subdomains;
        config.js_grabbing |= self.js_grabbing;
        config.unvisited |= self.unvisited || self.unvisited_same_domain;
        config.unvisited_same_domain |= self.unvisited_same_domain;
        if self.blacklist.is_some() {
            config.blacklist_file = self.blacklist;
        }
        if self.whitelist.is_some() {
            config.whitelist_file = self.whitelist;
        }
        if let Some(canary) = self.canary {
            config.canary = canary;
        }
        if let Some(interval) = self.canary_interval {
            config.canary_check_interval = interval;
        }
        if let Some(max) = self.max_canary_interval {
            config.max_canary_check_interval = max;
        }
        if self.proxy.is_some() {
            config.proxy = self.proxy;
        }
        config.cookies.extend(self.cookies);
        config.headers.extend(self.headers);
        if self.user_agent.is_some() {
            config.user_agent = self.user_agent;
        }
        if let Some(timeout) = self.timeout {
            config.request_timeout = timeout;
        }
        if self.render_command.is_some() {
            config.render_command = self.render_command;
        }
        if let Some(n) = self.drivers {
            config.num_drivers = n;
        }
        if let Some(n) = self.builders {
            config.num_builders = n;
        }
        if let Some(n) = self.fetchers {
            config.num_fetchers = n;
        }
        if let Some(n) = self.parsers {
            config.num_parsers = n;
        }
        if let Some(n) = self.db_workers {
            config.num_db_workers = n;
        }
        if self.silent {
            config.status_interval = 0.0;
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = cli.verbose;
    let metrics_out = cli.metrics_out.clone();
    let config = cli.into_config()?;

    setup_tracing(config.log_format, verbose)?;
    if let Err(e) = scopecrawl::metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics unavailable");
    }

    tracing::info!(url = %config.seed_url, output = %config.output.display(), "scopecrawl starting");

    // The crawler owns blocking HTTP clients, so it is built, run and
    // dropped entirely on a blocking thread.
    let cancel = CancelToken::new();
    let mut crawl = {
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || {
            let crawler = Crawler::with_cancel_token(config, cancel)?;
            crawler.run()
        })
    };

    let summary = tokio::select! {
        joined = &mut crawl => joined.context("Crawler thread panicked")??,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupt received, stopping crawl");
            cancel.cancel();
            crawl.await.context("Crawler thread panicked")??
        }
    };

    if let Some(path) = metrics_out {
        let text = scopecrawl::metrics::encode_metrics()
            .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {e}"))?;
        std::fs::write(&path, text)
            .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
    }

    tracing::info!(
        visited = summary.visited,
        written = summary.written,
        placeholders = summary.placeholders,
        cancelled = summary.cancelled,
        "scopecrawl finished"
    );
    Ok(())
}

fn setup_tracing(format: LogFormat, verbose: bool) -> Result<()> {
    let default_filter = if verbose {
        "scopecrawl=debug,info"
    } else {
        "scopecrawl=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()?;
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()?;
        }
    }

    Ok(())
}
