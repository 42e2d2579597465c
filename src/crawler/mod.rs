//! Crawl orchestration
//!
//! A [`Crawler`] wires four stages around four queues:
//!
//! ```text
//! frontier ──build──▶ requests ──fetch──▶ responses ──parse──▶ results ──store──▶ shards
//!    ▲                                                   │
//!    └──────────────────── in-scope links ───────────────┘
//! ```
//!
//! [`Crawler::run`] polls the queues until the first three are drained,
//! retires the build/fetch/parse stages, optionally backfills placeholder
//! records for URLs that were seen but never fetched, then waits for the
//! results queue and merges the shards.

pub mod fetcher;
pub mod headers;
pub mod stages;
pub mod status;
pub mod url;

use crate::config::CrawlConfig;
use crate::error::{Error, ErrorExt, Result};
use crate::models::{CrawlRecord, FetchOutcome, FetchRequest, FrontierItem};
use crate::pacing::{Canary, CooldownLock, HttpProbe};
use crate::render::{CheckoutPool, CommandRenderer, Renderer, RendererPool};
use crate::scope::{robots_url, RobotsRules, RuleList, Scope};
use crate::storage::ShardedStore;
use crate::workers::{WorkQueue, WorkerPool};
use self::url::validators::{filter_valid_urls, validate_seed};
use fetcher::{PageFetcher, Session};
use parking_lot::Mutex;
use stages::{build_request, parse_outcome, CrawlState, FetchContext};
use status::{QueueRateTracker, QueueStatus, StageStatus, StatusSnapshot};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Shared stop signal, cloned into whoever may need to interrupt a crawl
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of a finished crawl
#[derive(Debug, Clone, Default)]
pub struct CrawlSummary {
    pub visited: usize,
    pub seen: usize,
    pub placeholders: usize,
    pub written: u64,
    pub elapsed: Duration,
    pub cancelled: bool,
}

/// Single-process staged crawler
pub struct Crawler {
    config: CrawlConfig,
    state: Arc<CrawlState>,
    fetch: Arc<FetchContext>,

    frontier: Arc<WorkQueue<FrontierItem>>,
    requests: Arc<WorkQueue<FetchRequest>>,
    responses: Arc<WorkQueue<FetchOutcome>>,
    results: Arc<WorkQueue<CrawlRecord>>,

    builders: WorkerPool<FrontierItem, FetchRequest>,
    fetchers: WorkerPool<FetchRequest, FetchOutcome>,
    parsers: WorkerPool<FetchOutcome, CrawlRecord>,
    store: ShardedStore,

    canary: Option<Arc<Canary>>,
    renderers: Option<Arc<RendererPool>>,

    cancel: CancelToken,
    stages_retired: AtomicBool,
    shut_down: AtomicBool,
    placeholders: Mutex<usize>,
    queue_rates: Mutex<QueueRateTracker>,
    started: Mutex<Option<Instant>>,
}

impl Crawler {
    /// Build a crawler with its own cancel token
    pub fn new(config: CrawlConfig) -> Result<Self> {
        Self::with_cancel_token(config, CancelToken::new())
    }

    /// Build a crawler: validate the configuration, compile the scope,
    /// read robots.txt and seed files, and create the shard stores.
    ///
    /// Nothing is fetched from the crawl frontier until [`run`](Self::run).
    pub fn with_cancel_token(config: CrawlConfig, cancel: CancelToken) -> Result<Self> {
        config.validate()?;
        let seed = validate_seed(&config.seed_url).map_err(Error::config)?;

        let mut scope = Scope::new(seed.as_str(), config.subdomains, config.js_grabbing)?;
        if let Some(path) = &config.whitelist_file {
            scope.add_rules_from_file(path, RuleList::Whitelist)?;
        }
        if let Some(path) = &config.blacklist_file {
            scope.add_rules_from_file(path, RuleList::Blacklist)?;
        }

        let session = Session::new(&config.session_config(), &seed)?;
        let page_fetcher = PageFetcher::new(session, config.retry_config(), config.max_body_size);

        let mut sitemaps = Vec::new();
        if config.robots || config.sitemaps {
            if let Some(robots) = load_robots(&page_fetcher, &seed) {
                if config.robots {
                    scope.add_robots_rules(&robots)?;
                }
                if config.sitemaps {
                    sitemaps = robots.sitemaps;
                }
            }
        }

        let canary = match config.canary_config() {
            Some(canary_config) => {
                let probe = HttpProbe::new(seed.as_str(), &config.session_config())?;
                let canary =
                    Canary::new(Box::new(probe), canary_config).with_cancel_token(cancel.clone());
                Some(Arc::new(canary))
            }
            None => None,
        };

        let renderers = match &config.render_command {
            Some(command) => {
                let renderer = CommandRenderer::from_command_line(command)
                    .ok_or_else(|| Error::config("render_command must not be empty"))?;
                let drivers: Vec<Box<dyn Renderer>> = (0..config.num_drivers)
                    .map(|_| Box::new(renderer.clone()) as Box<dyn Renderer>)
                    .collect();
                Some(Arc::new(CheckoutPool::new(drivers)))
            }
            None => None,
        };

        let mut fetch = FetchContext::new(page_fetcher);
        if let Some(canary) = &canary {
            fetch = fetch.with_canary(Arc::clone(canary));
        }
        let adaptive = canary.as_ref().is_some_and(|c| c.is_adaptive());
        if config.pacing_enabled() || adaptive {
            fetch = fetch.with_cooldown(Arc::new(CooldownLock::from_secs(
                config.delay,
                config.jitter,
            )));
        }
        if let Some(pool) = &renderers {
            fetch = fetch.with_renderers(Arc::clone(pool));
        }
        let fetch = Arc::new(fetch);

        let state = Arc::new(CrawlState::new(scope, config.max_depth));
        let frontier = Arc::new(WorkQueue::new());
        let requests = Arc::new(WorkQueue::new());
        let responses = Arc::new(WorkQueue::new());
        let results = Arc::new(WorkQueue::new());

        let builders = {
            let state = Arc::clone(&state);
            WorkerPool::new(
                "build",
                config.num_builders,
                Arc::new(move |item| build_request(&state, item)),
                Arc::clone(&frontier),
                Arc::clone(&requests),
            )
        };
        let fetchers = {
            let fetch = Arc::clone(&fetch);
            WorkerPool::new(
                "fetch",
                config.num_fetchers,
                Arc::new(move |request| fetch.fetch(request)),
                Arc::clone(&requests),
                Arc::clone(&responses),
            )
        };
        let parsers = {
            let state = Arc::clone(&state);
            let frontier = Arc::clone(&frontier);
            WorkerPool::new(
                "parse",
                config.num_parsers,
                Arc::new(move |outcome| parse_outcome(&state, &frontier, outcome)),
                Arc::clone(&responses),
                Arc::clone(&results),
            )
        };
        let store = ShardedStore::new(&config.output, config.num_db_workers, Arc::clone(&results))?;

        let mut seeds = vec![seed.to_string()];
        if let Some(path) = &config.seed_file {
            let content = std::fs::read_to_string(path).map_err(|e| {
                Error::with_source(format!("Failed to read seed file: {}", path.display()), e)
            })?;
            seeds.extend(filter_valid_urls(content.lines()));
        }
        seeds.extend(sitemaps);
        for url in &seeds {
            frontier.put(FrontierItem::seed(url.clone()));
        }
        info!(
            seed = %seed,
            seeds = seeds.len(),
            domain = state.scope().domain(),
            max_depth = config.max_depth,
            "Crawler initialized"
        );

        Ok(Self {
            config,
            state,
            fetch,
            frontier,
            requests,
            responses,
            results,
            builders,
            fetchers,
            parsers,
            store,
            canary,
            renderers,
            cancel,
            stages_retired: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            placeholders: Mutex::new(0),
            queue_rates: Mutex::new(QueueRateTracker::new()),
            started: Mutex::new(None),
        })
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    pub fn state(&self) -> &CrawlState {
        &self.state
    }

    pub fn fetch_context(&self) -> &FetchContext {
        &self.fetch
    }

    /// Add a seed before or during the crawl
    pub fn add_seed(&self, url: impl Into<String>) {
        self.frontier.put(FrontierItem::seed(url));
    }

    /// Run the crawl to completion or cancellation.
    ///
    /// Blocks the calling thread. Fatal errors (canary baseline, worker
    /// spawn, persistence) shut every stage down before returning.
    pub fn run(&self) -> Result<CrawlSummary> {
        let started = Instant::now();
        *self.started.lock() = Some(started);
        info!(
            builders = self.config.num_builders,
            fetchers = self.config.num_fetchers,
            parsers = self.config.num_parsers,
            db_workers = self.config.num_db_workers,
            "Starting crawl"
        );

        if self.cancel.is_cancelled() {
            warn!("Crawl cancelled before start, shutting down");
            self.shutdown()?;
            return Ok(self.summary(started, true));
        }
        if let Err(e) = self.start_stages() {
            if self.cancel.is_cancelled() {
                warn!(error = %e, "Crawl cancelled during startup, shutting down");
                self.shutdown()?;
                return Ok(self.summary(started, true));
            }
            error!(
                error = %e,
                category = ?e.category(),
                recoverable = e.is_recoverable(),
                "Crawl startup failed"
            );
            self.shutdown_quietly();
            return Err(e);
        }

        let poll = self.config.poll_interval();
        let status_every = self.config.status_interval();
        let mut last_status = Instant::now();

        loop {
            if self.cancel.is_cancelled() {
                warn!("Crawl cancelled, shutting down");
                self.shutdown()?;
                return Ok(self.summary(started, true));
            }
            if self.store.has_failed() {
                error!("Persistence failed, aborting crawl");
                self.shutdown()?;
                return Err(Error::other("persistence failed"));
            }

            if let Some(every) = status_every {
                if last_status.elapsed() >= every {
                    let snapshot = self.status();
                    snapshot.publish();
                    snapshot.log();
                    last_status = Instant::now();
                }
            }

            if !self.stages_retired.load(Ordering::SeqCst) && self.pipeline_drained() {
                self.retire_stages();
            }
            if self.stages_retired.load(Ordering::SeqCst)
                && self.results.wait_drained_timeout(poll)
            {
                break;
            }
            if !self.stages_retired.load(Ordering::SeqCst) {
                thread::sleep(poll);
            }
        }

        self.shut_down.store(true, Ordering::SeqCst);
        self.store.join_when_drained()?;
        let summary = self.summary(started, false);
        self.status().publish();
        info!(
            visited = summary.visited,
            written = summary.written,
            placeholders = summary.placeholders,
            elapsed_secs = summary.elapsed.as_secs_f64(),
            "Crawl finished"
        );
        Ok(summary)
    }

    fn start_stages(&self) -> Result<()> {
        if let Some(canary) = &self.canary {
            canary.start()?;
        }
        self.store.start()?;
        self.parsers.start()?;
        self.fetchers.start()?;
        self.builders.start()?;
        Ok(())
    }

    /// True when frontier, requests and responses hold no unfinished work
    /// and nothing was added to the frontier while checking.
    fn pipeline_drained(&self) -> bool {
        let before = self.frontier.total_put();
        let idle = self.frontier.unfinished() == 0
            && self.requests.unfinished() == 0
            && self.responses.unfinished() == 0;
        idle && self.frontier.total_put() == before
    }

    /// Stop build/fetch/parse and the canary, release drivers and queue
    /// placeholders. Runs once.
    fn retire_stages(&self) {
        if self.stages_retired.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("Pipeline drained, retiring stages");
        self.stop_pipeline();

        if self.config.unvisited {
            let urls = self.state.unvisited_seen(self.config.unvisited_same_domain);
            info!(count = urls.len(), "Queueing placeholders for unvisited URLs");
            *self.placeholders.lock() = urls.len();
            for url in urls {
                self.results.put(CrawlRecord::placeholder(url));
            }
        }
    }

    fn stop_pipeline(&self) {
        if let Some(canary) = &self.canary {
            canary.stop();
        }
        if let Some(pool) = &self.renderers {
            pool.close();
        }
        self.builders.stop();
        self.fetchers.stop();
        self.parsers.stop();
    }

    /// Stop every stage and the store from whatever state they are in.
    /// Later calls are no-ops.
    pub fn shutdown(&self) -> Result<()> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.stages_retired.store(true, Ordering::SeqCst);
        self.stop_pipeline();
        self.store.stop()?;
        Ok(())
    }

    fn shutdown_quietly(&self) {
        if let Err(e) = self.shutdown() {
            error!(error = %e, "Shutdown after failure also failed");
        }
    }

    /// Current queue depths, stage rates and crawl counters
    pub fn status(&self) -> StatusSnapshot {
        let queues = [
            (self.frontier.unfinished(), self.frontier.total_put()),
            (self.requests.unfinished(), self.requests.total_put()),
            (self.responses.unfinished(), self.responses.total_put()),
            (self.results.unfinished(), self.results.total_put()),
        ];
        let totals = queues.map(|(_, total)| total);
        let rates = self.queue_rates.lock().update(Instant::now(), totals);

        let stage = |(input, output): (f64, f64)| StageStatus { input, output };
        let started = *self.started.lock();
        let elapsed = started.map(|t| t.elapsed()).unwrap_or_default();

        StatusSnapshot {
            elapsed,
            queues: [0, 1, 2, 3].map(|i| QueueStatus {
                unfinished: queues[i].0,
                total_put: queues[i].1,
                put_rate: rates[i],
            }),
            stages: [
                stage(self.builders.rates()),
                stage(self.fetchers.rates()),
                stage(self.parsers.rates()),
                stage(self.store.rates()),
            ],
            visited: self.state.visited_count(),
            seen: self.state.seen_count(),
            written: self.store.written(),
            canary_blocked: self.canary.as_ref().is_some_and(|c| c.is_blocked()),
            recommended_interval: self
                .canary
                .as_ref()
                .map_or(0.0, |c| c.recommended_request_interval()),
        }
    }

    fn summary(&self, started: Instant, cancelled: bool) -> CrawlSummary {
        CrawlSummary {
            visited: self.state.visited_count(),
            seen: self.state.seen_count(),
            placeholders: *self.placeholders.lock(),
            written: self.store.written(),
            elapsed: started.elapsed(),
            cancelled,
        }
    }
}

impl Drop for Crawler {
    fn drop(&mut self) {
        if !self.shut_down.load(Ordering::SeqCst) {
            self.shutdown_quietly();
        }
    }
}

/// Fetch and parse robots.txt for the seed's origin; `None` on any failure
fn load_robots(fetcher: &PageFetcher, seed: &::url::Url) -> Option<RobotsRules> {
    let robots = robots_url(seed);
    match fetcher.fetch(robots.as_str()) {
        Ok(page) if page.status == 200 => {
            let text = crate::parser::text::decode_text(&page.body, &page.content_type());
            let rules = RobotsRules::parse(&text);
            info!(
                url = %robots,
                allow = rules.allow.len(),
                disallow = rules.disallow.len(),
                sitemaps = rules.sitemaps.len(),
                "Loaded robots.txt"
            );
            Some(rules)
        }
        Ok(page) => {
            warn!(url = %robots, status = page.status, "No usable robots.txt");
            None
        }
        Err(e) => {
            warn!(url = %robots, error = %e, "Failed to fetch robots.txt");
            None
        }
    }
}
