//! Build, fetch and parse stage transforms
//!
//! Each transform runs on many worker threads at once. Shared crawl state
//! lives in [`CrawlState`]; the visited and seen sets each sit behind their
//! own lock.

use super::fetcher::PageFetcher;
use super::url::{is_logout_link, strip_fragment, visited_forms};
use crate::metrics;
use crate::models::{CrawlRecord, FetchOutcome, FetchRequest, FrontierItem};
use crate::pacing::{Canary, CooldownLock};
use crate::parser;
use crate::render::{render_with, RendererPool};
use crate::scope::Scope;
use crate::utils::{extract_host, format_bytes, registrable_domain, secs_f64};
use crate::workers::WorkQueue;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Scope, depth limit and the visited/seen bookkeeping of one crawl
pub struct CrawlState {
    scope: Scope,
    max_depth: i32,
    visited: Mutex<HashSet<String>>,
    seen: Mutex<HashSet<String>>,
}

impl CrawlState {
    pub fn new(scope: Scope, max_depth: i32) -> Self {
        Self {
            scope,
            max_depth,
            visited: Mutex::new(HashSet::new()),
            seen: Mutex::new(HashSet::new()),
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn max_depth(&self) -> i32 {
        self.max_depth
    }

    /// Atomically check and mark `url` visited. Returns false when the URL
    /// or its fragment-stripped form was already visited.
    pub fn mark_visited(&self, url: &str) -> bool {
        let mut visited = self.visited.lock();
        if visited_forms(url).iter().any(|form| visited.contains(form)) {
            return false;
        }
        visited.insert(url.to_string());
        visited.insert(strip_fragment(url).to_string());
        true
    }

    pub fn is_visited(&self, url: &str) -> bool {
        let visited = self.visited.lock();
        visited_forms(url).iter().any(|form| visited.contains(form))
    }

    pub fn mark_seen(&self, url: &str) {
        self.seen.lock().insert(url.to_string());
    }

    pub fn visited_count(&self) -> usize {
        self.visited.lock().len()
    }

    pub fn seen_count(&self) -> usize {
        self.seen.lock().len()
    }

    /// Seen URLs that were never visited, sorted
    ///
    /// With `same_domain`, only URLs sharing the seed's registrable domain.
    pub fn unvisited_seen(&self, same_domain: bool) -> Vec<String> {
        let seed_domain = registrable_domain(self.scope.domain());
        let seen: Vec<String> = self.seen.lock().iter().cloned().collect();

        let mut unvisited: Vec<String> = seen
            .into_iter()
            .filter(|url| !self.is_visited(url))
            .filter(|url| {
                !same_domain
                    || extract_host(url).is_ok_and(|host| registrable_domain(&host) == seed_domain)
            })
            .collect();
        unvisited.sort();
        unvisited
    }
}

/// What the parse stage does with a discovered link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDecision {
    /// Looks like a logout link; recorded, never fetched
    Logout,
    Enqueue,
    Seen,
    Discard,
}

impl LinkDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Logout => "logout",
            Self::Enqueue => "enqueued",
            Self::Seen => "seen",
            Self::Discard => "discarded",
        }
    }
}

/// Classify a link found on a page at `depth`
pub fn classify_link(state: &CrawlState, link: &str, depth: i32) -> LinkDecision {
    if is_logout_link(link) {
        return LinkDecision::Logout;
    }
    if state.scope.in_scope(link) {
        if !state.is_visited(link) && depth < state.max_depth {
            LinkDecision::Enqueue
        } else {
            LinkDecision::Seen
        }
    } else if state.scope.in_domain(link) {
        LinkDecision::Seen
    } else {
        LinkDecision::Discard
    }
}

/// Build stage: drop already-visited URLs, otherwise emit a request
pub fn build_request(state: &CrawlState, item: FrontierItem) -> Option<FetchRequest> {
    if !state.mark_visited(&item.url) {
        trace!(url = %item.url, "Already visited");
        return None;
    }
    Some(FetchRequest {
        url: item.url,
        depth: item.depth,
    })
}

/// Everything the fetch stage needs besides the request itself
pub struct FetchContext {
    fetcher: PageFetcher,
    canary: Option<Arc<Canary>>,
    cooldown: Option<Arc<CooldownLock>>,
    base_delay: Duration,
    renderers: Option<Arc<RendererPool>>,
}

impl FetchContext {
    pub fn new(fetcher: PageFetcher) -> Self {
        Self {
            fetcher,
            canary: None,
            cooldown: None,
            base_delay: Duration::ZERO,
            renderers: None,
        }
    }

    pub fn with_canary(mut self, canary: Arc<Canary>) -> Self {
        self.canary = Some(canary);
        self
    }

    /// Pace requests through `cooldown`; its configured period is the floor
    /// that adaptive feedback never lowers.
    pub fn with_cooldown(mut self, cooldown: Arc<CooldownLock>) -> Self {
        self.base_delay = cooldown.cooldown();
        self.cooldown = Some(cooldown);
        self
    }

    pub fn with_renderers(mut self, renderers: Arc<RendererPool>) -> Self {
        self.renderers = Some(renderers);
        self
    }

    pub fn fetcher(&self) -> &PageFetcher {
        &self.fetcher
    }

    /// Fetch stage: wait out the canary, pace, fetch and optionally render.
    /// Always yields an outcome; failures carry no page.
    pub fn fetch(&self, request: FetchRequest) -> Option<FetchOutcome> {
        if let Some(canary) = &self.canary {
            if canary.is_blocked() {
                debug!(url = %request.url, "Canary reports blocking, holding fetch");
            }
            canary.wait_until_unblocked();
        }

        self.apply_recommended_interval();
        let _pace = self
            .cooldown
            .as_ref()
            .filter(|lock| !lock.cooldown().is_zero() || !lock.max_jitter().is_zero())
            .map(|lock| lock.acquire());

        let started = Instant::now();
        let result = self.fetcher.fetch(&request.url);
        let elapsed = started.elapsed().as_secs_f64();

        let page = match result {
            Ok(mut page) => {
                let mut rendered = false;
                if let Some(pool) = &self.renderers {
                    if (200..300).contains(&page.status) && !page.is_redirect() && page.is_html() {
                        if let Some(markup) = render_with(pool, &page.url) {
                            page.body = markup;
                            rendered = true;
                        }
                    }
                }
                metrics::record_fetch(Some(page.status), elapsed, rendered);
                debug!(
                    url = %page.url,
                    status = page.status,
                    depth = request.depth,
                    size = %format_bytes(page.body.len() as u64),
                    "Fetched"
                );
                Some(page)
            }
            Err(e) => {
                metrics::record_fetch(None, elapsed, false);
                warn!(url = %request.url, error = %e, "Fetch failed, dropping");
                None
            }
        };

        Some(FetchOutcome {
            page,
            depth: request.depth,
        })
    }

    /// Raise the pacing period to the adaptive canary's recommendation
    fn apply_recommended_interval(&self) {
        let (Some(canary), Some(cooldown)) = (&self.canary, &self.cooldown) else {
            return;
        };
        if !canary.is_adaptive() {
            return;
        }
        let target = secs_f64(canary.recommended_request_interval()).max(self.base_delay);
        if target != cooldown.cooldown() {
            debug!(
                from = cooldown.cooldown().as_secs_f64(),
                to = target.as_secs_f64(),
                "Adjusting request interval"
            );
            cooldown.set_cooldown(target);
        }
    }
}

/// Parse stage: build the record and route every link it carries
pub fn parse_outcome(
    state: &CrawlState,
    frontier: &WorkQueue<FrontierItem>,
    outcome: FetchOutcome,
) -> Option<CrawlRecord> {
    let page = outcome.page?;
    let depth = if page.is_redirect() {
        outcome.depth - 1
    } else {
        outcome.depth
    };

    let record = parser::build_record(page);
    for link in &record.links {
        let decision = classify_link(state, link, depth);
        match decision {
            LinkDecision::Enqueue => frontier.put(FrontierItem {
                url: link.clone(),
                depth: depth + 1,
            }),
            LinkDecision::Logout | LinkDecision::Seen => state.mark_seen(link),
            LinkDecision::Discard => {}
        }
        metrics::record_link(decision.as_str());
    }

    Some(record)
}
