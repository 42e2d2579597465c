//! Crawl scope policy
//!
//! Decides whether a discovered URL should be fetched ([`Scope::in_scope`])
//! or is merely worth recording as seen ([`Scope::in_domain`]).
//!
//! Rules match against the URL's path plus `?query`, anchored at the start.
//! Rules from files are raw regular expressions; rules from robots.txt are
//! literal paths where `*` matches any sequence and `$` anchors the end.

pub mod robots;

use crate::utils::error::ScopeError;
use crate::utils::strip_www;
use regex::Regex;
use std::fs;
use std::path::Path;
use url::Url;

pub use robots::{robots_url, RobotsRules};

/// Path suffixes fetched regardless of domain when script grabbing is on
const SCRIPT_EXTENSIONS: &[&str] = &[".js", ".mjs"];

/// A compiled whitelist or blacklist rule
#[derive(Debug, Clone)]
pub struct ScopeRule {
    source: String,
    regex: Regex,
}

impl ScopeRule {
    /// Compile a raw regular expression rule
    pub fn regex(pattern: &str) -> Result<Self, ScopeError> {
        Self::compile(pattern, pattern.to_string())
    }

    /// Compile a robots-style literal rule
    ///
    /// Everything is escaped except `*` (any sequence), `$` (end anchor) and
    /// `^`. A rule ending in `/` also matches any suffix without a `?`.
    pub fn literal(rule: &str) -> Result<Self, ScopeError> {
        let mut pattern = regex::escape(rule)
            .replace(r"\*", ".*")
            .replace(r"\^", "^")
            .replace(r"\$", "$");
        if pattern.ends_with('/') {
            pattern.push_str("[^?]*");
        }
        Self::compile(rule, pattern)
    }

    fn compile(source: &str, pattern: String) -> Result<Self, ScopeError> {
        let regex = Regex::new(&format!("^(?:{pattern})")).map_err(|e| {
            ScopeError::InvalidPattern {
                pattern: source.to_string(),
                source: e,
            }
        })?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    pub fn matches(&self, target: &str) -> bool {
        self.regex.is_match(target)
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Which list a rules file feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleList {
    Whitelist,
    Blacklist,
}

/// Per-crawl scope policy. Built before the crawl starts and read-only after.
#[derive(Debug, Clone)]
pub struct Scope {
    domain: String,
    subdomains: bool,
    js_grabbing: bool,
    whitelist: Vec<ScopeRule>,
    blacklist: Vec<ScopeRule>,
    sitemaps: Vec<String>,
}

impl Scope {
    /// Scope anchored on the seed URL's host, minus any leading `www.`
    pub fn new(seed: &str, subdomains: bool, js_grabbing: bool) -> Result<Self, ScopeError> {
        let domain = host_of(seed).ok_or_else(|| ScopeError::NoHost(seed.to_string()))?;
        Ok(Self {
            domain,
            subdomains,
            js_grabbing,
            whitelist: Vec::new(),
            blacklist: Vec::new(),
            sitemaps: Vec::new(),
        })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn add_whitelist_rule(&mut self, pattern: &str) -> Result<(), ScopeError> {
        self.whitelist.push(ScopeRule::regex(pattern)?);
        Ok(())
    }

    pub fn add_blacklist_rule(&mut self, pattern: &str) -> Result<(), ScopeError> {
        self.blacklist.push(ScopeRule::regex(pattern)?);
        Ok(())
    }

    /// Load one regular expression per non-empty line. Returns the count added.
    pub fn add_rules_from_file(&mut self, path: &Path, list: RuleList) -> Result<usize, ScopeError> {
        let content = fs::read_to_string(path).map_err(|source| ScopeError::RulesFile {
            path: path.to_path_buf(),
            source,
        })?;

        let mut added = 0;
        for rule in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match list {
                RuleList::Whitelist => self.add_whitelist_rule(rule)?,
                RuleList::Blacklist => self.add_blacklist_rule(rule)?,
            }
            added += 1;
        }
        tracing::info!(path = %path.display(), rules = added, list = ?list, "Loaded scope rules");
        Ok(added)
    }

    /// Append robots.txt Allow/Disallow rules and remember its sitemaps
    pub fn add_robots_rules(&mut self, robots: &RobotsRules) -> Result<(), ScopeError> {
        for rule in &robots.allow {
            self.whitelist.push(ScopeRule::literal(rule)?);
        }
        for rule in &robots.disallow {
            self.blacklist.push(ScopeRule::literal(rule)?);
        }
        self.sitemaps.extend(robots.sitemaps.iter().cloned());
        Ok(())
    }

    /// Sitemap URLs collected from robots.txt
    pub fn sitemaps(&self) -> &[String] {
        &self.sitemaps
    }

    pub fn in_scope(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();

        if self.js_grabbing && SCRIPT_EXTENSIONS.iter().any(|ext| parsed.path().ends_with(ext)) {
            return true;
        }

        let host = strip_www(&host);
        let domain_ok = if self.subdomains {
            self.matches_domain_or_subdomain(host)
        } else {
            host == self.domain
        };
        if !domain_ok {
            return false;
        }

        let target = match parsed.query() {
            Some(query) => format!("{}?{query}", parsed.path()),
            None => parsed.path().to_string(),
        };
        if self.whitelist.iter().any(|rule| rule.matches(&target)) {
            return true;
        }
        !self.blacklist.iter().any(|rule| rule.matches(&target))
    }

    /// Same host or a subdomain of it, ignoring allow/deny rules
    pub fn in_domain(&self, url: &str) -> bool {
        host_of(url).is_some_and(|host| self.matches_domain_or_subdomain(&host))
    }

    fn matches_domain_or_subdomain(&self, host: &str) -> bool {
        host == self.domain
            || host
                .strip_suffix(self.domain.as_str())
                .is_some_and(|prefix| prefix.ends_with('.'))
    }
}

/// Lowercased host with one leading `www.` removed
fn host_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    Some(strip_www(&host).to_string())
}
