//! Blocking HTTP fetcher for crawl requests
//!
//! This module provides the HTTP side of the fetch stage:
//! - [`Session`]: a reqwest client carrying the crawl's cookie jar, proxy
//!   and default headers, with redirects left to the crawler
//! - [`PageFetcher`]: bounded retries on transport failure and a hard cap
//!   on body size

use crate::crawler::headers::build_crawl_headers;
use crate::models::FetchedPage;
use crate::utils::error::FetchError;
use crate::utils::retry::{with_retry_if, RetryConfig};
use reqwest::blocking::{Client, ClientBuilder};
use reqwest::cookie::Jar;
use reqwest::redirect::Policy;
use reqwest::Proxy;
use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Default response body cap (250 MB)
pub const DEFAULT_MAX_BODY_SIZE: u64 = 250 * 1024 * 1024;

/// Settings for the crawl's HTTP session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Pre-authenticated cookies as `name=value` pairs
    pub cookies: Vec<String>,
    /// Extra request headers, applied over the defaults
    pub headers: Vec<(String, String)>,
    pub user_agent: Option<String>,
    /// `host:port` of an HTTP proxy used for both http and https
    pub proxy: Option<String>,
    pub timeout: Duration,
    pub accept_invalid_certs: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookies: Vec::new(),
            headers: Vec::new(),
            user_agent: None,
            proxy: None,
            timeout: Duration::from_secs(10),
            accept_invalid_certs: true,
        }
    }
}

impl SessionConfig {
    /// Client builder carrying the headers, timeout, TLS and proxy settings
    /// shared by crawl requests and canary probes
    pub fn client_builder(&self) -> Result<ClientBuilder, reqwest::Error> {
        let mut builder = Client::builder()
            .default_headers(build_crawl_headers(self.user_agent.as_deref(), &self.headers))
            .timeout(self.timeout)
            .danger_accept_invalid_certs(self.accept_invalid_certs);
        if let Some(proxy) = &self.proxy {
            builder = builder.proxy(Proxy::all(format!("http://{proxy}"))?);
        }
        Ok(builder)
    }
}

/// Authenticated HTTP session shared by all fetch workers
///
/// The cookie jar is an explicit object owned by the session rather than
/// process-wide state, so several crawls can run side by side.
#[derive(Clone)]
pub struct Session {
    client: Client,
    jar: Arc<Jar>,
}

impl Session {
    /// Build a session whose cookies are scoped to `origin`
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Http` if the proxy is invalid or the client
    /// cannot be built
    pub fn new(config: &SessionConfig, origin: &Url) -> Result<Self, FetchError> {
        let jar = Arc::new(Jar::default());
        for cookie in &config.cookies {
            jar.add_cookie_str(cookie.trim(), origin);
        }

        let client = config
            .client_builder()?
            .cookie_provider(Arc::clone(&jar))
            .redirect(Policy::none())
            .pool_max_idle_per_host(0)
            .build()?;

        Ok(Self { client, jar })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Add a cookie after construction, e.g. one captured during login
    pub fn add_cookie(&self, cookie: &str, url: &Url) {
        self.jar.add_cookie_str(cookie, url);
    }
}

/// Executes crawl requests for the fetch stage
pub struct PageFetcher {
    session: Session,
    retry: RetryConfig,
    max_body_size: u64,
}

impl PageFetcher {
    pub fn new(session: Session, retry: RetryConfig, max_body_size: u64) -> Self {
        Self {
            session,
            retry,
            max_body_size,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Fetch `url` without following redirects
    ///
    /// Transport failures are retried up to the configured count. Bodies
    /// larger than the cap abort the transfer and are never retried.
    pub fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        with_retry_if(&self.retry, || self.fetch_once(url), FetchError::is_transport)
    }

    fn fetch_once(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let mut response = self.session.client.get(url).send().map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else if e.is_builder() {
                FetchError::InvalidUrl(url.to_string())
            } else {
                FetchError::Http(e)
            }
        })?;

        if response
            .content_length()
            .is_some_and(|len| len > self.max_body_size)
        {
            return Err(FetchError::BodyTooLarge {
                limit: self.max_body_size,
            });
        }

        let status = response.status().as_u16();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_ascii_lowercase(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        let mut body = Vec::new();
        response
            .by_ref()
            .take(self.max_body_size + 1)
            .read_to_end(&mut body)?;
        if body.len() as u64 > self.max_body_size {
            return Err(FetchError::BodyTooLarge {
                limit: self.max_body_size,
            });
        }

        Ok(FetchedPage {
            url: url.to_string(),
            status,
            headers,
            body,
        })
    }
}
