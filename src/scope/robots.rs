//! robots.txt ingestion.
//!
//! Only the `User-agent: *` group is honoured: `Allow` lines become
//! whitelist rules and `Disallow` lines become blacklist rules. `Sitemap`
//! lines are collected regardless of group.

use url::Url;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RobotsRules {
    pub allow: Vec<String>,
    pub disallow: Vec<String>,
    pub sitemaps: Vec<String>,
}

impl RobotsRules {
    pub fn parse(content: &str) -> Self {
        let mut rules = Self::default();
        let mut current_agent: Option<String> = None;

        for raw in content.lines() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((f, v)) => (f.trim().to_ascii_lowercase(), v.trim()),
                None => (line.to_ascii_lowercase(), ""),
            };

            match field.as_str() {
                "user-agent" => current_agent = Some(value.to_string()),
                "sitemap" if !value.is_empty() => rules.sitemaps.push(value.to_string()),
                // An empty value places no restriction
                "allow" | "disallow" if value.is_empty() => {}
                "allow" if current_agent.as_deref() == Some("*") => {
                    rules.allow.push(value.to_string())
                }
                "disallow" if current_agent.as_deref() == Some("*") => {
                    rules.disallow.push(value.to_string())
                }
                _ => {}
            }
        }

        rules
    }

    pub fn is_empty(&self) -> bool {
        self.allow.is_empty() && self.disallow.is_empty() && self.sitemaps.is_empty()
    }
}

/// Location of robots.txt for the site serving `url`
pub fn robots_url(url: &Url) -> Url {
    if url.path().ends_with("/robots.txt") {
        let mut same = url.clone();
        same.set_query(None);
        same.set_fragment(None);
        return same;
    }
    let mut robots = url.clone();
    robots.set_path("/robots.txt");
    robots.set_query(None);
    robots.set_fragment(None);
    robots
}
