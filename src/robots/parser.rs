//! Robots.txt rule evaluation
//!
//! Matching is delegated to the robotstxt crate; this wrapper only adds the
//! allow-all fallback used when a site has no usable robots.txt.

use robotstxt::DefaultMatcher;

/// Robots.txt rules for one origin
#[derive(Debug, Clone)]
pub struct ParsedRobots {
    /// Raw robots.txt body (empty means allow all)
    content: String,
}

impl ParsedRobots {
    /// Wraps a fetched robots.txt body
    pub fn from_content(content: &str) -> Self {
        Self {
            content: content.to_string(),
        }
    }

    /// Rules that allow everything
    ///
    /// Used when robots.txt is missing, unreachable or not text.
    pub fn allow_all() -> Self {
        Self {
            content: String::new(),
        }
    }

    /// Returns true if no rule could ever disallow a URL
    pub fn is_allow_all(&self) -> bool {
        self.content.trim().is_empty()
    }

    /// Checks if a URL is allowed for the given product token
    ///
    /// # Arguments
    ///
    /// * `url` - Absolute URL or path (e.g., "/news/today")
    /// * `agent` - Product token the rules are matched against (e.g., "ScrapeConductor")
    ///
    /// # Returns
    ///
    /// * `true` - If the URL may be fetched
    /// * `false` - If a matching group disallows it
    pub fn is_allowed(&self, url: &str, agent: &str) -> bool {
        if self.is_allow_all() {
            return true;
        }

        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&self.content, agent, url)
    }
}
