//! robots.txt compliance for outbound HTTP.
//!
//! Parsed rules are cached per origin with their own TTL, separate from the
//! probe and content caches. Crawl delays are honored per origin using a
//! last-access stamp; the wait is an async sleep and therefore cancellable.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

use crate::config::RobotsConfig;
use crate::error::{Error, Result};
use crate::retrieval::cache::{CacheLimits, TtlLruCache};

/// Directives applying to one user-agent group.
#[derive(Debug, Clone, Default)]
struct AgentRules {
    disallow: Vec<String>,
    allow: Vec<String>,
    crawl_delay: Option<f64>,
}

impl AgentRules {
    fn is_allowed(&self, path: &str) -> bool {
        // Allow rules take precedence over disallow prefixes.
        if self.allow.iter().any(|prefix| path.starts_with(prefix)) {
            return true;
        }
        !self.disallow.iter().any(|prefix| path.starts_with(prefix))
    }
}

/// Parsed robots.txt rules for one origin.
#[derive(Debug, Clone, Default)]
pub struct RobotsRules {
    agents: HashMap<String, AgentRules>,
    wildcard: AgentRules,
}

impl RobotsRules {
    /// Parse robots.txt content. Unknown directives are ignored.
    #[must_use]
    pub fn parse(content: &str) -> Self {
        let mut rules = Self::default();
        let mut group_agents: Vec<String> = Vec::new();
        let mut group = AgentRules::default();
        let mut group_has_rules = false;

        let flush =
            |agents: &mut Vec<String>, group: &mut AgentRules, rules: &mut Self| {
                for agent in agents.drain(..) {
                    if agent == "*" {
                        rules.wildcard = group.clone();
                    } else {
                        rules.agents.insert(agent, group.clone());
                    }
                }
                *group = AgentRules::default();
            };

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((directive, value)) = line.split_once(':') else {
                continue;
            };
            let directive = directive.trim().to_ascii_lowercase();
            let value = value.trim();

            match directive.as_str() {
                "user-agent" => {
                    if group_has_rules {
                        flush(&mut group_agents, &mut group, &mut rules);
                        group_has_rules = false;
                    }
                    group_agents.push(value.to_ascii_lowercase());
                },
                "disallow" => {
                    group_has_rules = true;
                    if !value.is_empty() {
                        group.disallow.push(value.to_string());
                    }
                },
                "allow" => {
                    group_has_rules = true;
                    if !value.is_empty() {
                        group.allow.push(value.to_string());
                    }
                },
                "crawl-delay" => {
                    group_has_rules = true;
                    if let Ok(delay) = value.parse::<f64>() {
                        group.crawl_delay = Some(delay);
                    }
                },
                _ => {},
            }
        }
        flush(&mut group_agents, &mut group, &mut rules);
        rules
    }

    fn rules_for(&self, user_agent: &str) -> &AgentRules {
        let agent = user_agent.to_ascii_lowercase();
        self.agents
            .get(&agent)
            .or_else(|| {
                self.agents
                    .iter()
                    .find(|(token, _)| agent.contains(token.as_str()))
                    .map(|(_, rules)| rules)
            })
            .unwrap_or(&self.wildcard)
    }

    /// Whether `user_agent` may fetch `path`.
    #[must_use]
    pub fn is_allowed(&self, user_agent: &str, path: &str) -> bool {
        self.rules_for(user_agent).is_allowed(path)
    }

    /// Requested crawl delay for `user_agent`, when any.
    #[must_use]
    pub fn crawl_delay(&self, user_agent: &str) -> Option<Duration> {
        let delay = self
            .rules_for(user_agent)
            .crawl_delay
            .or(self.wildcard.crawl_delay)?;
        (delay > 0.0).then(|| Duration::from_secs_f64(delay))
    }
}

/// Per-origin robots cache with crawl-delay bookkeeping.
pub struct RobotsCache {
    config: RobotsConfig,
    rules: Mutex<TtlLruCache<RobotsRules>>,
    last_access: Mutex<HashMap<String, Instant>>,
    fetch_lock: Mutex<()>,
}

impl RobotsCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new(config: RobotsConfig) -> Self {
        let limits = CacheLimits::entries(config.entries_max);
        Self {
            config,
            rules: Mutex::new(TtlLruCache::new(limits)),
            last_access: Mutex::new(HashMap::new()),
            fetch_lock: Mutex::new(()),
        }
    }

    /// Enforce robots compliance for one outbound URL.
    ///
    /// Looks up (fetching and parsing on a miss) the origin's rules, fails
    /// with [`Error::AccessDisallowed`] when the configured user-agent is
    /// denied, and sleeps out any remaining crawl delay for the origin.
    ///
    /// An unreachable or missing robots.txt allows everything: absence of
    /// rules is not a denial.
    pub async fn ensure_allowed(&self, client: &reqwest::Client, url: &Url) -> Result<()> {
        let origin = url.origin().ascii_serialization();
        let rules = self.rules_for_origin(client, url, &origin).await;

        if !rules.is_allowed(&self.config.user_agent, url.path()) {
            debug!(url = %url, "robots.txt denies access");
            return Err(Error::AccessDisallowed {
                url: url.to_string(),
            });
        }

        if let Some(delay) = rules.crawl_delay(&self.config.user_agent) {
            let wait = {
                let mut stamps = self.last_access.lock().await;
                let now = Instant::now();
                let wait = stamps
                    .get(&origin)
                    .and_then(|last| delay.checked_sub(now.saturating_duration_since(*last)));
                stamps.insert(origin.clone(), now + wait.unwrap_or_default());
                wait
            };
            if let Some(wait) = wait {
                debug!(origin = %origin, wait_ms = wait.as_millis() as u64, "honoring crawl delay");
                tokio::time::sleep(wait).await;
            }
        }
        Ok(())
    }

    async fn rules_for_origin(
        &self,
        client: &reqwest::Client,
        url: &Url,
        origin: &str,
    ) -> RobotsRules {
        if let Some(Ok(rules)) = self.rules.lock().await.get(origin) {
            return rules;
        }

        // Concurrent misses for one origin coalesce onto a single fetch.
        let guard = self.fetch_lock.lock().await;
        if let Some(Ok(rules)) = self.rules.lock().await.get(origin) {
            return rules;
        }
        let rules = self.fetch_rules(client, url).await;
        self.rules.lock().await.insert(
            origin.to_string(),
            Ok(rules.clone()),
            Duration::from_secs(self.config.ttl),
            0,
        );
        drop(guard);
        rules
    }

    async fn fetch_rules(&self, client: &reqwest::Client, url: &Url) -> RobotsRules {
        let Ok(robots_url) = url.join("/robots.txt") else {
            return RobotsRules::default();
        };
        let request = client
            .get(robots_url.clone())
            .timeout(Duration::from_secs_f64(self.config.request_timeout));
        match request.send().await {
            Ok(response) if response.status().is_success() => match response.text().await {
                Ok(body) => {
                    debug!(url = %robots_url, bytes = body.len(), "parsed robots.txt");
                    RobotsRules::parse(&body)
                },
                Err(e) => {
                    warn!(url = %robots_url, error = %e, "failed to read robots.txt body");
                    RobotsRules::default()
                },
            },
            Ok(response) => {
                debug!(url = %robots_url, status = %response.status(), "no robots.txt");
                RobotsRules::default()
            },
            Err(e) => {
                warn!(url = %robots_url, error = %e, "failed to fetch robots.txt");
                RobotsRules::default()
            },
        }
    }
}
