//! HTTP cache proxy: every outbound request goes through here.
//!
//! The proxy offers two operations, [`CacheProxy::probe`] (does the resource
//! exist) and [`CacheProxy::retrieve`] / [`CacheProxy::retrieve_text`]
//! (fetch contents), backed by two independent caches: a probe cache bounded
//! by entry count and a content cache bounded by total bytes. Failures are
//! cached with their error kind and re-raised until their TTL elapses.
//!
//! Concurrent callers for the same URL coalesce onto a per-URL async lock,
//! guaranteeing at most one in-flight request per URL; per-host semaphores
//! bound connection concurrency; robots.txt is consulted before any remote
//! request. Filesystem sources bypass robots but share both caches.

pub mod cache;
pub mod robots;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, trace};
use url::Url;

use crate::config::Config;
use crate::error::{Error, Result};
use cache::{CacheLimits, CacheOutcome, CachedFailure, TtlLruCache};
use robots::RobotsCache;

/// MIME types (beyond `text/*`) acceptable for text retrieval.
const TEXT_MIME_ALLOWLIST: &[&str] = &[
    "application/json",
    "application/xml",
    "application/xhtml+xml",
    "application/javascript",
    "application/rss+xml",
];

/// Where a URL resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceTarget {
    /// An http(s) resource.
    Remote(Url),
    /// A local file, from a bare path or a `file:` URL.
    Local(PathBuf),
}

impl SourceTarget {
    /// Classify a source string as remote or local.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SourceInvalid`] for unsupported schemes or
    /// unparseable URLs.
    pub fn classify(source: &str) -> Result<Self> {
        if source.starts_with("http://") || source.starts_with("https://") {
            let url = Url::parse(source)
                .map_err(|e| Error::SourceInvalid(format!("'{source}': {e}")))?;
            return Ok(Self::Remote(url));
        }
        if let Some(rest) = source.strip_prefix("file://") {
            let url = Url::parse(source)
                .map_err(|e| Error::SourceInvalid(format!("'{source}': {e}")))?;
            return url.to_file_path().map(Self::Local).map_err(|()| {
                Error::SourceInvalid(format!("'{rest}' is not a valid file path"))
            });
        }
        if source.contains("://") {
            return Err(Error::SourceInvalid(format!(
                "unsupported scheme in '{source}'"
            )));
        }
        Ok(Self::Local(PathBuf::from(source)))
    }
}

/// A cached retrieval payload.
#[derive(Debug, Clone)]
pub struct Payload {
    bytes: Arc<Vec<u8>>,
    content_type: Option<String>,
}

impl Payload {
    /// Raw payload bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The `Content-Type` the server reported, when any.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Decode to text using the reported charset with a UTF-8 fallback.
    ///
    /// The `Content-Type` charset parameter selects the decoder; an absent,
    /// unknown, or unlabeled charset decodes as lossy UTF-8.
    #[must_use]
    pub fn decode_text(&self) -> String {
        let encoding = self
            .content_type
            .as_deref()
            .and_then(charset_label)
            .and_then(|label| encoding_rs::Encoding::for_label(label.as_bytes()));
        match encoding {
            Some(encoding) => {
                let (text, _, _) = encoding.decode(&self.bytes);
                text.into_owned()
            },
            None => String::from_utf8_lossy(&self.bytes).into_owned(),
        }
    }

    fn size(&self) -> usize {
        self.bytes.len()
    }

    fn mime(&self) -> Option<&str> {
        self.content_type
            .as_deref()
            .map(|ct| ct.split(';').next().unwrap_or(ct).trim())
    }
}

/// Cached probe outcome.
#[derive(Debug, Clone, Copy)]
struct ProbeOutcome {
    exists: bool,
}

/// Cache traffic counters, exposed under `reveal_internals`.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct ProxyStats {
    /// Probe cache hits.
    pub probe_hits: u64,
    /// Probe cache misses (network or filesystem work performed).
    pub probe_misses: u64,
    /// Content cache hits.
    pub content_hits: u64,
    /// Content cache misses.
    pub content_misses: u64,
}

#[derive(Debug, Default)]
struct StatCounters {
    probe_hits: AtomicU64,
    probe_misses: AtomicU64,
    content_hits: AtomicU64,
    content_misses: AtomicU64,
}

/// The HTTP cache proxy shared by all queries in a process.
pub struct CacheProxy {
    client: reqwest::Client,
    config: Config,
    probe_cache: Mutex<TtlLruCache<ProbeOutcome>>,
    content_cache: Mutex<TtlLruCache<Payload>>,
    robots: RobotsCache,
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    host_slots: Mutex<HashMap<String, Arc<Semaphore>>>,
    stats: StatCounters,
}

impl CacheProxy {
    /// Build a proxy from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.retrieve_timeout())
            .user_agent(config.cache.robots.user_agent.clone())
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| Error::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            probe_cache: Mutex::new(TtlLruCache::new(CacheLimits::entries(
                config.cache.probe.entries_max,
            ))),
            content_cache: Mutex::new(TtlLruCache::new(CacheLimits::bytes(
                config.cache.content.max_memory_bytes,
            ))),
            robots: RobotsCache::new(config.cache.robots.clone()),
            inflight: Mutex::new(HashMap::new()),
            host_slots: Mutex::new(HashMap::new()),
            stats: StatCounters::default(),
            config: config.clone(),
        })
    }

    /// Does the resource exist? HEAD semantics for HTTP, stat for files.
    ///
    /// # Errors
    ///
    /// Fails on robots denial, transport failures, and 5xx statuses. A 4xx
    /// status is a successful probe whose answer is `false`.
    pub async fn probe(&self, url: &str) -> Result<bool> {
        let target = SourceTarget::classify(url)?;

        if let Some(outcome) = self.probe_cache.lock().await.get(url) {
            self.stats.probe_hits.fetch_add(1, Ordering::Relaxed);
            return materialize(outcome, url).map(|o| o.exists);
        }

        let lock = self.lock_for(&format!("HEAD {url}")).await;
        let guard = lock.lock().await;
        let result = match self.probe_cache.lock().await.get(url) {
            Some(outcome) => {
                self.stats.probe_hits.fetch_add(1, Ordering::Relaxed);
                materialize(outcome, url)
            },
            None => {
                self.stats.probe_misses.fetch_add(1, Ordering::Relaxed);
                self.probe_uncached(url, &target).await
            },
        };
        drop(guard);
        self.prune_lock(&format!("HEAD {url}"), &lock).await;
        result.map(|o| o.exists)
    }

    /// Fetch resource contents, through the content cache.
    ///
    /// # Errors
    ///
    /// Fails on robots denial, HTTP error statuses, and transport failures;
    /// cached failures re-raise without a network round-trip until their TTL
    /// elapses.
    pub async fn retrieve(&self, url: &str) -> Result<Payload> {
        let target = SourceTarget::classify(url)?;

        if let Some(outcome) = self.content_cache.lock().await.get(url) {
            self.stats.content_hits.fetch_add(1, Ordering::Relaxed);
            return materialize(outcome, url);
        }

        let lock = self.lock_for(&format!("GET {url}")).await;
        let guard = lock.lock().await;
        let result = match self.content_cache.lock().await.get(url) {
            Some(outcome) => {
                self.stats.content_hits.fetch_add(1, Ordering::Relaxed);
                materialize(outcome, url)
            },
            None => {
                self.stats.content_misses.fetch_add(1, Ordering::Relaxed);
                self.retrieve_uncached(url, &target).await
            },
        };
        drop(guard);
        self.prune_lock(&format!("GET {url}"), &lock).await;
        result
    }

    /// Fetch resource contents and decode to text.
    ///
    /// # Errors
    ///
    /// In addition to [`CacheProxy::retrieve`] failures, fails with
    /// [`Error::ContentTypeInvalid`] when the MIME type is outside the text
    /// allow-list.
    pub async fn retrieve_text(&self, url: &str) -> Result<String> {
        let payload = self.retrieve(url).await?;
        if let Some(mime) = payload.mime() {
            let allowed = mime.starts_with("text/") || TEXT_MIME_ALLOWLIST.contains(&mime);
            if !allowed {
                return Err(Error::ContentTypeInvalid {
                    url: url.to_string(),
                    actual: mime.to_string(),
                });
            }
        }
        Ok(payload.decode_text())
    }

    /// Snapshot of cache traffic counters.
    #[must_use]
    pub fn stats(&self) -> ProxyStats {
        ProxyStats {
            probe_hits: self.stats.probe_hits.load(Ordering::Relaxed),
            probe_misses: self.stats.probe_misses.load(Ordering::Relaxed),
            content_hits: self.stats.content_hits.load(Ordering::Relaxed),
            content_misses: self.stats.content_misses.load(Ordering::Relaxed),
        }
    }

    /// Current byte total held by the content cache.
    pub async fn content_cache_bytes(&self) -> usize {
        self.content_cache.lock().await.total_bytes()
    }

    async fn probe_uncached(&self, url: &str, target: &SourceTarget) -> Result<ProbeOutcome> {
        let ttls = &self.config.cache.probe;
        match target {
            SourceTarget::Local(path) => {
                let exists = tokio::fs::metadata(path).await.is_ok();
                let ttl = if exists { ttls.success_ttl } else { ttls.error_ttl };
                let outcome = ProbeOutcome { exists };
                self.probe_cache.lock().await.insert(
                    url.to_string(),
                    Ok(outcome),
                    Duration::from_secs(ttl),
                    0,
                );
                Ok(outcome)
            },
            SourceTarget::Remote(remote) => {
                self.robots.ensure_allowed(&self.client, remote).await?;
                let _slot = self.host_slot(remote).await;
                trace!(url, "HEAD");
                let response = self
                    .client
                    .head(remote.clone())
                    .timeout(self.config.probe_timeout())
                    .send()
                    .await;
                let (outcome, ttl) = match response {
                    Ok(resp) if resp.status().is_success() => {
                        (Ok(ProbeOutcome { exists: true }), ttls.success_ttl)
                    },
                    Ok(resp) if resp.status().is_client_error() => {
                        (Ok(ProbeOutcome { exists: false }), ttls.error_ttl)
                    },
                    Ok(resp) => (
                        Err(CachedFailure::HttpStatus(resp.status().as_u16())),
                        ttls.network_error_ttl,
                    ),
                    Err(e) => (
                        Err(CachedFailure::Network(flatten_reqwest(&e))),
                        ttls.network_error_ttl,
                    ),
                };
                self.probe_cache.lock().await.insert(
                    url.to_string(),
                    outcome.clone(),
                    Duration::from_secs(ttl),
                    0,
                );
                materialize(outcome, url)
            },
        }
    }

    async fn retrieve_uncached(&self, url: &str, target: &SourceTarget) -> Result<Payload> {
        let ttls = &self.config.cache.content;
        let (outcome, ttl) = match target {
            SourceTarget::Local(path) => match tokio::fs::read(path).await {
                Ok(bytes) => (
                    Ok(Payload {
                        bytes: Arc::new(bytes),
                        content_type: None,
                    }),
                    ttls.success_ttl,
                ),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    (Err(CachedFailure::FileMissing), ttls.error_ttl)
                },
                Err(e) => return Err(e.into()),
            },
            SourceTarget::Remote(remote) => {
                self.robots.ensure_allowed(&self.client, remote).await?;
                let _slot = self.host_slot(remote).await;
                debug!(url, "GET");
                match self.client.get(remote.clone()).send().await {
                    Ok(resp) => {
                        let status = resp.status();
                        if status.is_success() {
                            let content_type = resp
                                .headers()
                                .get(reqwest::header::CONTENT_TYPE)
                                .and_then(|v| v.to_str().ok())
                                .map(ToString::to_string);
                            match resp.bytes().await {
                                Ok(bytes) => (
                                    Ok(Payload {
                                        bytes: Arc::new(bytes.to_vec()),
                                        content_type,
                                    }),
                                    ttls.success_ttl,
                                ),
                                Err(e) => (
                                    Err(CachedFailure::Network(flatten_reqwest(&e))),
                                    ttls.network_error_ttl,
                                ),
                            }
                        } else if status.is_client_error() {
                            (
                                Err(CachedFailure::HttpStatus(status.as_u16())),
                                ttls.error_ttl,
                            )
                        } else {
                            (
                                Err(CachedFailure::HttpStatus(status.as_u16())),
                                ttls.network_error_ttl,
                            )
                        }
                    },
                    Err(e) => (
                        Err(CachedFailure::Network(flatten_reqwest(&e))),
                        ttls.network_error_ttl,
                    ),
                }
            },
        };

        let size = outcome.as_ref().map(Payload::size).unwrap_or(0);
        self.content_cache.lock().await.insert(
            url.to_string(),
            outcome.clone(),
            Duration::from_secs(ttl),
            size,
        );
        materialize(outcome, url)
    }

    async fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        let mut inflight = self.inflight.lock().await;
        inflight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the per-URL lock entry once no other caller holds it, keeping the
    /// coalescing map bounded under adversarial URL churn.
    async fn prune_lock(&self, key: &str, ours: &Arc<Mutex<()>>) {
        let mut inflight = self.inflight.lock().await;
        if let Some(entry) = inflight.get(key) {
            // Two strong counts: the map's and `ours`.
            if Arc::ptr_eq(entry, ours) && Arc::strong_count(entry) == 2 {
                inflight.remove(key);
            }
        }
    }

    async fn host_slot(&self, url: &Url) -> tokio::sync::OwnedSemaphorePermit {
        let host = url.host_str().unwrap_or_default().to_string();
        let semaphore = {
            let mut slots = self.host_slots.lock().await;
            slots
                .entry(host)
                .or_insert_with(|| {
                    Arc::new(Semaphore::new(self.config.limits.per_host_concurrency))
                })
                .clone()
        };
        // The semaphore is never closed, so acquisition only fails on close.
        semaphore
            .acquire_owned()
            .await
            .unwrap_or_else(|_| unreachable!("host semaphore closed"))
    }
}

fn materialize<V>(outcome: CacheOutcome<V>, url: &str) -> Result<V> {
    outcome.map_err(|failure| failure.to_error(url))
}

/// The charset parameter of a `Content-Type` header, when present.
fn charset_label(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"'))
    })
}

fn flatten_reqwest(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        format!("timeout: {error}")
    } else if error.is_connect() {
        format!("connect: {error}")
    } else {
        error.to_string()
    }
}
