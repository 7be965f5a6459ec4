//! # librovore-core
//!
//! Core functionality for librovore - a structured-documentation query
//! engine. Given a documentation site URL (or local path) and a search term,
//! it discovers which documentation generator produced the site, loads the
//! site's machine-readable inventory, filters by name and metadata, fetches
//! the relevant pages, extracts signatures and descriptions, and returns
//! structured results for tool-calling agents or human display.
//!
//! ## Architecture
//!
//! - **Retrieval**: a caching HTTP proxy with request coalescing and
//!   robots.txt compliance
//! - **Inventory processors**: detect and parse `objects.inv`, MkDocs
//!   search indices, rustdoc `all.html`, and pydoctor Lunr indices
//! - **Structure processors**: theme-aware HTML content extraction with
//!   Markdown conversion
//! - **Detection**: confidence-scored, cached, per-genus classification
//! - **Query orchestration**: `query_inventory` and `query_content`
//! - **Results**: typed, self-rendering outcomes with structured errors
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use librovore_core::{Config, Librovore, query::InventoryQueryOptions};
//!
//! # async fn run() -> librovore_core::Result<()> {
//! let engine = Librovore::new(Config::load()?).await?;
//! let result = engine
//!     .query_inventory(
//!         "https://docs.python.org/3",
//!         "os.path.join",
//!         InventoryQueryOptions::default(),
//!     )
//!     .await?;
//! println!("{} matches", result.matches_total);
//! # Ok(())
//! # }
//! ```

/// Configuration loading and validation
pub mod config;
/// Per-genus detection, caching, and selection
pub mod detection;
/// Error types and result aliases
pub mod error;
/// Extension loading and processor registries
pub mod extensions;
/// Inventory processors and the inventory object model
pub mod inventory;
/// Name matching: exact, regex, and partial-ratio fuzzy
pub mod matching;
/// Query orchestration over detection, inventories, and extraction
pub mod query;
/// Typed results and rendering
pub mod results;
/// HTTP cache proxy with coalescing and robots compliance
pub mod retrieval;
/// Structure processors and HTML to Markdown conversion
pub mod structure;
/// Core data types shared across components
pub mod types;

use std::sync::Arc;
use std::time::Duration;

pub use config::Config;
pub use error::{Error, Result};
pub use matching::MatchMode;
pub use results::{
    ContentQueryResult, DetectionsResult, ErrorResponse, InventoryQueryResult,
    ProcessorsSurveyResult, Render,
};
pub use types::{ContentDocument, InventoryObject, ProcessorGenus};

use detection::DetectionCaches;
use extensions::{ExtensionManager, ProcessorRegistry};
use retrieval::CacheProxy;

/// The process-wide engine handle.
///
/// Owns the shared caches, the HTTP proxy, and the processor registries;
/// all state is explicit here rather than module-level, so embedders can
/// run isolated engines side by side. Construction follows the
/// initialization order: configuration, then caches, then registries.
pub struct Librovore {
    config: Config,
    proxy: Arc<CacheProxy>,
    registry: Arc<ProcessorRegistry>,
    detections: DetectionCaches,
}

impl Librovore {
    /// Build an engine with the built-in extensions.
    ///
    /// # Errors
    ///
    /// Fails when the HTTP client cannot be constructed or a required
    /// extension cannot be installed or registered.
    pub async fn new(config: Config) -> Result<Self> {
        let manager = ExtensionManager::new(config.clone());
        Self::with_manager(config, manager).await
    }

    /// Build an engine with a custom extension manager (extra registrars,
    /// test installers).
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Librovore::new`].
    pub async fn with_manager(config: Config, mut manager: ExtensionManager) -> Result<Self> {
        let proxy = Arc::new(CacheProxy::new(&config)?);
        let registry = Arc::new(manager.build_registry().await?);
        let detections = DetectionCaches::new(Duration::from_secs(config.detection.cache_ttl));
        Ok(Self {
            config,
            proxy,
            registry,
            detections,
        })
    }

    /// The engine's configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// The shared HTTP cache proxy.
    #[must_use]
    pub fn proxy(&self) -> &CacheProxy {
        &self.proxy
    }

    /// The processor registries.
    #[must_use]
    pub fn registry(&self) -> &ProcessorRegistry {
        &self.registry
    }

    pub(crate) const fn detection_caches(&self) -> &DetectionCaches {
        &self.detections
    }

    /// Apply the configured whole-query soft timeout to a future.
    ///
    /// On expiry the future is dropped at its next suspension point and a
    /// [`Error::Timeout`] is returned; boundaries reify it into a partial
    /// [`ErrorResponse`].
    pub async fn with_query_timeout<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        match self.config.query_timeout() {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(format!(
                    "query exceeded the soft limit of {}s",
                    limit.as_secs()
                ))),
            },
            None => fut.await,
        }
    }
}
