//! Inventory processors: detect and load machine-readable inventories.
//!
//! Each processor probes a source for its signature artifacts (an
//! `objects.inv`, a search index, an `all.html`), returns a
//! confidence-scored [`InventoryDetection`] holding a handle to the
//! artifact, and loads the inventory lazily on first filter. Loaded
//! inventories are cached on the detection itself, which lives in the
//! detection cache for its TTL.

pub mod mkdocs;
pub mod pydoctor;
pub mod rustdoc;
pub mod sphinx;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::{Error, Result};
use crate::matching::NameMatcher;
use crate::retrieval::CacheProxy;
use crate::types::{InventoryCapabilities, InventoryObject};

/// Inventory type tag for Sphinx `objects.inv`.
pub const SPHINX_OBJECTS_INV: &str = "sphinx_objects_inv";
/// Inventory type tag for MkDocs search indices (and mkdocstrings sites).
pub const MKDOCS_SEARCH_INDEX: &str = "mkdocs_search_index";
/// Inventory type tag for Rustdoc `all.html` listings.
pub const RUSTDOC: &str = "rustdoc";
/// Inventory type tag for Pydoctor Lunr search indices.
pub const PYDOCTOR_SEARCH_INDEX: &str = "pydoctor_search_index";

/// Outcome of one inventory processor recognizing a source.
///
/// Holds the artifact location and a lazily-populated, shared cache of the
/// loaded objects; cloning shares the loaded inventory.
#[derive(Debug, Clone)]
pub struct InventoryDetection {
    /// Name of the processor that produced this detection.
    pub processor: String,
    /// Normalized source the detection applies to.
    pub source: String,
    /// Confidence in `[0, 1]`; below the configured floor it is rejected.
    pub confidence: f64,
    /// Capabilities of the producing processor at detection time.
    pub capabilities: InventoryCapabilities,
    /// Inventory type tag, consulted for structure compatibility.
    pub inventory_type: String,
    /// Concrete URL of the inventory artifact to load.
    pub inventory_url: String,
    /// Base URL object URIs resolve against.
    pub location_base: String,
    objects: Arc<OnceCell<Arc<Vec<InventoryObject>>>>,
}

impl InventoryDetection {
    /// A fresh detection with an empty inventory handle.
    #[must_use]
    pub fn new(
        processor: &str,
        source: &str,
        confidence: f64,
        capabilities: InventoryCapabilities,
        inventory_type: &str,
        inventory_url: String,
    ) -> Self {
        Self {
            processor: processor.to_string(),
            source: source.to_string(),
            confidence,
            capabilities,
            inventory_type: inventory_type.to_string(),
            inventory_url,
            location_base: base_of(source),
            objects: Arc::new(OnceCell::new()),
        }
    }

    /// The loaded inventory, loading through `processor` on first call.
    pub async fn objects(
        &self,
        processor: &dyn InventoryProcessor,
        proxy: &CacheProxy,
    ) -> Result<Arc<Vec<InventoryObject>>> {
        let objects = self
            .objects
            .get_or_try_init(|| async {
                let loaded = processor.load_inventory(proxy, self).await?;
                debug!(
                    processor = self.processor,
                    source = self.source,
                    objects = loaded.len(),
                    "inventory loaded"
                );
                Ok::<_, Error>(Arc::new(dedupe(loaded)))
            })
            .await?;
        Ok(Arc::clone(objects))
    }
}

/// An inventory object paired with its name-match score.
#[derive(Debug, Clone)]
pub struct ScoredObject {
    /// The matched object.
    pub object: InventoryObject,
    /// Match score in `[0, 100]`, used for ordering and later re-ranking.
    pub score: u8,
}

/// A processor that can recognize and load one inventory format.
#[async_trait]
pub trait InventoryProcessor: Send + Sync {
    /// Registration name, unique within the inventory genus.
    fn name(&self) -> &str;

    /// Statically declared capabilities.
    fn capabilities(&self) -> &InventoryCapabilities;

    /// Probe `source` for this processor's signature artifacts.
    ///
    /// Returns `Ok(None)` when the source is not recognized; errors are
    /// reserved for failures that must abort detection (robots denial).
    async fn detect(
        &self,
        proxy: &CacheProxy,
        source: &str,
    ) -> Result<Option<InventoryDetection>>;

    /// Load and parse the inventory artifact behind a detection.
    async fn load_inventory(
        &self,
        proxy: &CacheProxy,
        detection: &InventoryDetection,
    ) -> Result<Vec<InventoryObject>>;
}

/// Load, filter, and order a detection's inventory.
///
/// Every key in `filters` must be in the detection's supported filters;
/// unknown keys fail with [`Error::FilterUnsupported`]. Matching objects are
/// ordered by match score descending, then name, so the ordering is
/// deterministic.
pub async fn filter_inventory(
    processor: &dyn InventoryProcessor,
    proxy: &CacheProxy,
    detection: &InventoryDetection,
    matcher: &NameMatcher,
    filters: &BTreeMap<String, String>,
) -> Result<Vec<ScoredObject>> {
    for key in filters.keys() {
        if !detection.capabilities.supported_filters.contains(key) {
            return Err(Error::FilterUnsupported {
                filter: key.clone(),
                processor: detection.processor.clone(),
            });
        }
    }

    let objects = detection.objects(processor, proxy).await?;
    let mut matched: Vec<ScoredObject> = objects
        .iter()
        .filter(|obj| {
            filters
                .iter()
                .all(|(key, value)| obj.specifics.matches(key, value))
        })
        .filter_map(|obj| {
            matcher.score(&obj.name).map(|score| ScoredObject {
                object: obj.clone(),
                score,
            })
        })
        .collect();
    matched.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| a.object.name.cmp(&b.object.name))
    });
    Ok(matched)
}

/// Drop duplicate objects from one inventory load, keeping first occurrence.
fn dedupe(objects: Vec<InventoryObject>) -> Vec<InventoryObject> {
    let mut seen = std::collections::HashSet::new();
    objects
        .into_iter()
        .filter(|obj| {
            seen.insert((
                obj.inventory_type.clone(),
                obj.location_base.clone(),
                obj.name.clone(),
                obj.uri.clone(),
            ))
        })
        .collect()
}

/// Base location (with trailing slash) that relative URIs resolve against.
#[must_use]
pub fn base_of(source: &str) -> String {
    if source.ends_with('/') {
        source.to_string()
    } else {
        format!("{source}/")
    }
}

/// Join a relative artifact path onto a source location.
#[must_use]
pub fn join_source(source: &str, rel: &str) -> String {
    format!("{}{rel}", base_of(source))
}

/// Fetch the root page of a source, trying `index.html` as a fallback.
///
/// Detection needs the page HTML for generator markers; either the source
/// itself serves it (remote roots) or an `index.html` beneath it does
/// (local trees and file URLs).
pub(crate) async fn fetch_root_page(proxy: &CacheProxy, source: &str) -> Result<Option<String>> {
    match proxy.retrieve_text(source).await {
        Ok(text) => return Ok(Some(text)),
        Err(Error::AccessDisallowed { url }) => {
            return Err(Error::AccessDisallowed { url });
        },
        Err(_) => {},
    }
    match proxy.retrieve_text(&join_source(source, "index.html")).await {
        Ok(text) => Ok(Some(text)),
        Err(Error::AccessDisallowed { url }) => Err(Error::AccessDisallowed { url }),
        Err(_) => Ok(None),
    }
}
