//! MkDocs / mkdocstrings inventory processor.
//!
//! mkdocstrings-enabled sites publish a Sphinx-format `objects.inv`; plain
//! MkDocs sites only carry the `search/search_index.json` the Material theme
//! ships. Detection requires the search index (the MkDocs marker) and
//! prefers the richer `objects.inv` for loading when both exist, attributed
//! under the MkDocs inventory type so structure detection routes the MkDocs
//! extraction patterns.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::config::DetectionConfig;
use crate::error::{Error, Result};
use crate::retrieval::CacheProxy;
use crate::types::{InventoryCapabilities, InventoryObject, InventorySpecifics};

use super::sphinx::{decompress_objects_inv, parse_objects_inv_payload};
use super::{InventoryDetection, InventoryProcessor, MKDOCS_SEARCH_INDEX, base_of, join_source};

const SEARCH_INDEX_PATH: &str = "search/search_index.json";

/// Inventory processor for MkDocs sites.
pub struct MkDocsInventory {
    capabilities: InventoryCapabilities,
    detection: DetectionConfig,
}

impl MkDocsInventory {
    /// Build the processor with detection tuning.
    #[must_use]
    pub fn new(detection: &DetectionConfig) -> Self {
        Self {
            capabilities: InventoryCapabilities::with_filters(&["role"]),
            detection: detection.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchIndex {
    #[serde(default)]
    docs: Vec<SearchDoc>,
}

#[derive(Debug, Deserialize)]
struct SearchDoc {
    #[serde(default)]
    location: String,
    #[serde(default)]
    title: String,
}

fn parse_search_index(raw: &str, location_base: &str) -> Result<Vec<InventoryObject>> {
    let index: SearchIndex = serde_json::from_str(raw)
        .map_err(|e| Error::InventoryMalformed(format!("search_index.json: {e}")))?;
    let mut objects = Vec::new();
    for doc in index.docs {
        if doc.location.is_empty() && doc.title.is_empty() {
            continue;
        }
        let (name, role) = match doc.location.split_once('#') {
            Some((_, fragment)) if !fragment.is_empty() => (fragment.to_string(), "section"),
            _ => (doc.title.clone(), "page"),
        };
        if name.is_empty() {
            continue;
        }
        objects.push(InventoryObject {
            display_name: (doc.title != name && !doc.title.is_empty()).then(|| doc.title.clone()),
            name,
            uri: doc.location,
            inventory_type: MKDOCS_SEARCH_INDEX.to_string(),
            location_base: location_base.to_string(),
            specifics: InventorySpecifics::MkDocs {
                role: role.to_string(),
            },
        });
    }
    Ok(objects)
}

#[async_trait]
impl InventoryProcessor for MkDocsInventory {
    fn name(&self) -> &str {
        "mkdocs"
    }

    fn capabilities(&self) -> &InventoryCapabilities {
        &self.capabilities
    }

    async fn detect(
        &self,
        proxy: &CacheProxy,
        source: &str,
    ) -> Result<Option<InventoryDetection>> {
        let search_index_url = join_source(source, SEARCH_INDEX_PATH);
        if !proxy.probe(&search_index_url).await? {
            return Ok(None);
        }

        // An mkdocstrings objects.inv upgrades both the load path and the
        // confidence over plain-search-index sites.
        let objects_inv_url = join_source(source, "objects.inv");
        let has_objects_inv = proxy.probe(&objects_inv_url).await.unwrap_or(false);
        let signals = if has_objects_inv { 2.5 } else { 1.0 };
        let confidence =
            (self.detection.base_weight + self.detection.signal_weight * signals).min(1.0);

        let inventory_url = if has_objects_inv {
            debug!(source, "mkdocstrings objects.inv found; routing Sphinx format");
            objects_inv_url
        } else {
            search_index_url
        };

        let mut capabilities = self.capabilities.clone();
        if has_objects_inv {
            // Sphinx-format attributes become filterable.
            capabilities =
                InventoryCapabilities::with_filters(&["domain", "role", "priority"]);
        }

        Ok(Some(InventoryDetection::new(
            self.name(),
            source,
            confidence,
            capabilities,
            MKDOCS_SEARCH_INDEX,
            inventory_url,
        )))
    }

    async fn load_inventory(
        &self,
        proxy: &CacheProxy,
        detection: &InventoryDetection,
    ) -> Result<Vec<InventoryObject>> {
        if detection.inventory_url.ends_with("objects.inv") {
            let payload = proxy.retrieve(&detection.inventory_url).await?;
            let decompressed = decompress_objects_inv(payload.bytes())?;
            return Ok(parse_objects_inv_payload(
                &decompressed,
                &base_of(&detection.source),
                MKDOCS_SEARCH_INDEX,
            ));
        }
        let raw = proxy.retrieve_text(&detection.inventory_url).await?;
        parse_search_index(&raw, &base_of(&detection.source))
    }
}
