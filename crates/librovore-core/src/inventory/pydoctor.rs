//! Pydoctor inventory processor.
//!
//! Pydoctor sites ship `apidocs.css`, a `generator` meta tag, and a Lunr.js
//! `searchindex.json` whose field vectors are keyed `field/qualified.name`.
//! The qualified names double as page addresses: pydoctor renders one page
//! per object at `<qname>.html`.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::DetectionConfig;
use crate::error::{Error, Result};
use crate::retrieval::CacheProxy;
use crate::types::{InventoryCapabilities, InventoryObject, InventorySpecifics};

use super::{
    InventoryDetection, InventoryProcessor, PYDOCTOR_SEARCH_INDEX, fetch_root_page, join_source,
};

/// Inventory processor for pydoctor sites.
pub struct PydoctorInventory {
    capabilities: InventoryCapabilities,
    detection: DetectionConfig,
}

impl PydoctorInventory {
    /// Build the processor with detection tuning.
    #[must_use]
    pub fn new(detection: &DetectionConfig) -> Self {
        Self {
            capabilities: InventoryCapabilities::with_filters(&["qname"]),
            detection: detection.clone(),
        }
    }
}

/// Extract qualified names from a serialized Lunr index.
///
/// Field vectors are `[["field/ref", [...]], ...]`; the ref after the first
/// slash is the qualified name. Some builds nest the index under an `index`
/// key.
fn parse_lunr_refs(raw: &str) -> Result<BTreeSet<String>> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| Error::InventoryMalformed(format!("searchindex.json: {e}")))?;
    let index = value.get("index").unwrap_or(&value);
    let Some(vectors) = index.get("fieldVectors").and_then(Value::as_array) else {
        return Err(Error::InventoryMalformed(
            "searchindex.json has no fieldVectors".to_string(),
        ));
    };

    let mut refs = BTreeSet::new();
    for entry in vectors {
        let Some(key) = entry.get(0).and_then(Value::as_str) else {
            continue;
        };
        if let Some((_, qname)) = key.split_once('/') {
            if !qname.is_empty() {
                refs.insert(qname.to_string());
            }
        }
    }
    Ok(refs)
}

#[async_trait]
impl InventoryProcessor for PydoctorInventory {
    fn name(&self) -> &str {
        "pydoctor"
    }

    fn capabilities(&self) -> &InventoryCapabilities {
        &self.capabilities
    }

    async fn detect(
        &self,
        proxy: &CacheProxy,
        source: &str,
    ) -> Result<Option<InventoryDetection>> {
        let index_url = join_source(source, "searchindex.json");
        if !proxy.probe(&index_url).await? {
            return Ok(None);
        }

        let mut signals = 0usize;
        if proxy
            .probe(&join_source(source, "apidocs.css"))
            .await
            .unwrap_or(false)
        {
            signals += 1;
        }
        if let Some(page) = fetch_root_page(proxy, source).await? {
            if page.contains("pydoctor") {
                signals += 1;
            }
        }
        if signals == 0 {
            return Ok(None);
        }

        let confidence = (self.detection.base_weight
            + self.detection.signal_weight * signals as f64)
            .min(1.0);
        Ok(Some(InventoryDetection::new(
            self.name(),
            source,
            confidence,
            self.capabilities.clone(),
            PYDOCTOR_SEARCH_INDEX,
            index_url,
        )))
    }

    async fn load_inventory(
        &self,
        proxy: &CacheProxy,
        detection: &InventoryDetection,
    ) -> Result<Vec<InventoryObject>> {
        let raw = proxy.retrieve_text(&detection.inventory_url).await?;
        let refs = parse_lunr_refs(&raw)?;
        Ok(refs
            .into_iter()
            .map(|qname| InventoryObject {
                uri: format!("{qname}.html"),
                inventory_type: PYDOCTOR_SEARCH_INDEX.to_string(),
                location_base: detection.location_base.clone(),
                display_name: None,
                specifics: InventorySpecifics::Pydoctor {
                    qname: qname.clone(),
                },
                name: qname,
            })
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SEARCH_INDEX: &str = r#"{
        "version": "2.3.9",
        "fields": ["name", "qname"],
        "fieldVectors": [
            ["qname/twisted.internet.defer.Deferred", [0, 1.2]],
            ["qname/twisted.internet.defer.Deferred.addCallback", [1, 0.8]],
            ["name/twisted.internet.defer.Deferred", [0, 2.0]]
        ],
        "invertedIndex": [],
        "pipeline": []
    }"#;

    #[test]
    fn test_parse_lunr_refs_dedupes_across_fields() {
        let refs = parse_lunr_refs(SEARCH_INDEX).unwrap();
        assert_eq!(refs.len(), 2);
        assert!(refs.contains("twisted.internet.defer.Deferred"));
        assert!(refs.contains("twisted.internet.defer.Deferred.addCallback"));
    }

    #[test]
    fn test_parse_lunr_refs_nested_index_key() {
        let nested = format!(r#"{{"index": {SEARCH_INDEX}}}"#);
        let refs = parse_lunr_refs(&nested).unwrap();
        assert_eq!(refs.len(), 2);
    }

    #[test]
    fn test_parse_lunr_refs_without_vectors_is_malformed() {
        assert!(matches!(
            parse_lunr_refs(r#"{"version": "2.3.9"}"#),
            Err(Error::InventoryMalformed(_))
        ));
    }

    #[tokio::test]
    async fn test_detect_and_load_local_fixture() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("searchindex.json"), SEARCH_INDEX).unwrap();
        std::fs::write(dir.path().join("apidocs.css"), "/* pydoctor */").unwrap();
        std::fs::write(
            dir.path().join("index.html"),
            r#"<meta name="generator" content="pydoctor 23.9.1">"#,
        )
        .unwrap();

        let proxy = CacheProxy::new(&crate::config::Config::default()).unwrap();
        let source = dir.path().to_string_lossy().to_string();
        let processor = PydoctorInventory::new(&DetectionConfig::default());

        let detection = processor.detect(&proxy, &source).await.unwrap().unwrap();
        assert_eq!(detection.inventory_type, PYDOCTOR_SEARCH_INDEX);

        let objects = processor.load_inventory(&proxy, &detection).await.unwrap();
        assert_eq!(objects.len(), 2);
        let deferred = &objects[0];
        assert_eq!(deferred.name, "twisted.internet.defer.Deferred");
        assert_eq!(deferred.uri, "twisted.internet.defer.Deferred.html");
        assert!(
            deferred
                .specifics
                .matches("qname", "twisted.internet.defer.Deferred")
        );
    }

    #[tokio::test]
    async fn test_detect_requires_corroborating_signal() {
        let dir = tempfile::tempdir().unwrap();
        // A bare searchindex.json could be any generator's.
        std::fs::write(dir.path().join("searchindex.json"), SEARCH_INDEX).unwrap();
        let proxy = CacheProxy::new(&crate::config::Config::default()).unwrap();
        let source = dir.path().to_string_lossy().to_string();
        let detection = PydoctorInventory::new(&DetectionConfig::default())
            .detect(&proxy, &source)
            .await
            .unwrap();
        assert!(detection.is_none());
    }
}
