//! Rustdoc inventory processor.
//!
//! Rustdoc publishes no machine-readable inventory file, but its `all.html`
//! lists every documented item grouped into sections by kind. Those section
//! headings map onto a normalized item-type vocabulary.

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use tracing::trace;

use crate::config::DetectionConfig;
use crate::error::{Error, Result};
use crate::retrieval::CacheProxy;
use crate::types::{InventoryCapabilities, InventoryObject, InventorySpecifics};

use super::{InventoryDetection, InventoryProcessor, RUSTDOC, join_source};

/// Inventory processor for rustdoc output.
pub struct RustdocInventory {
    capabilities: InventoryCapabilities,
    detection: DetectionConfig,
}

impl RustdocInventory {
    /// Build the processor with detection tuning.
    #[must_use]
    pub fn new(detection: &DetectionConfig) -> Self {
        Self {
            capabilities: InventoryCapabilities::with_filters(&["item_type"]),
            detection: detection.clone(),
        }
    }
}

/// Normalize a section heading (id or text) to the item-type vocabulary.
fn normalize_item_type(section: &str) -> Option<&'static str> {
    let key = section.trim().to_ascii_lowercase().replace([' ', '-'], "_");
    match key.as_str() {
        "structs" | "struct" => Some("struct"),
        "enums" | "enum" => Some("enum"),
        "traits" | "trait" => Some("trait"),
        "functions" | "function" | "fns" => Some("function"),
        "methods" | "method" => Some("method"),
        "macros" | "macro" | "attribute_macros" | "derive_macros" => Some("macro"),
        "mods" | "modules" | "module" => Some("module"),
        "constants" | "consts" | "constant" => Some("constant"),
        "type_aliases" | "types" | "type_alias" | "typedefs" => Some("type_alias"),
        _ => None,
    }
}

fn parse_all_items(html: &str, location_base: &str) -> Vec<InventoryObject> {
    let document = Html::parse_document(html);
    #[allow(clippy::unwrap_used)] // literal selectors
    let lists = Selector::parse("ul.all-items").unwrap();
    #[allow(clippy::unwrap_used)]
    let links = Selector::parse("li a[href]").unwrap();

    let mut objects = Vec::new();
    for list in document.select(&lists) {
        let Some(item_type) = section_kind(list) else {
            trace!("all-items list without a recognized section heading");
            continue;
        };
        for link in list.select(&links) {
            let name: String = link.text().collect::<String>().trim().to_string();
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            if name.is_empty() || href.is_empty() {
                continue;
            }
            objects.push(InventoryObject {
                name,
                uri: href.to_string(),
                inventory_type: RUSTDOC.to_string(),
                location_base: location_base.to_string(),
                display_name: None,
                specifics: InventorySpecifics::Rustdoc {
                    item_type: item_type.to_string(),
                },
            });
        }
    }
    objects
}

/// Item kind of an `all-items` list, read from the nearest preceding heading.
fn section_kind(list: ElementRef<'_>) -> Option<&'static str> {
    let heading = list.prev_siblings().filter_map(ElementRef::wrap).find(|el| {
        matches!(el.value().name(), "h2" | "h3" | "h4")
    })?;
    if let Some(kind) = heading.value().attr("id").and_then(normalize_item_type) {
        return Some(kind);
    }
    let text: String = heading.text().collect();
    normalize_item_type(&text)
}

#[async_trait]
impl InventoryProcessor for RustdocInventory {
    fn name(&self) -> &str {
        "rustdoc"
    }

    fn capabilities(&self) -> &InventoryCapabilities {
        &self.capabilities
    }

    async fn detect(
        &self,
        proxy: &CacheProxy,
        source: &str,
    ) -> Result<Option<InventoryDetection>> {
        let all_url = join_source(source, "all.html");
        if !proxy.probe(&all_url).await? {
            return Ok(None);
        }
        let page = match proxy.retrieve_text(&all_url).await {
            Ok(page) => page,
            Err(Error::AccessDisallowed { url }) => {
                return Err(Error::AccessDisallowed { url });
            },
            Err(_) => return Ok(None),
        };

        let mut signals = 0usize;
        if page.contains("content=\"rustdoc\"") || page.contains(r#"name="generator" content="rustdoc"#) {
            signals += 1;
        }
        if page.contains("class=\"rustdoc") {
            signals += 1;
        }
        if page.contains("all-items") {
            signals += 1;
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
            RUSTDOC,
            all_url,
        )))
    }

    async fn load_inventory(
        &self,
        proxy: &CacheProxy,
        detection: &InventoryDetection,
    ) -> Result<Vec<InventoryObject>> {
        let page = proxy.retrieve_text(&detection.inventory_url).await?;
        let objects = parse_all_items(&page, &detection.location_base);
        if objects.is_empty() {
            return Err(Error::InventoryMalformed(format!(
                "no items parsed from '{}'",
                detection.inventory_url
            )));
        }
        Ok(objects)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;

    /// A minimal rustdoc `all.html` in the modern layout.
    pub(crate) const ALL_HTML: &str = r#"<!DOCTYPE html>
<html><head><meta name="generator" content="rustdoc"></head>
<body class="rustdoc mod">
<nav class="sidebar"><a href="index.html">regex</a></nav>
<section id="main-content" class="content">
<h1>List of all items</h1>
<h3 id="structs">Structs</h3>
<ul class="all-items">
<li><a href="struct.Regex.html">Regex</a></li>
<li><a href="bytes/struct.Regex.html">bytes::Regex</a></li>
</ul>
<h3 id="enums">Enums</h3>
<ul class="all-items"><li><a href="enum.Error.html">Error</a></li></ul>
<h3 id="functions">Functions</h3>
<ul class="all-items"><li><a href="fn.escape.html">escape</a></li></ul>
<h3 id="types">Type Aliases</h3>
<ul class="all-items"><li><a href="type.CaptureNames.html">CaptureNames</a></li></ul>
</section>
</body></html>"#;

    #[test]
    fn test_parse_all_items_sections() {
        let objects = parse_all_items(ALL_HTML, "https://docs.example.com/regex/");
        assert_eq!(objects.len(), 5);

        let regex = &objects[0];
        assert_eq!(regex.name, "Regex");
        assert_eq!(regex.uri, "struct.Regex.html");
        assert!(regex.specifics.matches("item_type", "struct"));

        assert!(objects[1].name.contains("bytes::Regex"));
        assert!(objects[2].specifics.matches("item_type", "enum"));
        assert!(objects[3].specifics.matches("item_type", "function"));
        assert!(objects[4].specifics.matches("item_type", "type_alias"));
    }

    #[test]
    fn test_normalize_item_type_vocabulary() {
        assert_eq!(normalize_item_type("structs"), Some("struct"));
        assert_eq!(normalize_item_type("Type Aliases"), Some("type_alias"));
        assert_eq!(normalize_item_type("mods"), Some("module"));
        assert_eq!(normalize_item_type("constants"), Some("constant"));
        assert_eq!(normalize_item_type("keywords"), None);
    }

    #[tokio::test]
    async fn test_detect_and_load_local_fixture() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("all.html"), ALL_HTML).unwrap();

        let proxy = CacheProxy::new(&crate::config::Config::default()).unwrap();
        let source = dir.path().to_string_lossy().to_string();
        let processor = RustdocInventory::new(&DetectionConfig::default());

        let detection = processor.detect(&proxy, &source).await.unwrap().unwrap();
        assert_eq!(detection.inventory_type, RUSTDOC);
        assert!(detection.confidence > 0.5);

        let objects = processor.load_inventory(&proxy, &detection).await.unwrap();
        assert_eq!(objects.len(), 5);
    }

    #[tokio::test]
    async fn test_load_empty_listing_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("all.html"), "<html><body></body></html>").unwrap();

        let proxy = CacheProxy::new(&crate::config::Config::default()).unwrap();
        let source = dir.path().to_string_lossy().to_string();
        let processor = RustdocInventory::new(&DetectionConfig::default());
        let detection = InventoryDetection::new(
            "rustdoc",
            &source,
            0.8,
            processor.capabilities().clone(),
            RUSTDOC,
            join_source(&source, "all.html"),
        );
        let result = processor.load_inventory(&proxy, &detection).await;
        assert!(matches!(result, Err(Error::InventoryMalformed(_))));
    }
}
