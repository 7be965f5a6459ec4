//! Rustdoc structure processor.
//!
//! Item pages carry the declaration in `pre.rust.item-decl`, the prose in
//! `div.docblock`, and examples in `div.example-wrap > pre.rust`. The
//! `<rustdoc-topbar>`, `<rustdoc-toolbar>`, and `nav.sidebar` chrome is
//! stripped before conversion.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};

use crate::config::DetectionConfig;
use crate::error::Result;
use crate::inventory::{RUSTDOC, fetch_root_page, join_source};
use crate::retrieval::CacheProxy;
use crate::types::{ContentDocument, ContentFeature, InventoryObject, StructureCapabilities};

use super::markdown::{MarkdownConverter, has_class};
use super::{
    ExtractionRules, StructureDetection, StructureProcessor, element_by_id, extract_documents,
};

/// Structure processor for rustdoc output.
pub struct RustdocStructure {
    capabilities: StructureCapabilities,
    detection: DetectionConfig,
    rules: RustdocRules,
}

impl RustdocStructure {
    /// Build the processor with detection tuning.
    #[must_use]
    pub fn new(detection: &DetectionConfig) -> Self {
        let mut supported = BTreeSet::new();
        supported.insert(RUSTDOC.to_string());
        let mut bias = BTreeMap::new();
        bias.insert(RUSTDOC.to_string(), 0.9);
        Self {
            capabilities: StructureCapabilities {
                supported_inventory_types: supported,
                content_extraction_features: [
                    ContentFeature::Signatures,
                    ContentFeature::Descriptions,
                    ContentFeature::CodeExamples,
                    ContentFeature::CrossReferences,
                ]
                .into_iter()
                .collect(),
                confidence_by_inventory_type: bias,
            },
            detection: detection.clone(),
            rules: RustdocRules::new(),
        }
    }
}

struct RustdocRules {
    containers: Vec<Selector>,
    item_decl: Selector,
    docblock: Selector,
}

impl RustdocRules {
    fn new() -> Self {
        let containers = ["section#main-content", "main", "section.content"]
            .iter()
            .filter_map(|s| Selector::parse(s).ok())
            .collect();
        #[allow(clippy::unwrap_used)] // literal selectors
        let item_decl = Selector::parse("pre.rust.item-decl").unwrap();
        #[allow(clippy::unwrap_used)]
        let docblock = Selector::parse("div.docblock").unwrap();
        Self {
            containers,
            item_decl,
            docblock,
        }
    }
}

impl ExtractionRules for RustdocRules {
    fn container_selectors(&self) -> &[Selector] {
        &self.containers
    }

    fn is_chrome(&self, el: &ElementRef<'_>) -> bool {
        let tag = el.value().name();
        tag.starts_with("rustdoc-")
            || tag == "nav"
            || tag == "button"
            || has_class(el, "sidebar")
            || has_class(el, "out-of-band")
            || has_class(el, "anchor")
    }

    fn code_language(&self, el: &ElementRef<'_>) -> Option<String> {
        has_class(el, "rust").then(|| "rust".to_string())
    }

    fn extract_object(
        &self,
        doc: &Html,
        anchor: Option<&str>,
        _name: &str,
    ) -> Option<(String, String)> {
        let skip = |el: &ElementRef<'_>| self.is_chrome(el);
        let lang = |el: &ElementRef<'_>| self.code_language(el);
        let converter = MarkdownConverter {
            skip: &skip,
            code_language: &lang,
        };

        // Anchored items (methods on a struct page) scope the search to the
        // anchored subtree; whole-page items use the page's declaration.
        if let Some(id) = anchor {
            let anchored = element_by_id(doc, id)?;
            let signature = anchored
                .select(&self.item_decl)
                .next()
                .map(|decl| collapse(&decl.text().collect::<String>()))
                .or_else(|| {
                    has_class(&anchored, "method")
                        .then(|| collapse(&anchored.text().collect::<String>()))
                })
                .unwrap_or_default();
            let description = anchored
                .select(&self.docblock)
                .next()
                .or_else(|| {
                    anchored
                        .next_siblings()
                        .filter_map(ElementRef::wrap)
                        .find(|el| has_class(el, "docblock"))
                })
                .map(|block| converter.convert(block))
                .unwrap_or_default();
            return (!signature.is_empty() || !description.is_empty())
                .then_some((signature, description));
        }

        let signature = doc
            .select(&self.item_decl)
            .next()
            .map(|decl| collapse(&decl.text().collect::<String>()))
            .unwrap_or_default();
        let description = doc
            .select(&self.docblock)
            .next()
            .map(|block| converter.convert(block))
            .unwrap_or_default();
        (!signature.is_empty() || !description.is_empty()).then_some((signature, description))
    }
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[async_trait]
impl StructureProcessor for RustdocStructure {
    fn name(&self) -> &str {
        "rustdoc"
    }

    fn capabilities(&self) -> &StructureCapabilities {
        &self.capabilities
    }

    async fn detect(
        &self,
        proxy: &CacheProxy,
        source: &str,
    ) -> Result<Option<StructureDetection>> {
        let mut signals = 0usize;
        if proxy
            .probe(&join_source(source, "all.html"))
            .await
            .unwrap_or(false)
        {
            signals += 1;
        }
        if let Some(page) = fetch_root_page(proxy, source).await? {
            if page.contains(r#"name="generator" content="rustdoc"#) {
                signals += 1;
            }
            if page.contains("class=\"rustdoc") {
                signals += 1;
            }
            if page.contains("nav class=\"sidebar\"") || page.contains("rustdoc-topbar") {
                signals += 1;
            }
        }
        if signals < 2 {
            return Ok(None);
        }

        let confidence = (self.detection.base_weight
            + self.detection.signal_weight * signals as f64)
            .min(1.0);
        Ok(Some(StructureDetection {
            processor: self.name().to_string(),
            source: source.to_string(),
            confidence,
            capabilities: self.capabilities.clone(),
            theme: None,
        }))
    }

    async fn extract_contents(
        &self,
        proxy: &CacheProxy,
        _source: &str,
        objects: &[InventoryObject],
    ) -> Result<Vec<ContentDocument>> {
        Ok(extract_documents(proxy, &self.rules, objects).await)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const ITEM_PAGE: &str = r#"<!DOCTYPE html>
<html><head><meta name="generator" content="rustdoc"></head>
<body class="rustdoc fn">
<rustdoc-topbar><h2>escape</h2></rustdoc-topbar>
<nav class="sidebar"><a href="index.html">regex</a></nav>
<section id="main-content" class="content">
<pre class="rust item-decl"><code>pub fn escape(pattern: &amp;str) -&gt; String</code></pre>
<div class="docblock">
<p>Escapes all regular expression meta characters in <code>pattern</code>.</p>
<div class="example-wrap"><pre class="rust rust-example-rendered"><code>let escaped = regex::escape("a*b");</code></pre></div>
</div>
</section>
</body></html>"#;

    #[test]
    fn test_extract_whole_page_item() {
        let doc = Html::parse_document(ITEM_PAGE);
        let rules = RustdocRules::new();
        let (signature, description) = rules.extract_object(&doc, None, "escape").unwrap();
        assert_eq!(signature, "pub fn escape(pattern: &str) -> String");
        assert!(description.contains("Escapes all regular expression meta characters"));
        assert!(description.contains("```rust"));
        assert!(description.contains(r#"regex::escape("a*b")"#));
    }

    #[test]
    fn test_chrome_covers_custom_elements() {
        let doc = Html::parse_document(ITEM_PAGE);
        let rules = RustdocRules::new();
        let topbar = doc
            .select(&Selector::parse("rustdoc-topbar").unwrap())
            .next()
            .unwrap();
        assert!(rules.is_chrome(&topbar));
        let nav = doc.select(&Selector::parse("nav").unwrap()).next().unwrap();
        assert!(rules.is_chrome(&nav));
    }

    #[tokio::test]
    async fn test_detect_from_local_fixture() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), ITEM_PAGE).unwrap();
        std::fs::write(
            dir.path().join("all.html"),
            crate::inventory::rustdoc::tests::ALL_HTML,
        )
        .unwrap();

        let proxy = CacheProxy::new(&crate::config::Config::default()).unwrap();
        let source = dir.path().to_string_lossy().to_string();
        let processor = RustdocStructure::new(&DetectionConfig::default());
        let detection = processor.detect(&proxy, &source).await.unwrap().unwrap();
        assert!(detection.confidence > 0.5);
        assert!(detection.capabilities.supports_inventory_type(RUSTDOC));
    }
}
