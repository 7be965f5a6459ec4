//! MkDocs / mkdocstrings structure processor.
//!
//! mkdocstrings renders API entries as `div.autodoc` blocks: the signature
//! in `div.autodoc-signature`, the prose in `div.autodoc-docstring`. Code
//! block language is carried on the element class itself as
//! `language-<lang>` (unlike Sphinx, where it rides on a wrapper).

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};

use crate::config::DetectionConfig;
use crate::error::Result;
use crate::inventory::{MKDOCS_SEARCH_INDEX, SPHINX_OBJECTS_INV, fetch_root_page, join_source};
use crate::retrieval::CacheProxy;
use crate::types::{ContentDocument, ContentFeature, InventoryObject, StructureCapabilities};

use super::markdown::{MarkdownConverter, element_class_suffix, has_class};
use super::{
    ExtractionRules, StructureDetection, StructureProcessor, element_by_id, extract_documents,
};

/// Structure processor for MkDocs-rendered sites.
pub struct MkDocsStructure {
    capabilities: StructureCapabilities,
    detection: DetectionConfig,
    rules: MkDocsRules,
}

impl MkDocsStructure {
    /// Build the processor with detection tuning.
    #[must_use]
    pub fn new(detection: &DetectionConfig) -> Self {
        let mut supported = BTreeSet::new();
        supported.insert(MKDOCS_SEARCH_INDEX.to_string());
        // mkdocstrings sites often detect with a Sphinx-format inventory;
        // the pages are still MkDocs and extract through these patterns.
        supported.insert(SPHINX_OBJECTS_INV.to_string());
        let mut bias = BTreeMap::new();
        bias.insert(MKDOCS_SEARCH_INDEX.to_string(), 0.9);
        bias.insert(SPHINX_OBJECTS_INV.to_string(), 0.4);
        Self {
            capabilities: StructureCapabilities {
                supported_inventory_types: supported,
                content_extraction_features: [
                    ContentFeature::Signatures,
                    ContentFeature::Descriptions,
                    ContentFeature::CodeExamples,
                    ContentFeature::Arguments,
                ]
                .into_iter()
                .collect(),
                confidence_by_inventory_type: bias,
            },
            detection: detection.clone(),
            rules: MkDocsRules::new(),
        }
    }
}

struct MkDocsRules {
    containers: Vec<Selector>,
    autodoc: Selector,
    signature: Selector,
    docstring: Selector,
}

impl MkDocsRules {
    fn new() -> Self {
        let containers = ["article.md-content__inner", r#"article[role="main"]"#, "main", "article"]
            .iter()
            .filter_map(|s| Selector::parse(s).ok())
            .collect();
        #[allow(clippy::unwrap_used)] // literal selectors
        let autodoc = Selector::parse("div.autodoc").unwrap();
        #[allow(clippy::unwrap_used)]
        let signature = Selector::parse("div.autodoc-signature").unwrap();
        #[allow(clippy::unwrap_used)]
        let docstring = Selector::parse("div.autodoc-docstring").unwrap();
        Self {
            containers,
            autodoc,
            signature,
            docstring,
        }
    }

    fn convert(&self, el: ElementRef<'_>) -> String {
        let skip = |el: &ElementRef<'_>| self.is_chrome(el);
        let lang = |el: &ElementRef<'_>| self.code_language(el);
        let converter = MarkdownConverter {
            skip: &skip,
            code_language: &lang,
        };
        converter.convert(el)
    }

    fn extract_autodoc(&self, block: ElementRef<'_>) -> Option<(String, String)> {
        let signature = block
            .select(&self.signature)
            .next()
            .map(|sig| {
                sig.text()
                    .collect::<String>()
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default();
        let description = block
            .select(&self.docstring)
            .next()
            .map(|doc| self.convert(doc))
            .unwrap_or_default();
        (!signature.is_empty() || !description.is_empty()).then_some((signature, description))
    }
}

impl ExtractionRules for MkDocsRules {
    fn container_selectors(&self) -> &[Selector] {
        &self.containers
    }

    fn is_chrome(&self, el: &ElementRef<'_>) -> bool {
        match el.value().name() {
            "nav" | "aside" | "footer" | "header" => true,
            "a" => has_class(el, "headerlink") || has_class(el, "md-nav__link"),
            _ => {
                has_class(el, "md-sidebar")
                    || has_class(el, "md-nav")
                    || has_class(el, "md-header")
                    || has_class(el, "toc")
            },
        }
    }

    fn code_language(&self, el: &ElementRef<'_>) -> Option<String> {
        // The language is on the element class chain: `language-<lang>`.
        element_class_suffix(el, "language-")
            .or_else(|| super::markdown::ancestor_class_suffix(el, "language-"))
    }

    fn extract_object(
        &self,
        doc: &Html,
        anchor: Option<&str>,
        name: &str,
    ) -> Option<(String, String)> {
        // Anchored entry: the id sits on the autodoc block itself or on a
        // heading directly before it.
        if let Some(anchored) = anchor.and_then(|id| element_by_id(doc, id)) {
            if has_class(&anchored, "autodoc") {
                return self.extract_autodoc(anchored);
            }
            if let Some(block) = anchored.select(&self.autodoc).next() {
                return self.extract_autodoc(block);
            }
            if let Some(block) = anchored
                .next_siblings()
                .filter_map(ElementRef::wrap)
                .find(|el| has_class(el, "autodoc"))
            {
                return self.extract_autodoc(block);
            }
            return None;
        }

        // No anchor: first autodoc block whose signature mentions the name.
        doc.select(&self.autodoc)
            .find(|block| {
                block
                    .select(&self.signature)
                    .next()
                    .is_some_and(|sig| sig.text().collect::<String>().contains(name))
            })
            .and_then(|block| self.extract_autodoc(block))
    }
}

#[async_trait]
impl StructureProcessor for MkDocsStructure {
    fn name(&self) -> &str {
        "mkdocs"
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
            .probe(&join_source(source, "search/search_index.json"))
            .await
            .unwrap_or(false)
        {
            signals += 1;
        }
        let mut theme = None;
        if let Some(page) = fetch_root_page(proxy, source).await? {
            if page.contains(r#"name="generator" content="mkdocs"#) {
                signals += 1;
            }
            if page.contains("autodoc") || page.contains("mkdocstrings") {
                signals += 1;
            }
            if page.contains("md-content") || page.contains("assets/stylesheets/main") {
                theme = Some("material".to_string());
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
            theme,
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
