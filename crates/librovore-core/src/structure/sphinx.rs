//! Sphinx structure processor.
//!
//! Empirical patterns stable across Sphinx themes: API declarations live in
//! `dt.sig.sig-object.<domain>` with the description in the sibling `dd`;
//! code blocks are `div.highlight` wrapped by `div.highlight-<lang>` with
//! the language on the wrapper class. Theme detection distinguishes
//! Read-the-Docs, PyData, and classic layouts for the container preference
//! order.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};

use crate::config::DetectionConfig;
use crate::error::Result;
use crate::inventory::{SPHINX_OBJECTS_INV, fetch_root_page};
use crate::retrieval::CacheProxy;
use crate::types::{ContentDocument, ContentFeature, InventoryObject, StructureCapabilities};

use super::markdown::{MarkdownConverter, ancestor_class_suffix, has_class};
use super::{
    ExtractionRules, StructureDetection, StructureProcessor, element_by_id, extract_documents,
};

/// Structure processor for Sphinx-rendered sites.
pub struct SphinxStructure {
    capabilities: StructureCapabilities,
    detection: DetectionConfig,
    rules: SphinxRules,
}

impl SphinxStructure {
    /// Build the processor with detection tuning.
    #[must_use]
    pub fn new(detection: &DetectionConfig) -> Self {
        let mut supported = BTreeSet::new();
        supported.insert(SPHINX_OBJECTS_INV.to_string());
        let mut bias = BTreeMap::new();
        bias.insert(SPHINX_OBJECTS_INV.to_string(), 0.9);
        Self {
            capabilities: StructureCapabilities {
                supported_inventory_types: supported,
                content_extraction_features: [
                    ContentFeature::Signatures,
                    ContentFeature::Descriptions,
                    ContentFeature::CodeExamples,
                    ContentFeature::CrossReferences,
                    ContentFeature::Arguments,
                    ContentFeature::Returns,
                ]
                .into_iter()
                .collect(),
                confidence_by_inventory_type: bias,
            },
            detection: detection.clone(),
            rules: SphinxRules::new(),
        }
    }
}

struct SphinxRules {
    containers: Vec<Selector>,
}

impl SphinxRules {
    fn new() -> Self {
        // Main content container preference order; first match wins.
        let selectors = [
            r#"article[role="main"]"#,
            "section.wy-nav-content-wrap",
            "main.bd-main",
            r#"div.body[role="main"]"#,
            "main",
            "div.body",
            "section",
        ];
        Self {
            containers: selectors
                .iter()
                .filter_map(|s| Selector::parse(s).ok())
                .collect(),
        }
    }
}

/// Signature text of a `dt`, with permalink anchors and markers stripped.
fn signature_text(dt: ElementRef<'_>) -> String {
    let mut out = String::new();
    collect_signature_text(dt, &mut out);
    out.split_whitespace().collect::<Vec<_>>().join(" ")
        .trim_end_matches(['¶', '#', ' '])
        .to_string()
}

fn collect_signature_text(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        match child.value() {
            scraper::Node::Text(text) => out.push_str(text),
            scraper::Node::Element(element) => {
                if element.name() == "a" {
                    // Permalink ("headerlink") anchors are chrome.
                    if let Some(child_el) = ElementRef::wrap(child) {
                        if has_class(&child_el, "headerlink") {
                            continue;
                        }
                        collect_signature_text(child_el, out);
                    }
                } else if let Some(child_el) = ElementRef::wrap(child) {
                    collect_signature_text(child_el, out);
                }
            },
            _ => {},
        }
    }
}

impl ExtractionRules for SphinxRules {
    fn container_selectors(&self) -> &[Selector] {
        &self.containers
    }

    fn is_chrome(&self, el: &ElementRef<'_>) -> bool {
        match el.value().name() {
            "nav" | "aside" | "footer" | "header" => true,
            "a" => has_class(el, "headerlink"),
            _ => {
                has_class(el, "sidebar")
                    || has_class(el, "sphinxsidebar")
                    || has_class(el, "toc")
                    || has_class(el, "toctree-wrapper")
                    || has_class(el, "related")
                    || has_class(el, "wy-nav-side")
                    || has_class(el, "bd-sidebar")
            },
        }
    }

    fn code_language(&self, el: &ElementRef<'_>) -> Option<String> {
        // The language rides on the wrapper around div.highlight, not on the
        // pre itself: div.highlight-python > div.highlight > pre.
        ancestor_class_suffix(el, "highlight-")
            .filter(|lang| lang != "default")
    }

    fn extract_object(
        &self,
        doc: &Html,
        anchor: Option<&str>,
        _name: &str,
    ) -> Option<(String, String)> {
        let dt = element_by_id(doc, anchor?)?;
        if dt.value().name() != "dt" || !has_class(&dt, "sig") {
            return None;
        }
        let signature = signature_text(dt);

        let description = dt
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().name() == "dd")
            .map(|dd| {
                let skip = |el: &ElementRef<'_>| self.is_chrome(el);
                let lang = |el: &ElementRef<'_>| self.code_language(el);
                let converter = MarkdownConverter {
                    skip: &skip,
                    code_language: &lang,
                };
                converter.convert(dd)
            })
            .unwrap_or_default();

        (!signature.is_empty() || !description.is_empty()).then_some((signature, description))
    }
}

fn detect_theme(page: &str) -> Option<&'static str> {
    if page.contains("wy-nav-content") || page.contains("wy-nav-side") {
        Some("readthedocs")
    } else if page.contains("bd-main") || page.contains("pydata") {
        Some("pydata")
    } else if page.contains("furo") {
        Some("furo")
    } else if page.contains("alabaster") {
        Some("alabaster")
    } else {
        None
    }
}

#[async_trait]
impl StructureProcessor for SphinxStructure {
    fn name(&self) -> &str {
        "sphinx"
    }

    fn capabilities(&self) -> &StructureCapabilities {
        &self.capabilities
    }

    async fn detect(
        &self,
        proxy: &CacheProxy,
        source: &str,
    ) -> Result<Option<StructureDetection>> {
        let Some(page) = fetch_root_page(proxy, source).await? else {
            return Ok(None);
        };

        let mut signals = 0usize;
        if page.contains(r#"name="generator" content="sphinx"#)
            || page.contains(r#"name="generator" content="Sphinx"#)
        {
            signals += 1;
        }
        if page.contains("_static/") {
            signals += 1;
        }
        if page.contains("sig sig-object") || page.contains(r#"div.body"#)
            || page.contains(r#"role="main""#)
        {
            signals += 1;
        }
        let theme = detect_theme(&page);
        if theme.is_some() {
            signals += 1;
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
            theme: theme.map(ToString::to_string),
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
