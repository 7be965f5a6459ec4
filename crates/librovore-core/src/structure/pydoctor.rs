//! Pydoctor structure processor.
//!
//! Pydoctor pages keep docstrings in `div.docstring`; function and method
//! headers render in `div.functionHeader`. The Bootstrap navbar and the
//! `sideBar` split are stripped before conversion.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};

use crate::config::DetectionConfig;
use crate::error::Result;
use crate::inventory::{PYDOCTOR_SEARCH_INDEX, fetch_root_page, join_source};
use crate::retrieval::CacheProxy;
use crate::types::{ContentDocument, ContentFeature, InventoryObject, StructureCapabilities};

use super::markdown::{MarkdownConverter, has_class};
use super::{
    ExtractionRules, StructureDetection, StructureProcessor, element_by_id, extract_documents,
};

/// Structure processor for pydoctor output.
pub struct PydoctorStructure {
    capabilities: StructureCapabilities,
    detection: DetectionConfig,
    rules: PydoctorRules,
}

impl PydoctorStructure {
    /// Build the processor with detection tuning.
    #[must_use]
    pub fn new(detection: &DetectionConfig) -> Self {
        let mut supported = BTreeSet::new();
        supported.insert(PYDOCTOR_SEARCH_INDEX.to_string());
        let mut bias = BTreeMap::new();
        bias.insert(PYDOCTOR_SEARCH_INDEX.to_string(), 0.9);
        Self {
            capabilities: StructureCapabilities {
                supported_inventory_types: supported,
                content_extraction_features: [
                    ContentFeature::Signatures,
                    ContentFeature::Descriptions,
                    ContentFeature::Attributes,
                ]
                .into_iter()
                .collect(),
                confidence_by_inventory_type: bias,
            },
            detection: detection.clone(),
            rules: PydoctorRules::new(),
        }
    }
}

struct PydoctorRules {
    containers: Vec<Selector>,
    docstring: Selector,
    function_header: Selector,
}

impl PydoctorRules {
    fn new() -> Self {
        let containers = ["div#main", "div.container", "main", "body"]
            .iter()
            .filter_map(|s| Selector::parse(s).ok())
            .collect();
        #[allow(clippy::unwrap_used)] // literal selectors
        let docstring = Selector::parse("div.docstring").unwrap();
        #[allow(clippy::unwrap_used)]
        let function_header = Selector::parse("div.functionHeader").unwrap();
        Self {
            containers,
            docstring,
            function_header,
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

    fn extract_scope(&self, scope: ElementRef<'_>) -> Option<(String, String)> {
        let signature = scope
            .select(&self.function_header)
            .next()
            .map(|header| {
                header
                    .text()
                    .collect::<String>()
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default();
        let description = scope
            .select(&self.docstring)
            .next()
            .map(|doc| self.convert(doc))
            .unwrap_or_default();
        (!signature.is_empty() || !description.is_empty()).then_some((signature, description))
    }
}

impl ExtractionRules for PydoctorRules {
    fn container_selectors(&self) -> &[Selector] {
        &self.containers
    }

    fn is_chrome(&self, el: &ElementRef<'_>) -> bool {
        match el.value().name() {
            "nav" | "footer" | "header" => true,
            _ => {
                has_class(el, "navbar")
                    || has_class(el, "sideBar")
                    || has_class(el, "navlinks")
                    || has_class(el, "breadcrumbs")
            },
        }
    }

    fn code_language(&self, el: &ElementRef<'_>) -> Option<String> {
        has_class(el, "python").then(|| "python".to_string())
    }

    fn extract_object(
        &self,
        doc: &Html,
        anchor: Option<&str>,
        _name: &str,
    ) -> Option<(String, String)> {
        // Member pages anchor each attribute/method; object pages carry one
        // docstring at the top level.
        if let Some(id) = anchor {
            let anchored = element_by_id(doc, id)?;
            return self.extract_scope(anchored).or_else(|| {
                anchored
                    .next_siblings()
                    .filter_map(ElementRef::wrap)
                    .find_map(|el| self.extract_scope(el))
            });
        }
        self.extract_scope(doc.root_element())
    }
}

#[async_trait]
impl StructureProcessor for PydoctorStructure {
    fn name(&self) -> &str {
        "pydoctor"
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
            .probe(&join_source(source, "apidocs.css"))
            .await
            .unwrap_or(false)
        {
            signals += 1;
        }
        if let Some(page) = fetch_root_page(proxy, source).await? {
            if page.contains(r#"content="pydoctor"#) || page.contains("pydoctor") {
                signals += 1;
            }
            if page.contains("docstring") {
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
