//! Structure processors: fetch rendered pages and extract per-object content.
//!
//! Each processor recognizes one documentation generator's HTML (theme and
//! generator markers) and supplies [`ExtractionRules`] to a shared driver
//! that fetches pages concurrently, locates anchored fragments, applies the
//! generator's empirical selector patterns, and converts prose to Markdown.
//! When pattern matching yields nothing for an object, a semantic fallback
//! looks for the anchor id or a matching heading and returns the
//! surrounding section; failing that, the document is returned empty and
//! counted against extraction quality downstream.

pub mod markdown;
pub mod mkdocs;
pub mod pydoctor;
pub mod rustdoc;
pub mod sphinx;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Node};
use tracing::{debug, warn};
use url::Url;

use crate::error::Result;
use crate::retrieval::CacheProxy;
use crate::types::{ContentDocument, InventoryObject, StructureCapabilities};
use markdown::MarkdownConverter;

/// Outcome of one structure processor recognizing a source.
#[derive(Debug, Clone)]
pub struct StructureDetection {
    /// Name of the processor that produced this detection.
    pub processor: String,
    /// Normalized source the detection applies to.
    pub source: String,
    /// Confidence in `[0, 1]`; below the configured floor it is rejected.
    pub confidence: f64,
    /// Capabilities of the producing processor.
    pub capabilities: StructureCapabilities,
    /// Detected theme, when the processor distinguishes themes.
    pub theme: Option<String>,
}

/// A processor that can fetch and parse one generator's rendered HTML.
#[async_trait]
pub trait StructureProcessor: Send + Sync {
    /// Registration name, unique within the structure genus.
    fn name(&self) -> &str;

    /// Statically declared capabilities.
    fn capabilities(&self) -> &StructureCapabilities;

    /// Probe `source` for this generator's theme and markup markers.
    async fn detect(
        &self,
        proxy: &CacheProxy,
        source: &str,
    ) -> Result<Option<StructureDetection>>;

    /// Fetch pages and extract a document per inventory object.
    ///
    /// Object fetches run concurrently; the output preserves input order.
    /// Per-object retrieval failures yield empty documents rather than
    /// failing the batch.
    async fn extract_contents(
        &self,
        proxy: &CacheProxy,
        source: &str,
        objects: &[InventoryObject],
    ) -> Result<Vec<ContentDocument>>;
}

/// Generator-specific hooks consumed by [`extract_documents`].
pub trait ExtractionRules: Send + Sync {
    /// Main content container selectors in preference order; first match
    /// wins. Used by the semantic fallback to bound section extraction.
    fn container_selectors(&self) -> &[scraper::Selector];

    /// Navigation and chrome to strip before Markdown conversion.
    fn is_chrome(&self, el: &ElementRef<'_>) -> bool;

    /// Fence language for a `<pre>` element.
    fn code_language(&self, el: &ElementRef<'_>) -> Option<String>;

    /// Apply the generator's signature/description patterns for one object.
    ///
    /// Returns `(signature, description_markdown)`; `None` triggers the
    /// semantic fallback.
    fn extract_object(
        &self,
        doc: &Html,
        anchor: Option<&str>,
        name: &str,
    ) -> Option<(String, String)>;
}

/// Shared extraction driver: fetch, locate, extract, convert.
pub(crate) async fn extract_documents(
    proxy: &CacheProxy,
    rules: &dyn ExtractionRules,
    objects: &[InventoryObject],
) -> Vec<ContentDocument> {
    let tasks = objects.iter().map(|object| async move {
        let expanded = object.expanded_uri();
        let (page_rel, anchor) = match expanded.split_once('#') {
            Some((page, frag)) => (page.to_string(), Some(frag.to_string())),
            None => (expanded.clone(), None),
        };
        let page_url = resolve_page_url(&object.location_base, &page_rel);
        let documentation_url = match &anchor {
            Some(frag) => format!("{page_url}#{frag}"),
            None => page_url.clone(),
        };

        let mut document = ContentDocument {
            name: object.name.clone(),
            uri: expanded,
            inventory_type: object.inventory_type.clone(),
            documentation_url,
            signature: String::new(),
            description: String::new(),
            content_snippet: None,
            relevance_score: 0.0,
        };

        match proxy.retrieve_text(&page_url).await {
            Ok(html) => {
                let doc = Html::parse_document(&html);
                let extracted = rules
                    .extract_object(&doc, anchor.as_deref(), &object.name)
                    .or_else(|| fallback_extract(&doc, rules, anchor.as_deref(), &object.name));
                if let Some((signature, description)) = extracted {
                    document.signature = signature;
                    document.description = description;
                } else {
                    debug!(name = object.name, url = page_url, "no content located");
                }
            },
            Err(e) => {
                // A single unreachable page never fails the batch.
                warn!(name = object.name, url = page_url, error = %e, "page fetch failed");
            },
        }
        document
    });
    futures::future::join_all(tasks).await
}

/// Absolute page URL for an object URI relative to its location base.
pub(crate) fn resolve_page_url(location_base: &str, rel: &str) -> String {
    if location_base.contains("://") {
        if let Ok(base) = Url::parse(location_base) {
            if let Ok(joined) = base.join(rel) {
                return joined.to_string();
            }
        }
    }
    format!("{}{rel}", super::inventory::base_of(location_base))
}

/// Find the element carrying the given id, anywhere in the document.
///
/// Manual traversal instead of a synthesized attribute selector: inventory
/// anchors routinely contain characters a CSS parser rejects.
pub(crate) fn element_by_id<'a>(doc: &'a Html, id: &str) -> Option<ElementRef<'a>> {
    doc.tree
        .nodes()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().attr("id") == Some(id))
}

/// Semantic fallback: anchored element or matching heading, with the
/// surrounding section converted to Markdown.
fn fallback_extract(
    doc: &Html,
    rules: &dyn ExtractionRules,
    anchor: Option<&str>,
    name: &str,
) -> Option<(String, String)> {
    let skip = |el: &ElementRef<'_>| rules.is_chrome(el);
    let lang = |el: &ElementRef<'_>| rules.code_language(el);
    let converter = MarkdownConverter {
        skip: &skip,
        code_language: &lang,
    };

    let element = anchor.and_then(|id| element_by_id(doc, id)).or_else(|| {
        // Nearest heading whose text matches the object name.
        container_of(doc, rules)
            .unwrap_or_else(|| doc.root_element())
            .descendants()
            .filter_map(ElementRef::wrap)
            .find(|el| {
                matches!(el.value().name(), "h1" | "h2" | "h3" | "h4" | "h5" | "h6")
                    && el.text().collect::<String>().contains(name)
            })
    })?;

    let markdown = convert_section(element, &converter);
    (!markdown.trim().is_empty()).then(|| (String::new(), markdown))
}

/// First matching main-content container, in preference order.
pub(crate) fn container_of<'a>(
    doc: &'a Html,
    rules: &dyn ExtractionRules,
) -> Option<ElementRef<'a>> {
    rules
        .container_selectors()
        .iter()
        .find_map(|selector| doc.select(selector).next())
}

/// Convert an element and, for headings, the sibling run up to the next
/// heading of equal or higher level.
fn convert_section(element: ElementRef<'_>, converter: &MarkdownConverter<'_>) -> String {
    let tag = element.value().name();
    let tag_heading_level = heading_level(tag);
    let mut parts = vec![converter.convert(element)];

    if let Some(level) = tag_heading_level {
        for sibling in element.next_siblings() {
            if let Node::Element(sibling_el) = sibling.value() {
                if heading_level(sibling_el.name()).is_some_and(|l| l <= level) {
                    break;
                }
                if let Some(el) = ElementRef::wrap(sibling) {
                    parts.push(converter.convert(el));
                }
            }
        }
    }
    parts.retain(|part| !part.trim().is_empty());
    parts.join("\n\n")
}

const fn heading_level(tag: &str) -> Option<u8> {
    match tag.as_bytes() {
        b"h1" => Some(1),
        b"h2" => Some(2),
        b"h3" => Some(3),
        b"h4" => Some(4),
        b"h5" => Some(5),
        b"h6" => Some(6),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use scraper::Selector;

    struct PlainRules {
        containers: Vec<Selector>,
    }

    impl PlainRules {
        fn new() -> Self {
            Self {
                containers: vec![Selector::parse("main").unwrap()],
            }
        }
    }

    impl ExtractionRules for PlainRules {
        fn container_selectors(&self) -> &[Selector] {
            &self.containers
        }

        fn is_chrome(&self, el: &ElementRef<'_>) -> bool {
            el.value().name() == "nav"
        }

        fn code_language(&self, _el: &ElementRef<'_>) -> Option<String> {
            None
        }

        fn extract_object(
            &self,
            _doc: &Html,
            _anchor: Option<&str>,
            _name: &str,
        ) -> Option<(String, String)> {
            None
        }
    }

    const PAGE: &str = r##"<html><body>
<nav><a href="#">chrome</a></nav>
<main>
<h2 id="alpha">alpha</h2>
<p>Alpha does things.</p>
<h2 id="beta">beta</h2>
<p>Beta does other things.</p>
</main>
</body></html>"##;

    #[test]
    fn test_fallback_extracts_anchored_section() {
        let doc = Html::parse_document(PAGE);
        let rules = PlainRules::new();
        let (signature, description) =
            fallback_extract(&doc, &rules, Some("alpha"), "alpha").unwrap();
        assert!(signature.is_empty());
        assert!(description.contains("Alpha does things."));
        assert!(!description.contains("Beta"));
    }

    #[test]
    fn test_fallback_matches_heading_text_without_anchor() {
        let doc = Html::parse_document(PAGE);
        let rules = PlainRules::new();
        let (_, description) = fallback_extract(&doc, &rules, None, "beta").unwrap();
        assert!(description.contains("Beta does other things."));
    }

    #[test]
    fn test_fallback_none_when_nothing_matches() {
        let doc = Html::parse_document(PAGE);
        let rules = PlainRules::new();
        assert!(fallback_extract(&doc, &rules, Some("gamma"), "gamma").is_none());
    }

    #[test]
    fn test_resolve_page_url_remote_and_local() {
        assert_eq!(
            resolve_page_url("https://example.com/docs/", "library/os.html"),
            "https://example.com/docs/library/os.html"
        );
        assert_eq!(
            resolve_page_url("/srv/docs", "library/os.html"),
            "/srv/docs/library/os.html"
        );
    }

    #[test]
    fn test_element_by_id_handles_awkward_anchors() {
        let doc = Html::parse_document(
            r#"<html><body><dt id="os.path.join(a, *p)">sig</dt></body></html>"#,
        );
        assert!(element_by_id(&doc, "os.path.join(a, *p)").is_some());
        assert!(element_by_id(&doc, "missing").is_none());
    }
}
