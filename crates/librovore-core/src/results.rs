//! Typed query results with self-rendering.
//!
//! Every query outcome is a typed result that renders itself to JSON (for
//! tool-calling consumers) or Markdown lines (for human display). Rendered
//! JSON round-trips back into the type, modulo display-only fields guarded
//! by `reveal_internals`. Errors cross the outermost boundary as
//! [`ErrorResponse`] values rather than raised errors, so callers always
//! receive something structured and actionable.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::Error;
use crate::inventory::InventoryDetection;
use crate::structure::StructureDetection;
use crate::types::{ContentDocument, InventoryObject, ProcessorGenus};

/// Width limit for one rendered Markdown line; longer content truncates.
const MARKDOWN_LINE_WIDTH: usize = 120;

/// Decorative separator between rendered objects.
const SEPARATOR: &str = "---";

/// A query outcome that can render itself.
pub trait Render {
    /// Structured mapping suitable for tool-call serialization.
    fn render_as_json(&self, reveal_internals: bool) -> Value;

    /// Markdown lines for human display.
    fn render_as_markdown(&self, reveal_internals: bool) -> Vec<String>;
}

/// Per-query execution context attached to results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchMetadata {
    /// Match mode the query ran with.
    pub match_mode: String,
    /// Fuzzy threshold in effect.
    pub fuzzy_threshold: u8,
    /// Attribute filters applied.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub filters: BTreeMap<String, String>,
    /// Requested result page size.
    pub results_max: usize,
    /// Inventory processor that served the query.
    pub inventory_processor: String,
    /// Structure processor used for content extraction, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structure_processor: Option<String>,
    /// Wall-clock time spent, internals-only.
    #[serde(default)]
    pub elapsed_ms: u64,
    /// Cache traffic counters, internals-only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_stats: Option<Value>,
}

impl SearchMetadata {
    fn to_json(&self, reveal_internals: bool) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if !reveal_internals {
            if let Value::Object(map) = &mut value {
                map.remove("elapsed_ms");
                map.remove("cache_stats");
            }
        }
        value
    }
}

/// Outcome of `query_inventory`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryQueryResult {
    /// Normalized source queried.
    pub source: String,
    /// The search term.
    pub term: String,
    /// Total matches before truncation to `results_max`.
    pub matches_total: usize,
    /// The result page, at most `results_max` objects.
    pub objects: Vec<InventoryObject>,
    /// Distribution counts per attribute, when summarizing. Computed over
    /// the full matched set, never the truncated page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<BTreeMap<String, BTreeMap<String, usize>>>,
    /// Execution context.
    pub search_metadata: SearchMetadata,
}

impl Render for InventoryQueryResult {
    fn render_as_json(&self, reveal_internals: bool) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Value::Object(map) = &mut value {
            map.insert(
                "search_metadata".to_string(),
                self.search_metadata.to_json(reveal_internals),
            );
        }
        value
    }

    fn render_as_markdown(&self, reveal_internals: bool) -> Vec<String> {
        let mut lines = vec![
            format!("# Inventory query: {}", truncate(&self.term)),
            format!("Source: {}", truncate(&self.source)),
            format!(
                "Matches: {} total, showing {}",
                self.matches_total,
                self.objects.len()
            ),
        ];

        if let Some(summary) = &self.summary {
            lines.push(String::new());
            lines.push("## Summary".to_string());
            for (attribute, counts) in summary {
                lines.push(format!("### {attribute}"));
                for (value, count) in counts {
                    lines.push(truncate(&format!("- {value}: {count}")));
                }
            }
        }

        for object in &self.objects {
            lines.push(SEPARATOR.to_string());
            lines.push(format!("## {}", truncate(&object.name)));
            if let Some(display) = &object.display_name {
                lines.push(truncate(&format!("Display name: {display}")));
            }
            lines.push(truncate(&format!("URI: {}", object.expanded_uri())));
            lines.push(truncate(&format!(
                "Specifics: {}",
                object.specifics.render_markdown()
            )));
        }

        push_metadata_markdown(&mut lines, &self.search_metadata, reveal_internals);
        lines
    }
}

/// Outcome of `query_content`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentQueryResult {
    /// Normalized source queried.
    pub source: String,
    /// The search term.
    pub term: String,
    /// Total inventory matches before candidate truncation.
    pub matches_total: usize,
    /// Extracted documents in post-ranking order.
    pub documents: Vec<ContentDocument>,
    /// Execution context.
    pub search_metadata: SearchMetadata,
}

impl Render for ContentQueryResult {
    fn render_as_json(&self, reveal_internals: bool) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Value::Object(map) = &mut value {
            map.insert(
                "search_metadata".to_string(),
                self.search_metadata.to_json(reveal_internals),
            );
        }
        value
    }

    fn render_as_markdown(&self, reveal_internals: bool) -> Vec<String> {
        let mut lines = vec![
            format!("# Content query: {}", truncate(&self.term)),
            format!("Source: {}", truncate(&self.source)),
            format!(
                "Matches: {} total, showing {}",
                self.matches_total,
                self.documents.len()
            ),
        ];

        for document in &self.documents {
            lines.push(SEPARATOR.to_string());
            lines.push(format!("## {}", truncate(&document.name)));
            lines.push(truncate(&format!("Read at: {}", document.documentation_url)));
            lines.push(format!("Relevance: {:.2}", document.relevance_score));
            if !document.signature.is_empty() {
                lines.push("```".to_string());
                lines.push(document.signature.clone());
                lines.push("```".to_string());
            }
            if let Some(snippet) = &document.content_snippet {
                lines.push(truncate(&format!("> {snippet}")));
            }
            if !document.description.is_empty() {
                lines.push(String::new());
                lines.extend(document.description.lines().map(ToString::to_string));
            }
        }

        push_metadata_markdown(&mut lines, &self.search_metadata, reveal_internals);
        lines
    }
}

/// One processor's detection verdict, as reported by the `detect` surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionReport {
    /// Processor name.
    pub processor: String,
    /// Processor genus.
    pub genus: ProcessorGenus,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Whether the confidence floor rejected this detection.
    pub rejected: bool,
    /// Inventory type, for inventory detections.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inventory_type: Option<String>,
    /// Detected theme, for structure detections.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
}

impl DetectionReport {
    /// Report for an inventory detection.
    #[must_use]
    pub fn from_inventory(detection: &InventoryDetection, floor: f64) -> Self {
        Self {
            processor: detection.processor.clone(),
            genus: ProcessorGenus::Inventory,
            confidence: detection.confidence,
            rejected: detection.confidence < floor,
            inventory_type: Some(detection.inventory_type.clone()),
            theme: None,
        }
    }

    /// Report for a structure detection.
    #[must_use]
    pub fn from_structure(detection: &StructureDetection, floor: f64) -> Self {
        Self {
            processor: detection.processor.clone(),
            genus: ProcessorGenus::Structure,
            confidence: detection.confidence,
            rejected: detection.confidence < floor,
            inventory_type: None,
            theme: detection.theme.clone(),
        }
    }
}

/// Outcome of the `detect` operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionsResult {
    /// Normalized source probed.
    pub source: String,
    /// All detections, best first, rejected ones included.
    pub detections: Vec<DetectionReport>,
}

impl Render for DetectionsResult {
    fn render_as_json(&self, _reveal_internals: bool) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    fn render_as_markdown(&self, _reveal_internals: bool) -> Vec<String> {
        let mut lines = vec![format!("# Detections for {}", truncate(&self.source))];
        if self.detections.is_empty() {
            lines.push("No processor recognized this source.".to_string());
        }
        for report in &self.detections {
            lines.push(SEPARATOR.to_string());
            let status = if report.rejected { "rejected" } else { "eligible" };
            lines.push(format!(
                "## {} ({}) - confidence {:.2}, {status}",
                report.processor, report.genus, report.confidence
            ));
            if let Some(inventory_type) = &report.inventory_type {
                lines.push(format!("Inventory type: {inventory_type}"));
            }
            if let Some(theme) = &report.theme {
                lines.push(format!("Theme: {theme}"));
            }
        }
        lines
    }
}

/// One processor's declared capabilities, as reported by the survey surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorReport {
    /// Processor name.
    pub name: String,
    /// Processor genus.
    pub genus: ProcessorGenus,
    /// Filterable attributes, for inventory processors.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_filters: Vec<String>,
    /// Supported inventory types, for structure processors.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_inventory_types: Vec<String>,
    /// Extraction features, for structure processors.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content_extraction_features: Vec<String>,
}

/// Outcome of the `survey_processors` operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorsSurveyResult {
    /// Inventory processors in registration order.
    pub inventory: Vec<ProcessorReport>,
    /// Structure processors in registration order.
    pub structure: Vec<ProcessorReport>,
}

impl Render for ProcessorsSurveyResult {
    fn render_as_json(&self, _reveal_internals: bool) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    fn render_as_markdown(&self, _reveal_internals: bool) -> Vec<String> {
        let mut lines = vec!["# Registered processors".to_string()];
        lines.push("## Inventory".to_string());
        for report in &self.inventory {
            lines.push(truncate(&format!(
                "- {} (filters: {})",
                report.name,
                report.supported_filters.join(", ")
            )));
        }
        lines.push("## Structure".to_string());
        for report in &self.structure {
            lines.push(truncate(&format!(
                "- {} (inventory types: {}; features: {})",
                report.name,
                report.supported_inventory_types.join(", "),
                report.content_extraction_features.join(", ")
            )));
        }
        lines
    }
}

/// Structured error surfaced at the outermost boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable category identifier, e.g. `processor_unavailable`.
    pub error_type: String,
    /// Human-readable message.
    pub message: String,
    /// Structured context extracted from the error.
    #[serde(default)]
    pub details: Value,
    /// Actionable hint.
    pub suggestion: String,
}

impl From<&Error> for ErrorResponse {
    fn from(error: &Error) -> Self {
        let details = match error {
            Error::Network { url, cause } => json!({ "url": url, "cause": cause }),
            Error::HttpStatus { status, url } => json!({ "status": status, "url": url }),
            Error::AccessDisallowed { url } => json!({ "url": url }),
            Error::ContentTypeInvalid { url, actual } => {
                json!({ "url": url, "content_type": actual })
            },
            Error::FilterUnsupported { filter, processor } => {
                json!({ "filter": filter, "processor": processor })
            },
            Error::ProcessorUnavailable { probed_source, genus } => {
                json!({ "source": probed_source, "genus": genus })
            },
            Error::ProcessorIncompatible {
                inventory_type,
                structure_processor,
            } => json!({
                "inventory_type": inventory_type,
                "structure_processor": structure_processor,
            }),
            Error::StructureIncompatible { probed_source, processor } => {
                json!({ "source": probed_source, "processor": processor })
            },
            Error::ContentExtractFailure { success_rate } => {
                json!({ "success_rate": success_rate })
            },
            Error::ExtensionInstallFailure { package, cause } => {
                json!({ "package": package, "cause": cause })
            },
            Error::ExtensionCacheCorrupt { package } => json!({ "package": package }),
            Error::ExtensionRegistrationFailure { name, cause } => {
                json!({ "name": name, "cause": cause })
            },
            _ => Value::Null,
        };
        Self {
            error_type: error.category().to_string(),
            message: error.to_string(),
            details,
            suggestion: error.suggestion(),
        }
    }
}

impl Render for ErrorResponse {
    fn render_as_json(&self, _reveal_internals: bool) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    fn render_as_markdown(&self, reveal_internals: bool) -> Vec<String> {
        let mut lines = vec![
            format!("**Error ({})**: {}", self.error_type, self.message),
            format!("Suggestion: {}", self.suggestion),
        ];
        if reveal_internals && !self.details.is_null() {
            lines.push(format!("Details: {}", self.details));
        }
        lines
    }
}

fn push_metadata_markdown(lines: &mut Vec<String>, metadata: &SearchMetadata, reveal: bool) {
    if !reveal {
        return;
    }
    lines.push(SEPARATOR.to_string());
    lines.push(format!(
        "Query internals: mode={}, threshold={}, processor={}, elapsed={}ms",
        metadata.match_mode,
        metadata.fuzzy_threshold,
        metadata.inventory_processor,
        metadata.elapsed_ms
    ));
}

/// Truncate a rendered line to the width limit, marking the cut.
fn truncate(line: &str) -> String {
    if line.chars().count() <= MARKDOWN_LINE_WIDTH {
        return line.to_string();
    }
    let mut out: String = line.chars().take(MARKDOWN_LINE_WIDTH - 1).collect();
    out.push('…');
    out
}
