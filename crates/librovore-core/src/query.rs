//! Query orchestration: compose detection, inventories, and extraction.
//!
//! `query_inventory` detects an inventory processor, loads and filters the
//! inventory, and pages the ordered matches. `query_content` coordinates
//! both genera: it validates cross-compatibility, over-fetches candidates,
//! extracts concurrently, validates extraction quality, re-ranks by
//! content-aware relevance, and optionally attaches snippets.

use std::collections::BTreeMap;
use std::time::Instant;

use tracing::{debug, instrument};

use crate::Librovore;
use crate::detection::{
    inventory_detections, normalize_source, select_inventory, select_structure,
    structure_detections,
};
use crate::error::{Error, Result};
use crate::inventory::{ScoredObject, filter_inventory};
use crate::matching::{MatchMode, NameMatcher};
use crate::results::{
    ContentQueryResult, DetectionReport, DetectionsResult, InventoryQueryResult, ProcessorReport,
    ProcessorsSurveyResult, SearchMetadata,
};
use crate::types::{ContentDocument, ProcessorGenus};

/// Over-fetch factor for content candidates: extraction quality and
/// re-ranking need more objects than the final page.
const CANDIDATE_FACTOR: usize = 3;

/// Minimum share of candidates that must yield meaningful content, percent.
const MEANINGFUL_FLOOR_PCT: f64 = 10.0;

// Content-aware relevance weights.
const MATCH_SCORE_WEIGHT: f64 = 0.4;
const NAME_HIT_BONUS: f64 = 0.3;
const SIGNATURE_HIT_BONUS: f64 = 0.15;
const DESCRIPTION_HIT_BONUS: f64 = 0.15;

/// Characters of context kept around a snippet's first term occurrence.
const SNIPPET_BEFORE: usize = 60;
const SNIPPET_AFTER: usize = 160;

/// Options for [`Librovore::query_inventory`].
#[derive(Debug, Clone)]
pub struct InventoryQueryOptions {
    /// Attribute filters; every key must be supported by the processor.
    pub filters: BTreeMap<String, String>,
    /// Name match mode.
    pub match_mode: MatchMode,
    /// Fuzzy threshold override; configuration default when `None`.
    pub fuzzy_threshold: Option<u8>,
    /// Page size override; configuration default when `None`.
    pub results_max: Option<usize>,
    /// Return attribute distributions instead of objects.
    pub summarize: bool,
    /// Attributes to group the summary by; supported filters when empty.
    pub group_by: Vec<String>,
}

impl Default for InventoryQueryOptions {
    fn default() -> Self {
        Self {
            filters: BTreeMap::new(),
            match_mode: MatchMode::Fuzzy,
            fuzzy_threshold: None,
            results_max: None,
            summarize: false,
            group_by: Vec::new(),
        }
    }
}

/// Options for [`Librovore::query_content`].
#[derive(Debug, Clone)]
pub struct ContentQueryOptions {
    /// Attribute filters; every key must be supported by the processor.
    pub filters: BTreeMap<String, String>,
    /// Name match mode.
    pub match_mode: MatchMode,
    /// Fuzzy threshold override; configuration default when `None`.
    pub fuzzy_threshold: Option<u8>,
    /// Page size override; configuration default when `None`.
    pub results_max: Option<usize>,
    /// Attach a query-ranked excerpt per document.
    pub include_snippets: bool,
}

impl Default for ContentQueryOptions {
    fn default() -> Self {
        Self {
            filters: BTreeMap::new(),
            match_mode: MatchMode::Fuzzy,
            fuzzy_threshold: None,
            results_max: None,
            include_snippets: true,
        }
    }
}

impl Librovore {
    /// Search a source's inventory by name and metadata.
    ///
    /// # Errors
    ///
    /// Fails with `ProcessorUnavailable` when no inventory processor
    /// recognizes the source, `FilterUnsupported` for unknown filter keys,
    /// and the retrieval-layer errors for unreachable sources.
    #[instrument(skip(self, options))]
    pub async fn query_inventory(
        &self,
        source: &str,
        term: &str,
        options: InventoryQueryOptions,
    ) -> Result<InventoryQueryResult> {
        let started = Instant::now();
        let source = normalize_source(source)?;
        let threshold = options
            .fuzzy_threshold
            .unwrap_or(self.config().matching.fuzzy_threshold);
        let matcher = NameMatcher::new(
            term,
            options.match_mode,
            threshold,
            self.config().matching.exact_strict,
        )?;

        let detections = inventory_detections(
            self.detection_caches(),
            self.registry().inventory(),
            self.proxy(),
            &source,
        )
        .await?;
        let detection = select_inventory(
            &detections,
            self.config().detection.confidence_floor,
            &source,
        )?;
        let processor = self
            .registry()
            .inventory()
            .iter()
            .find(|p| p.name() == detection.processor)
            .ok_or_else(|| Error::ProcessorUnavailable {
                probed_source: source.clone(),
                genus: ProcessorGenus::Inventory,
            })?;

        let matched = filter_inventory(
            processor.as_ref(),
            self.proxy(),
            &detection,
            &matcher,
            &options.filters,
        )
        .await?;
        let matches_total = matched.len();
        debug!(source, term, matches_total, "inventory query matched");

        let summary = options.summarize.then(|| {
            let group_by = if options.group_by.is_empty() {
                detection
                    .capabilities
                    .supported_filters
                    .iter()
                    .cloned()
                    .collect()
            } else {
                options.group_by.clone()
            };
            // Distributions cover the full matched set, not the page.
            summarize(&matched, &group_by)
        });

        let results_max = options
            .results_max
            .unwrap_or(self.config().limits.results_max);
        let objects = matched
            .into_iter()
            .take(results_max)
            .map(|scored| scored.object)
            .collect();

        Ok(InventoryQueryResult {
            source,
            term: term.to_string(),
            matches_total,
            objects,
            summary,
            search_metadata: SearchMetadata {
                match_mode: options.match_mode.to_string(),
                fuzzy_threshold: threshold,
                filters: options.filters,
                results_max,
                inventory_processor: detection.processor.clone(),
                structure_processor: None,
                elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                cache_stats: serde_json::to_value(self.proxy().stats()).ok(),
            },
        })
    }

    /// Search a source and extract per-object documentation content.
    ///
    /// # Errors
    ///
    /// In addition to [`Librovore::query_inventory`] failures:
    /// `ProcessorIncompatible` when the detected structure processor does
    /// not support the detected inventory type, `StructureIncompatible`
    /// when extraction yields nothing meaningful, and
    /// `ContentExtractFailure` when fewer than 10% of candidates produce
    /// meaningful content.
    #[instrument(skip(self, options))]
    pub async fn query_content(
        &self,
        source: &str,
        term: &str,
        options: ContentQueryOptions,
    ) -> Result<ContentQueryResult> {
        let started = Instant::now();
        let source = normalize_source(source)?;
        let threshold = options
            .fuzzy_threshold
            .unwrap_or(self.config().matching.fuzzy_threshold);
        let matcher = NameMatcher::new(
            term,
            options.match_mode,
            threshold,
            self.config().matching.exact_strict,
        )?;
        let floor = self.config().detection.confidence_floor;

        let structure_candidates = structure_detections(
            self.detection_caches(),
            self.registry().structure(),
            self.proxy(),
            &source,
        )
        .await?;
        let inventory_candidates = inventory_detections(
            self.detection_caches(),
            self.registry().inventory(),
            self.proxy(),
            &source,
        )
        .await?;

        let inventory_detection = select_inventory(&inventory_candidates, floor, &source)?;
        let structure_detection = select_structure(
            &structure_candidates,
            floor,
            &source,
            Some(&inventory_detection.inventory_type),
        )?;

        // Cross-genus compatibility gate before any page work.
        if !structure_detection
            .capabilities
            .supports_inventory_type(&inventory_detection.inventory_type)
        {
            return Err(Error::ProcessorIncompatible {
                inventory_type: inventory_detection.inventory_type.clone(),
                structure_processor: structure_detection.processor.clone(),
            });
        }

        let inventory_processor = self
            .registry()
            .inventory()
            .iter()
            .find(|p| p.name() == inventory_detection.processor)
            .ok_or_else(|| Error::ProcessorUnavailable {
                probed_source: source.clone(),
                genus: ProcessorGenus::Inventory,
            })?;
        let structure_processor = self
            .registry()
            .structure()
            .iter()
            .find(|p| p.name() == structure_detection.processor)
            .ok_or_else(|| Error::ProcessorUnavailable {
                probed_source: source.clone(),
                genus: ProcessorGenus::Structure,
            })?;

        let matched = filter_inventory(
            inventory_processor.as_ref(),
            self.proxy(),
            &inventory_detection,
            &matcher,
            &options.filters,
        )
        .await?;
        let matches_total = matched.len();

        let results_max = options
            .results_max
            .unwrap_or(self.config().limits.results_max);
        let candidates: Vec<ScoredObject> = matched
            .into_iter()
            .take(results_max.saturating_mul(CANDIDATE_FACTOR).max(results_max))
            .collect();
        let candidate_objects: Vec<_> =
            candidates.iter().map(|scored| scored.object.clone()).collect();

        let mut documents = structure_processor
            .extract_contents(self.proxy(), &source, &candidate_objects)
            .await?;

        if !candidates.is_empty() {
            let meaningful = documents.iter().filter(|d| d.is_meaningful()).count();
            if meaningful == 0 {
                return Err(Error::StructureIncompatible {
                    probed_source: source.clone(),
                    processor: structure_detection.processor.clone(),
                });
            }
            let success_rate = meaningful as f64 / candidates.len() as f64 * 100.0;
            // Exactly the floor passes validation.
            if success_rate < MEANINGFUL_FLOOR_PCT {
                return Err(Error::ContentExtractFailure { success_rate });
            }
            debug!(source, term, meaningful, success_rate, "extraction validated");
        }

        for (document, scored) in documents.iter_mut().zip(&candidates) {
            document.relevance_score = relevance(document, term, scored.score);
            if options.include_snippets {
                document.content_snippet = snippet(&document.description, term);
            }
        }

        let mut documents: Vec<ContentDocument> = documents
            .into_iter()
            .filter(ContentDocument::is_meaningful)
            .collect();
        documents.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.name.cmp(&b.name))
        });
        documents.truncate(results_max);

        Ok(ContentQueryResult {
            source,
            term: term.to_string(),
            matches_total,
            documents,
            search_metadata: SearchMetadata {
                match_mode: options.match_mode.to_string(),
                fuzzy_threshold: threshold,
                filters: options.filters,
                results_max,
                inventory_processor: inventory_detection.processor.clone(),
                structure_processor: Some(structure_detection.processor.clone()),
                elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                cache_stats: serde_json::to_value(self.proxy().stats()).ok(),
            },
        })
    }

    /// Run detection and report every processor's verdict.
    ///
    /// # Errors
    ///
    /// Fails for invalid sources and robots denial; an empty detection set
    /// is a valid (empty) result, unlike in the query paths.
    pub async fn detect(
        &self,
        source: &str,
        genus: Option<ProcessorGenus>,
    ) -> Result<DetectionsResult> {
        let source = normalize_source(source)?;
        let floor = self.config().detection.confidence_floor;
        let mut reports = Vec::new();

        if genus.is_none_or(|g| g == ProcessorGenus::Inventory) {
            let detections = inventory_detections(
                self.detection_caches(),
                self.registry().inventory(),
                self.proxy(),
                &source,
            )
            .await?;
            reports.extend(
                detections
                    .iter()
                    .map(|d| DetectionReport::from_inventory(d, floor)),
            );
        }
        if genus.is_none_or(|g| g == ProcessorGenus::Structure) {
            let detections = structure_detections(
                self.detection_caches(),
                self.registry().structure(),
                self.proxy(),
                &source,
            )
            .await?;
            reports.extend(
                detections
                    .iter()
                    .map(|d| DetectionReport::from_structure(d, floor)),
            );
        }

        reports.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(DetectionsResult {
            source,
            detections: reports,
        })
    }

    /// Report every registered processor's declared capabilities.
    #[must_use]
    pub fn survey_processors(&self) -> ProcessorsSurveyResult {
        let inventory = self
            .registry()
            .inventory()
            .iter()
            .map(|processor| ProcessorReport {
                name: processor.name().to_string(),
                genus: ProcessorGenus::Inventory,
                supported_filters: processor
                    .capabilities()
                    .supported_filters
                    .iter()
                    .cloned()
                    .collect(),
                supported_inventory_types: Vec::new(),
                content_extraction_features: Vec::new(),
            })
            .collect();
        let structure = self
            .registry()
            .structure()
            .iter()
            .map(|processor| {
                let capabilities = processor.capabilities();
                ProcessorReport {
                    name: processor.name().to_string(),
                    genus: ProcessorGenus::Structure,
                    supported_filters: Vec::new(),
                    supported_inventory_types: capabilities
                        .supported_inventory_types
                        .iter()
                        .cloned()
                        .collect(),
                    content_extraction_features: capabilities
                        .content_extraction_features
                        .iter()
                        .map(|feature| format!("{feature:?}"))
                        .collect(),
                }
            })
            .collect();
        ProcessorsSurveyResult {
            inventory,
            structure,
        }
    }
}

/// Attribute distributions over the full matched set.
fn summarize(
    matched: &[ScoredObject],
    group_by: &[String],
) -> BTreeMap<String, BTreeMap<String, usize>> {
    let mut summary: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();
    for attribute in group_by {
        let counts = summary.entry(attribute.clone()).or_default();
        for scored in matched {
            if let Some(value) = scored.object.specifics.get(attribute) {
                *counts.entry(value.to_string()).or_insert(0) += 1;
            }
        }
    }
    summary
}

/// Content-aware relevance in `[0, 1]`.
fn relevance(document: &ContentDocument, term: &str, match_score: u8) -> f64 {
    let mut score = f64::from(match_score) / 100.0 * MATCH_SCORE_WEIGHT;
    if term.is_empty() {
        return score.clamp(0.0, 1.0);
    }
    let term_lower = term.to_lowercase();
    if document.name.to_lowercase().contains(&term_lower) {
        score += NAME_HIT_BONUS;
    }
    if document.signature.to_lowercase().contains(&term_lower) {
        score += SIGNATURE_HIT_BONUS;
    }
    if document.description.to_lowercase().contains(&term_lower) {
        score += DESCRIPTION_HIT_BONUS;
    }
    score.clamp(0.0, 1.0)
}

/// A window of description text around the first term occurrence.
fn snippet(description: &str, term: &str) -> Option<String> {
    if description.is_empty() || term.is_empty() {
        return None;
    }
    let haystack = description.to_lowercase();
    let position = haystack.find(&term.to_lowercase())?;

    let start = description[..position]
        .char_indices()
        .rev()
        .take(SNIPPET_BEFORE)
        .last()
        .map_or(position, |(idx, _)| idx);
    let end = description[position..]
        .char_indices()
        .take(SNIPPET_AFTER)
        .last()
        .map_or(description.len(), |(idx, ch)| position + idx + ch.len_utf8());

    let mut excerpt = description[start..end].replace('\n', " ");
    if start > 0 {
        excerpt.insert(0, '…');
    }
    if end < description.len() {
        excerpt.push('…');
    }
    Some(excerpt)
}
