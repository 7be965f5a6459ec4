//! Two-stage detection: classify a source per processor genus.
//!
//! Detection normalizes the source, consults the genus's TTL cache, and on a
//! miss invokes every registered processor of that genus concurrently. All
//! detections (rejected ones included) are cached; selection filters by the
//! confidence floor and picks the highest confidence with registration order
//! as the deterministic tie-break. Structure selection accepts a known
//! inventory type whose per-type confidence bias breaks remaining ties.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::inventory::{InventoryDetection, InventoryProcessor};
use crate::retrieval::{CacheProxy, SourceTarget};
use crate::structure::{StructureDetection, StructureProcessor};
use crate::types::ProcessorGenus;

/// Normalize a source string for detection and caching.
///
/// Local paths become absolute; HTTP URLs get lowercase scheme and host;
/// trailing slashes are stripped consistently so equivalent spellings share
/// one cache entry.
pub fn normalize_source(source: &str) -> Result<String> {
    match SourceTarget::classify(source)? {
        SourceTarget::Remote(url) => {
            // Url::parse already lowercases scheme and host.
            Ok(url.to_string().trim_end_matches('/').to_string())
        },
        SourceTarget::Local(path) => {
            let absolute = if path.is_absolute() {
                path
            } else {
                std::env::current_dir()
                    .map_err(Error::Io)?
                    .join(path)
            };
            let mut normalized = clean_path(&absolute);
            while normalized.len() > 1 && normalized.ends_with('/') {
                normalized.pop();
            }
            Ok(normalized)
        },
    }
}

/// Lexically resolve `.` and `..` components without touching the disk.
fn clean_path(path: &Path) -> String {
    let mut parts: Vec<std::path::Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            std::path::Component::CurDir => {},
            std::path::Component::ParentDir => {
                if !matches!(parts.last(), Some(std::path::Component::RootDir) | None) {
                    parts.pop();
                }
            },
            other => parts.push(other),
        }
    }
    let mut cleaned = std::path::PathBuf::new();
    for part in parts {
        cleaned.push(part.as_os_str());
    }
    cleaned.to_string_lossy().into_owned()
}

struct CachedSet<T> {
    detections: Vec<T>,
    stored_at: Instant,
}

/// TTL cache of all detections for one genus, keyed by normalized source.
pub struct DetectionCache<T> {
    entries: HashMap<String, CachedSet<T>>,
    ttl: Duration,
}

impl<T: Clone> DetectionCache<T> {
    fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    fn get(&mut self, source: &str, now: Instant) -> Option<Vec<T>> {
        match self.entries.get(source) {
            Some(set) if now.saturating_duration_since(set.stored_at) < self.ttl => {
                Some(set.detections.clone())
            },
            Some(_) => {
                self.entries.remove(source);
                None
            },
            None => None,
        }
    }

    fn insert(&mut self, source: String, detections: Vec<T>, now: Instant) {
        self.entries.insert(
            source,
            CachedSet {
                detections,
                stored_at: now,
            },
        );
    }
}

/// Per-genus detection caches shared by all queries.
pub struct DetectionCaches {
    inventory: Mutex<DetectionCache<InventoryDetection>>,
    structure: Mutex<DetectionCache<StructureDetection>>,
}

impl DetectionCaches {
    /// Create empty caches with the configured TTL.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            inventory: Mutex::new(DetectionCache::new(ttl)),
            structure: Mutex::new(DetectionCache::new(ttl)),
        }
    }
}

/// All inventory detections for a source, from cache or a concurrent run.
pub async fn inventory_detections(
    caches: &DetectionCaches,
    processors: &[Arc<dyn InventoryProcessor>],
    proxy: &CacheProxy,
    source: &str,
) -> Result<Vec<InventoryDetection>> {
    if let Some(cached) = caches.inventory.lock().await.get(source, Instant::now()) {
        debug!(source, genus = %ProcessorGenus::Inventory, "detections served from cache");
        return Ok(cached);
    }

    let runs = processors.iter().map(|processor| {
        let processor = Arc::clone(processor);
        async move {
            let name = processor.name().to_string();
            (name, processor.detect(proxy, source).await)
        }
    });
    let outcomes = futures::future::join_all(runs).await;
    let detections = collect_detections(outcomes, source, ProcessorGenus::Inventory)?;

    caches
        .inventory
        .lock()
        .await
        .insert(source.to_string(), detections.clone(), Instant::now());
    Ok(detections)
}

/// All structure detections for a source, from cache or a concurrent run.
pub async fn structure_detections(
    caches: &DetectionCaches,
    processors: &[Arc<dyn StructureProcessor>],
    proxy: &CacheProxy,
    source: &str,
) -> Result<Vec<StructureDetection>> {
    if let Some(cached) = caches.structure.lock().await.get(source, Instant::now()) {
        debug!(source, genus = %ProcessorGenus::Structure, "detections served from cache");
        return Ok(cached);
    }

    let runs = processors.iter().map(|processor| {
        let processor = Arc::clone(processor);
        async move {
            let name = processor.name().to_string();
            (name, processor.detect(proxy, source).await)
        }
    });
    let outcomes = futures::future::join_all(runs).await;
    let detections = collect_detections(outcomes, source, ProcessorGenus::Structure)?;

    caches
        .structure
        .lock()
        .await
        .insert(source.to_string(), detections.clone(), Instant::now());
    Ok(detections)
}

/// Flatten per-processor outcomes, propagating only robots denial.
///
/// An individual processor failing to probe a source tells us nothing about
/// the other processors; a robots denial applies to the source as a whole.
fn collect_detections<T>(
    outcomes: Vec<(String, Result<Option<T>>)>,
    source: &str,
    genus: ProcessorGenus,
) -> Result<Vec<T>> {
    let mut detections = Vec::new();
    for (name, outcome) in outcomes {
        match outcome {
            Ok(Some(detection)) => detections.push(detection),
            Ok(None) => {},
            Err(Error::AccessDisallowed { url }) => {
                return Err(Error::AccessDisallowed { url });
            },
            Err(e) => {
                warn!(source, %genus, processor = name, error = %e, "processor detection failed");
            },
        }
    }
    Ok(detections)
}

/// Select the best inventory detection.
///
/// Detections below `floor` are rejected. The first registered among those
/// with the highest confidence wins, which makes ties deterministic.
pub fn select_inventory(
    detections: &[InventoryDetection],
    floor: f64,
    source: &str,
) -> Result<InventoryDetection> {
    let mut best: Option<&InventoryDetection> = None;
    for detection in detections {
        if detection.confidence < floor {
            continue;
        }
        if best.is_none_or(|current| detection.confidence > current.confidence) {
            best = Some(detection);
        }
    }
    best.cloned().ok_or_else(|| Error::ProcessorUnavailable {
        probed_source: source.to_string(),
        genus: ProcessorGenus::Inventory,
    })
}

/// Select the best structure detection.
///
/// Same rules as inventory selection, except that a known inventory type
/// (cross-genus coordination in content queries) breaks confidence ties via
/// each processor's per-type bias before registration order applies.
pub fn select_structure(
    detections: &[StructureDetection],
    floor: f64,
    source: &str,
    known_inventory_type: Option<&str>,
) -> Result<StructureDetection> {
    let bias = |detection: &StructureDetection| {
        known_inventory_type
            .map(|ty| detection.capabilities.bias_for(ty))
            .unwrap_or(0.0)
    };

    let mut best: Option<&StructureDetection> = None;
    for detection in detections {
        if detection.confidence < floor {
            continue;
        }
        let better = match best {
            None => true,
            Some(current) => {
                detection.confidence > current.confidence
                    || (detection.confidence == current.confidence
                        && bias(detection) > bias(current))
            },
        };
        if better {
            best = Some(detection);
        }
    }
    best.cloned().ok_or_else(|| Error::ProcessorUnavailable {
        probed_source: source.to_string(),
        genus: ProcessorGenus::Structure,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{InventoryCapabilities, StructureCapabilities};

    fn inventory_detection(name: &str, confidence: f64) -> InventoryDetection {
        InventoryDetection::new(
            name,
            "https://example.com",
            confidence,
            InventoryCapabilities::default(),
            "sphinx_objects_inv",
            "https://example.com/objects.inv".to_string(),
        )
    }

    fn structure_detection(
        name: &str,
        confidence: f64,
        bias_type: &str,
        bias: f64,
    ) -> StructureDetection {
        let mut capabilities = StructureCapabilities::default();
        capabilities
            .supported_inventory_types
            .insert(bias_type.to_string());
        capabilities
            .confidence_by_inventory_type
            .insert(bias_type.to_string(), bias);
        StructureDetection {
            processor: name.to_string(),
            source: "https://example.com".to_string(),
            confidence,
            capabilities,
            theme: None,
        }
    }

    #[test]
    fn test_normalize_http_lowercases_and_strips_slash() {
        assert_eq!(
            normalize_source("HTTPS://Docs.Example.COM/Guide/").unwrap(),
            "https://docs.example.com/Guide"
        );
    }

    #[test]
    fn test_normalize_path_is_absolute_and_clean() {
        let normalized = normalize_source("/srv/docs/./site/../site/").unwrap();
        assert_eq!(normalized, "/srv/docs/site");
        let relative = normalize_source("docs/site").unwrap();
        assert!(relative.starts_with('/'));
        assert!(relative.ends_with("docs/site"));
    }

    #[test]
    fn test_selection_rejects_below_floor() {
        let detections = vec![inventory_detection("weak", 0.4)];
        let result = select_inventory(&detections, 0.5, "src");
        assert!(matches!(
            result,
            Err(Error::ProcessorUnavailable {
                genus: ProcessorGenus::Inventory,
                ..
            })
        ));
    }

    #[test]
    fn test_selection_highest_confidence_wins() {
        let detections = vec![
            inventory_detection("sphinx", 0.7),
            inventory_detection("mkdocs", 0.9),
        ];
        let selected = select_inventory(&detections, 0.5, "src").unwrap();
        assert_eq!(selected.processor, "mkdocs");
    }

    #[test]
    fn test_selection_tie_breaks_by_registration_order() {
        let detections = vec![
            inventory_detection("first", 0.8),
            inventory_detection("second", 0.8),
        ];
        let selected = select_inventory(&detections, 0.5, "src").unwrap();
        assert_eq!(selected.processor, "first");
    }

    #[test]
    fn test_structure_tie_breaks_by_inventory_type_bias() {
        let detections = vec![
            structure_detection("sphinx", 0.8, "mkdocs_search_index", 0.4),
            structure_detection("mkdocs", 0.8, "mkdocs_search_index", 0.9),
        ];
        let selected =
            select_structure(&detections, 0.5, "src", Some("mkdocs_search_index")).unwrap();
        assert_eq!(selected.processor, "mkdocs");

        // Without the cross-genus hint, registration order holds.
        let selected = select_structure(&detections, 0.5, "src", None).unwrap();
        assert_eq!(selected.processor, "sphinx");
    }

    #[test]
    fn test_detection_cache_ttl_and_identity() {
        let mut cache: DetectionCache<InventoryDetection> =
            DetectionCache::new(Duration::from_secs(3600));
        let now = Instant::now();
        cache.insert(
            "src".to_string(),
            vec![inventory_detection("sphinx", 0.8)],
            now,
        );
        let hit = cache.get("src", now + Duration::from_secs(3599)).unwrap();
        assert_eq!(hit.len(), 1);
        assert!(cache.get("src", now + Duration::from_secs(3600)).is_none());
    }
}
