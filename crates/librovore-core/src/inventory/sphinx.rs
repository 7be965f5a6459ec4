//! Sphinx `objects.inv` inventory processor.
//!
//! The primary inventory format: a short plain-text header followed by a
//! zlib-compressed payload of `name domain:role priority uri dispname`
//! lines. Detection probes for the artifact at its conventional location and
//! validates the version-2 header.

use std::io::Read;

use async_trait::async_trait;
use regex::Regex;
use tracing::{trace, warn};

use crate::config::DetectionConfig;
use crate::error::{Error, Result};
use crate::retrieval::CacheProxy;
use crate::types::{InventoryCapabilities, InventoryObject, InventorySpecifics};

use super::{
    InventoryDetection, InventoryProcessor, SPHINX_OBJECTS_INV, base_of, join_source,
};

const V2_HEADER: &[u8] = b"# Sphinx inventory version 2";

/// Inventory processor for Sphinx sites.
pub struct SphinxInventory {
    capabilities: InventoryCapabilities,
    detection: DetectionConfig,
}

impl SphinxInventory {
    /// Build the processor with detection tuning.
    #[must_use]
    pub fn new(detection: &DetectionConfig) -> Self {
        Self {
            capabilities: InventoryCapabilities::with_filters(&["domain", "role", "priority"]),
            detection: detection.clone(),
        }
    }
}

fn line_pattern() -> &'static Regex {
    static PATTERN: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    PATTERN.get_or_init(|| {
        // name  domain:role  priority  uri  dispname
        // dispname is the remainder and may contain spaces.
        #[allow(clippy::unwrap_used)] // literal pattern, exercised by tests
        Regex::new(r"^(.+?)\s+([^\s:]+):(\S+)\s+(-?\d+)\s+(\S+)\s*(.*)$").unwrap()
    })
}

/// Parse a decompressed `objects.inv` payload into objects.
///
/// The `inventory_type` tag is a parameter because mkdocstrings sites
/// publish the same format under MkDocs attribution.
pub(crate) fn parse_objects_inv_payload(
    payload: &str,
    location_base: &str,
    inventory_type: &str,
) -> Vec<InventoryObject> {
    let mut objects = Vec::new();
    for raw in payload.lines() {
        let raw = raw.trim_end();
        if raw.is_empty() {
            continue;
        }
        let Some(caps) = line_pattern().captures(raw) else {
            trace!(line = raw, "skipping unparseable inventory line");
            continue;
        };
        let name = caps[1].to_string();
        if name.is_empty() {
            continue;
        }
        let dispname = caps[6].trim();
        objects.push(InventoryObject {
            display_name: (dispname != "-" && !dispname.is_empty() && dispname != name)
                .then(|| dispname.to_string()),
            uri: caps[5].to_string(),
            inventory_type: inventory_type.to_string(),
            location_base: location_base.to_string(),
            specifics: InventorySpecifics::Sphinx {
                domain: caps[2].to_string(),
                role: caps[3].to_string(),
                priority: caps[4].to_string(),
            },
            name,
        });
    }
    objects
}

/// Decompress and parse raw `objects.inv` bytes.
///
/// Shared with the MkDocs processor, which routes mkdocstrings-published
/// inventories through the same format.
pub(crate) fn decompress_objects_inv(bytes: &[u8]) -> Result<String> {
    if !bytes.starts_with(V2_HEADER) {
        return Err(Error::InventoryMalformed(
            "missing 'Sphinx inventory version 2' header".to_string(),
        ));
    }
    // Header lines start with '#'; the zlib stream begins right after them.
    let mut offset = 0usize;
    while offset < bytes.len() && bytes[offset] == b'#' {
        match bytes[offset..].iter().position(|b| *b == b'\n') {
            Some(nl) => offset += nl + 1,
            None => {
                return Err(Error::InventoryMalformed(
                    "header without payload".to_string(),
                ));
            },
        }
    }
    let mut decoder = flate2::read::ZlibDecoder::new(&bytes[offset..]);
    let mut payload = String::new();
    decoder
        .read_to_string(&mut payload)
        .map_err(|e| Error::InventoryMalformed(format!("zlib payload: {e}")))?;
    Ok(payload)
}

#[async_trait]
impl InventoryProcessor for SphinxInventory {
    fn name(&self) -> &str {
        "sphinx"
    }

    fn capabilities(&self) -> &InventoryCapabilities {
        &self.capabilities
    }

    async fn detect(
        &self,
        proxy: &CacheProxy,
        source: &str,
    ) -> Result<Option<InventoryDetection>> {
        let inventory_url = join_source(source, "objects.inv");
        if !proxy.probe(&inventory_url).await? {
            return Ok(None);
        }

        // Reachable artifact is one signal; a valid v2 header is another.
        let mut signals = 1usize;
        match proxy.retrieve(&inventory_url).await {
            Ok(payload) if payload.bytes().starts_with(V2_HEADER) => signals += 1,
            Ok(_) => warn!(url = inventory_url, "objects.inv present but header invalid"),
            Err(e) => {
                warn!(url = inventory_url, error = %e, "objects.inv probe succeeded but retrieval failed");
                return Ok(None);
            },
        }

        let confidence = (self.detection.base_weight
            + self.detection.signal_weight * signals as f64)
            .min(1.0);
        Ok(Some(InventoryDetection::new(
            self.name(),
            source,
            confidence,
            self.capabilities.clone(),
            SPHINX_OBJECTS_INV,
            inventory_url,
        )))
    }

    async fn load_inventory(
        &self,
        proxy: &CacheProxy,
        detection: &InventoryDetection,
    ) -> Result<Vec<InventoryObject>> {
        let payload = proxy.retrieve(&detection.inventory_url).await?;
        let decompressed = decompress_objects_inv(payload.bytes())?;
        Ok(parse_objects_inv_payload(
            &decompressed,
            &base_of(&detection.source),
            SPHINX_OBJECTS_INV,
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    /// Build a valid version-2 `objects.inv` from payload lines.
    pub(crate) fn build_objects_inv(lines: &[&str]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"# Sphinx inventory version 2\n");
        bytes.extend_from_slice(b"# Project: fixture\n");
        bytes.extend_from_slice(b"# Version: 1.0\n");
        bytes.extend_from_slice(b"# The remainder of this file is compressed using zlib.\n");
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        for line in lines {
            encoder.write_all(line.as_bytes()).unwrap();
            encoder.write_all(b"\n").unwrap();
        }
        bytes.extend_from_slice(&encoder.finish().unwrap());
        bytes
    }

    fn processor() -> SphinxInventory {
        SphinxInventory::new(&DetectionConfig::default())
    }

    #[test]
    fn test_roundtrip_parse() {
        let bytes = build_objects_inv(&[
            "os.path.join py:function 1 library/os.path.html#$ -",
            "os.path.exists py:function 1 library/os.path.html#$ -",
            "os.PathLike py:class 1 library/os.html#os.PathLike path-like object",
        ]);
        let payload = decompress_objects_inv(&bytes).unwrap();
        let objects =
            parse_objects_inv_payload(&payload, "https://example.com/", SPHINX_OBJECTS_INV);

        assert_eq!(objects.len(), 3);
        let join = &objects[0];
        assert_eq!(join.name, "os.path.join");
        assert_eq!(join.uri, "library/os.path.html#$");
        assert_eq!(join.display_name, None);
        assert_eq!(join.specifics.get("domain"), Some("py"));
        assert_eq!(join.specifics.get("role"), Some("function"));
        assert_eq!(join.specifics.get("priority"), Some("1"));

        let pathlike = &objects[2];
        assert_eq!(pathlike.display_name.as_deref(), Some("path-like object"));
        assert_eq!(pathlike.expanded_uri(), "library/os.html#os.PathLike");
    }

    #[test]
    fn test_dash_dispname_inherits_name() {
        let bytes = build_objects_inv(&["os py:module 0 library/os.html#module-$ -"]);
        let payload = decompress_objects_inv(&bytes).unwrap();
        let objects =
            parse_objects_inv_payload(&payload, "https://example.com/", SPHINX_OBJECTS_INV);
        assert_eq!(objects[0].display_name, None);
        assert_eq!(objects[0].display(), "os");
        assert_eq!(objects[0].expanded_uri(), "library/os.html#module-os");
    }

    #[test]
    fn test_names_with_spaces_parse() {
        let bytes = build_objects_inv(&["The Module Index std:label -1 py-modindex.html -"]);
        let payload = decompress_objects_inv(&bytes).unwrap();
        let objects =
            parse_objects_inv_payload(&payload, "https://example.com/", SPHINX_OBJECTS_INV);
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].name, "The Module Index");
        assert_eq!(objects[0].specifics.get("role"), Some("label"));
        assert_eq!(objects[0].specifics.get("priority"), Some("-1"));
    }

    #[test]
    fn test_missing_header_is_malformed() {
        let result = decompress_objects_inv(b"# Sphinx inventory version 1\nwhatever");
        assert!(matches!(result, Err(Error::InventoryMalformed(_))));
    }

    #[test]
    fn test_corrupt_zlib_is_malformed() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"# Sphinx inventory version 2\n# P\n# V\n# zlib\n");
        bytes.extend_from_slice(b"this is not zlib data");
        assert!(matches!(
            decompress_objects_inv(&bytes),
            Err(Error::InventoryMalformed(_))
        ));
    }

    #[tokio::test]
    async fn test_detect_and_load_from_local_fixture() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("objects.inv"),
            build_objects_inv(&["os.path.join py:function 1 library/os.path.html#$ -"]),
        )
        .unwrap();

        let proxy = CacheProxy::new(&crate::config::Config::default()).unwrap();
        let source = dir.path().to_string_lossy().to_string();
        let processor = processor();

        let detection = processor.detect(&proxy, &source).await.unwrap().unwrap();
        assert!(detection.confidence >= 0.5);
        assert_eq!(detection.inventory_type, SPHINX_OBJECTS_INV);

        let objects = processor.load_inventory(&proxy, &detection).await.unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].name, "os.path.join");
    }

    #[tokio::test]
    async fn test_detect_absent_artifact_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let proxy = CacheProxy::new(&crate::config::Config::default()).unwrap();
        let source = dir.path().to_string_lossy().to_string();
        let detection = processor().detect(&proxy, &source).await.unwrap();
        assert!(detection.is_none());
    }
}
