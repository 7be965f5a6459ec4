//! Core data structures for the query pipeline.
//!
//! This module defines the fundamental types shared across processors and the
//! orchestrator: inventory objects and their processor-specific metadata,
//! extracted content documents, processor genera, and capability
//! declarations.
//!
//! ## Serialization
//!
//! All types implement `Serialize`/`Deserialize` so results can round-trip
//! through JSON for tool-calling consumers.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Which family of work a processor performs.
///
/// Every processor belongs to exactly one genus; detection runs per genus
/// with an independent cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessorGenus {
    /// Parses a machine-readable inventory into [`InventoryObject`] values.
    Inventory,
    /// Fetches and parses rendered HTML pages for matched objects.
    Structure,
}

impl fmt::Display for ProcessorGenus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inventory => write!(f, "inventory"),
            Self::Structure => write!(f, "structure"),
        }
    }
}

/// One entry from a documentation site's inventory.
///
/// Constructed by inventory processors at inventory-load time; lives for the
/// duration of a query. Two objects with identical
/// `(inventory_type, location_base, name, uri)` are equal, which makes
/// duplicate entries within one load idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryObject {
    /// Fully-qualified identifier, e.g. `os.path.join` or `Vec::push`.
    pub name: String,

    /// Relative path from the site root to the page or fragment.
    ///
    /// May contain a `$` placeholder (or a trailing `#$` anchor placeholder)
    /// that expands to the object's name; see [`InventoryObject::expanded_uri`].
    pub uri: String,

    /// Tag identifying the inventory format this entry came from,
    /// e.g. `sphinx_objects_inv` or `rustdoc`.
    pub inventory_type: String,

    /// Base URL the inventory was loaded from, kept for attribution.
    pub location_base: String,

    /// Human-readable alternative when different from `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Processor-specific metadata used for filtering and display.
    pub specifics: InventorySpecifics,
}

impl PartialEq for InventoryObject {
    fn eq(&self, other: &Self) -> bool {
        self.inventory_type == other.inventory_type
            && self.location_base == other.location_base
            && self.name == other.name
            && self.uri == other.uri
    }
}

impl Eq for InventoryObject {}

impl InventoryObject {
    /// The `uri` with `$` placeholders expanded to the object name.
    #[must_use]
    pub fn expanded_uri(&self) -> String {
        if self.uri.contains('$') {
            self.uri.replace('$', &self.name)
        } else {
            self.uri.clone()
        }
    }

    /// Anchor fragment of the expanded URI, when one is present.
    #[must_use]
    pub fn anchor(&self) -> Option<String> {
        let expanded = self.expanded_uri();
        expanded.split_once('#').map(|(_, frag)| frag.to_string())
    }

    /// Name shown to humans: `display_name` when set, else `name`.
    #[must_use]
    pub fn display(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}

/// Processor-specific metadata attached to an inventory object.
///
/// Closed at the processor level; the `Generic` variant carries metadata for
/// externally-registered formats with no dedicated variant. Filter values
/// are compared as strings across all variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum InventorySpecifics {
    /// Sphinx `objects.inv` metadata.
    Sphinx {
        /// Sphinx domain, e.g. `py` or `std`.
        domain: String,
        /// Role within the domain, e.g. `function`, `class`, `method`.
        role: String,
        /// Search priority recorded in the inventory (`1` default, `-1` hidden).
        priority: String,
    },
    /// Rustdoc item metadata.
    Rustdoc {
        /// Normalized item kind: `struct`, `enum`, `trait`, `function`,
        /// `method`, `macro`, `module`, `constant`, or `type_alias`.
        item_type: String,
    },
    /// Pydoctor search-index metadata.
    Pydoctor {
        /// Fully-qualified dotted name as indexed by Lunr.
        qname: String,
    },
    /// MkDocs search-index metadata.
    MkDocs {
        /// Whether the entry is a `page` or an anchored `section`.
        role: String,
    },
    /// Open key/value metadata for externally-registered formats.
    Generic(BTreeMap<String, String>),
}

impl InventorySpecifics {
    /// Look up a metadata attribute by filter key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        match self {
            Self::Sphinx {
                domain,
                role,
                priority,
            } => match key {
                "domain" => Some(domain),
                "role" => Some(role),
                "priority" => Some(priority),
                _ => None,
            },
            Self::Rustdoc { item_type } => (key == "item_type").then_some(item_type.as_str()),
            Self::Pydoctor { qname } => (key == "qname").then_some(qname.as_str()),
            Self::MkDocs { role } => (key == "role").then_some(role.as_str()),
            Self::Generic(map) => map.get(key).map(String::as_str),
        }
    }

    /// Whether the attribute named `key` equals `value`.
    #[must_use]
    pub fn matches(&self, key: &str, value: &str) -> bool {
        self.get(key) == Some(value)
    }

    /// All attributes as `(key, value)` pairs, in stable order.
    #[must_use]
    pub fn entries(&self) -> Vec<(&str, &str)> {
        match self {
            Self::Sphinx {
                domain,
                role,
                priority,
            } => vec![
                ("domain", domain.as_str()),
                ("priority", priority.as_str()),
                ("role", role.as_str()),
            ],
            Self::Rustdoc { item_type } => vec![("item_type", item_type.as_str())],
            Self::Pydoctor { qname } => vec![("qname", qname.as_str())],
            Self::MkDocs { role } => vec![("role", role.as_str())],
            Self::Generic(map) => map.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect(),
        }
    }

    /// Markdown fragment describing the metadata, one line.
    #[must_use]
    pub fn render_markdown(&self) -> String {
        self.entries()
            .iter()
            .map(|(k, v)| format!("{k}: {v}"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// JSON mapping of the metadata attributes.
    #[must_use]
    pub fn render_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .entries()
            .into_iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
            .collect();
        serde_json::Value::Object(map)
    }
}

/// Extracted content for one matched inventory object.
///
/// A document is *meaningful* when its signature or description is
/// non-empty; the orchestrator validates extraction quality against that
/// predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentDocument {
    /// Identifier mirrored from the originating inventory object.
    pub name: String,
    /// URI mirrored from the originating inventory object (expanded).
    pub uri: String,
    /// Inventory type tag mirrored from the originating object.
    pub inventory_type: String,
    /// Absolute URL where a human reads this documentation.
    pub documentation_url: String,
    /// Rendered declaration: function prototype, class header, item decl.
    pub signature: String,
    /// Prose body converted to Markdown.
    pub description: String,
    /// Query-ranked excerpt from the description, when snippets are enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_snippet: Option<String>,
    /// Content-aware relevance in `[0.0, 1.0]`.
    pub relevance_score: f64,
}

impl ContentDocument {
    /// Whether the document carries any extracted content.
    #[must_use]
    pub fn is_meaningful(&self) -> bool {
        !self.signature.trim().is_empty() || !self.description.trim().is_empty()
    }
}

/// Content extraction features a structure processor can provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentFeature {
    /// Extracts rendered declarations.
    Signatures,
    /// Extracts prose descriptions.
    Descriptions,
    /// Extracts fenced code examples.
    CodeExamples,
    /// Preserves cross-reference links.
    CrossReferences,
    /// Extracts argument lists.
    Arguments,
    /// Extracts return-value documentation.
    Returns,
    /// Extracts attribute documentation.
    Attributes,
}

/// What an inventory processor can do, declared before any work happens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryCapabilities {
    /// Attribute names on which filtering is allowed.
    pub supported_filters: BTreeSet<String>,
}

impl InventoryCapabilities {
    /// Capabilities allowing filtering on the given attribute names.
    #[must_use]
    pub fn with_filters(filters: &[&str]) -> Self {
        Self {
            supported_filters: filters.iter().map(|f| (*f).to_string()).collect(),
        }
    }
}

/// What a structure processor can do, declared before any work happens.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructureCapabilities {
    /// Inventory type tags this processor can extract content for.
    pub supported_inventory_types: BTreeSet<String>,
    /// Extraction features offered.
    pub content_extraction_features: BTreeSet<ContentFeature>,
    /// Bias in `[0, 1]` per inventory type, used to break detection ties.
    pub confidence_by_inventory_type: BTreeMap<String, f64>,
}

impl StructureCapabilities {
    /// Whether the processor can extract content for `inventory_type`.
    #[must_use]
    pub fn supports_inventory_type(&self, inventory_type: &str) -> bool {
        self.supported_inventory_types.contains(inventory_type)
    }

    /// Tie-break bias for the given inventory type, zero when undeclared.
    #[must_use]
    pub fn bias_for(&self, inventory_type: &str) -> f64 {
        self.confidence_by_inventory_type
            .get(inventory_type)
            .copied()
            .unwrap_or(0.0)
    }
}
