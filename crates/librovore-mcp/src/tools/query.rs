//! Tool implementations mapping MCP calls onto the query engine.
//!
//! Every handler returns JSON: the rendered result on success, a rendered
//! `ErrorResponse` on failure. Failures are payload, not protocol errors.

use std::collections::BTreeMap;

use librovore_core::query::{ContentQueryOptions, InventoryQueryOptions};
use librovore_core::{Librovore, MatchMode, ProcessorGenus, Render};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const fn default_true() -> bool {
    true
}

/// Parameters for the `query_inventory` tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueryInventoryParams {
    /// Documentation site URL or local path.
    pub source: String,
    /// Search term matched against object names.
    pub term: String,
    /// Attribute filters, e.g. `{"domain": "py", "role": "function"}`.
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
    /// Match mode: "exact", "regex", or "fuzzy" (default).
    #[serde(default)]
    pub match_mode: Option<String>,
    /// Fuzzy threshold in 0-100.
    #[serde(default)]
    pub fuzzy_threshold: Option<u8>,
    /// Maximum results to return.
    #[serde(default)]
    pub results_max: Option<usize>,
    /// Return attribute distributions instead of objects.
    #[serde(default)]
    pub summarize: bool,
    /// Attributes to group the summary by.
    #[serde(default)]
    pub group_by: Vec<String>,
    /// Include display-only internals in the response.
    #[serde(default)]
    pub reveal_internals: bool,
}

/// Parameters for the `query_content` tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueryContentParams {
    /// Documentation site URL or local path.
    pub source: String,
    /// Search term matched against object names.
    pub term: String,
    /// Attribute filters.
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
    /// Match mode: "exact", "regex", or "fuzzy" (default).
    #[serde(default)]
    pub match_mode: Option<String>,
    /// Fuzzy threshold in 0-100.
    #[serde(default)]
    pub fuzzy_threshold: Option<u8>,
    /// Maximum results to return.
    #[serde(default)]
    pub results_max: Option<usize>,
    /// Attach query-ranked excerpts to documents.
    #[serde(default = "default_true")]
    pub include_snippets: bool,
    /// Include display-only internals in the response.
    #[serde(default)]
    pub reveal_internals: bool,
}

/// Parameters for the `detect` tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DetectParams {
    /// Documentation site URL or local path.
    pub source: String,
    /// Restrict to one genus: "inventory" or "structure".
    #[serde(default)]
    pub genus: Option<String>,
}

/// Parameters for the `survey_processors` tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SurveyProcessorsParams {}

fn parse_match_mode(raw: Option<&str>) -> librovore_core::Result<MatchMode> {
    raw.map_or(Ok(MatchMode::Fuzzy), str::parse)
}

fn error_json(error: &librovore_core::Error) -> Value {
    librovore_core::ErrorResponse::from(error).render_as_json(false)
}

/// Handle a `query_inventory` call.
pub async fn handle_query_inventory(engine: &Librovore, params: QueryInventoryParams) -> Value {
    let match_mode = match parse_match_mode(params.match_mode.as_deref()) {
        Ok(mode) => mode,
        Err(e) => return error_json(&e),
    };
    let options = InventoryQueryOptions {
        filters: params.filters,
        match_mode,
        fuzzy_threshold: params.fuzzy_threshold,
        results_max: params.results_max,
        summarize: params.summarize,
        group_by: params.group_by,
    };
    let outcome = engine
        .with_query_timeout(engine.query_inventory(&params.source, &params.term, options))
        .await;
    match outcome {
        Ok(result) => result.render_as_json(params.reveal_internals),
        Err(e) => error_json(&e),
    }
}

/// Handle a `query_content` call.
pub async fn handle_query_content(engine: &Librovore, params: QueryContentParams) -> Value {
    let match_mode = match parse_match_mode(params.match_mode.as_deref()) {
        Ok(mode) => mode,
        Err(e) => return error_json(&e),
    };
    let options = ContentQueryOptions {
        filters: params.filters,
        match_mode,
        fuzzy_threshold: params.fuzzy_threshold,
        results_max: params.results_max,
        include_snippets: params.include_snippets,
    };
    let outcome = engine
        .with_query_timeout(engine.query_content(&params.source, &params.term, options))
        .await;
    match outcome {
        Ok(result) => result.render_as_json(params.reveal_internals),
        Err(e) => error_json(&e),
    }
}

/// Handle a `detect` call.
pub async fn handle_detect(engine: &Librovore, params: DetectParams) -> Value {
    let genus = match params.genus.as_deref() {
        None => None,
        Some("inventory") => Some(ProcessorGenus::Inventory),
        Some("structure") => Some(ProcessorGenus::Structure),
        Some(other) => {
            return error_json(&librovore_core::Error::SourceInvalid(format!(
                "unknown genus '{other}' (expected 'inventory' or 'structure')"
            )));
        },
    };
    match engine.detect(&params.source, genus).await {
        Ok(result) => result.render_as_json(false),
        Err(e) => error_json(&e),
    }
}

/// Handle a `survey_processors` call.
pub fn handle_survey_processors(engine: &Librovore, _params: &SurveyProcessorsParams) -> Value {
    engine.survey_processors().render_as_json(false)
}
