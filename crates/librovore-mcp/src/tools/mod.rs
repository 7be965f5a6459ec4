//! MCP tools for librovore.

pub mod query;

pub use query::{
    DetectParams, QueryContentParams, QueryInventoryParams, SurveyProcessorsParams,
    handle_detect, handle_query_content, handle_query_inventory, handle_survey_processors,
};
