//! CLI structure and argument parsing.
//!
//! Subcommands map one-to-one onto the query-orchestrator entry points; the
//! CLI itself stays a thin caller. Shared flags control output format,
//! color, internals exposure, and the configuration file.
//!
//! ```bash
//! librovore query-inventory https://docs.python.org/3 os.path.join \
//!     --filter domain=py --filter role=function --match-mode exact
//! librovore query-content https://docs.rs/regex escape --results-max 3
//! librovore detect https://docs.python.org/3 --genus inventory
//! librovore survey-processors --format json
//! librovore serve
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Parse one `key=value` filter argument.
fn parse_filter(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| format!("'{raw}' is not a key=value filter"))
}

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable Markdown.
    #[default]
    Markdown,
    /// Machine-readable JSON.
    Json,
}

/// Name match mode flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum MatchModeArg {
    /// Substring containment (strict equality when configured).
    Exact,
    /// Regular expression.
    Regex,
    /// Partial-ratio fuzzy matching.
    #[default]
    Fuzzy,
}

impl From<MatchModeArg> for librovore_core::MatchMode {
    fn from(arg: MatchModeArg) -> Self {
        match arg {
            MatchModeArg::Exact => Self::Exact,
            MatchModeArg::Regex => Self::Regex,
            MatchModeArg::Fuzzy => Self::Fuzzy,
        }
    }
}

/// Processor genus flag for `detect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GenusArg {
    /// Inventory processors only.
    Inventory,
    /// Structure processors only.
    Structure,
}

impl From<GenusArg> for librovore_core::ProcessorGenus {
    fn from(arg: GenusArg) -> Self {
        match arg {
            GenusArg::Inventory => Self::Inventory,
            GenusArg::Structure => Self::Structure,
        }
    }
}

/// MCP transport flag for `serve`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum TransportArg {
    /// JSON-RPC over stdin/stdout.
    #[default]
    Stdio,
    /// Server-sent events (not yet supported).
    Sse,
    /// Stdio framing over a TCP listener (not yet supported).
    StdioOverTcp,
}

/// Main CLI structure for the `librovore` command.
#[derive(Parser, Clone, Debug)]
#[command(name = "librovore")]
#[command(version)]
#[command(about = "librovore - query structured documentation sites", long_about = None)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Commands,

    /// Output format.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Markdown)]
    pub format: OutputFormat,

    /// Force colorized output.
    #[arg(long, global = true, conflicts_with = "no_color")]
    pub color: bool,

    /// Disable colorized output.
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Include display-only internals in rendered output.
    #[arg(long, global = true)]
    pub reveal_internals: bool,

    /// Configuration file path (overrides LIBROVORE_CONFIG).
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

/// Query and introspection subcommands.
#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Search a site's inventory of API objects.
    QueryInventory {
        /// Documentation site URL or local path.
        source: String,
        /// Search term matched against object names.
        term: String,
        /// Attribute filter, repeatable: `--filter domain=py`.
        #[arg(long = "filter", value_parser = parse_filter, value_name = "KEY=VALUE")]
        filters: Vec<(String, String)>,
        /// Name match mode.
        #[arg(long, value_enum, default_value_t = MatchModeArg::Fuzzy)]
        match_mode: MatchModeArg,
        /// Fuzzy threshold in 0-100.
        #[arg(long, value_name = "N")]
        fuzzy_threshold: Option<u8>,
        /// Maximum results to show.
        #[arg(long, value_name = "N")]
        results_max: Option<usize>,
        /// Show attribute distributions instead of objects.
        #[arg(long)]
        summarize: bool,
        /// Attribute to group the summary by, repeatable.
        #[arg(long = "group-by", value_name = "ATTR")]
        group_by: Vec<String>,
    },

    /// Search a site and extract the matched objects' documentation.
    QueryContent {
        /// Documentation site URL or local path.
        source: String,
        /// Search term matched against object names.
        term: String,
        /// Attribute filter, repeatable: `--filter domain=py`.
        #[arg(long = "filter", value_parser = parse_filter, value_name = "KEY=VALUE")]
        filters: Vec<(String, String)>,
        /// Name match mode.
        #[arg(long, value_enum, default_value_t = MatchModeArg::Fuzzy)]
        match_mode: MatchModeArg,
        /// Fuzzy threshold in 0-100.
        #[arg(long, value_name = "N")]
        fuzzy_threshold: Option<u8>,
        /// Maximum results to show.
        #[arg(long, value_name = "N")]
        results_max: Option<usize>,
        /// Attach query-ranked excerpts (default).
        #[arg(long, overrides_with = "no_include_snippets")]
        include_snippets: bool,
        /// Skip snippet extraction.
        #[arg(long)]
        no_include_snippets: bool,
    },

    /// Probe a source and report processor detections.
    Detect {
        /// Documentation site URL or local path.
        source: String,
        /// Restrict detection to one genus.
        #[arg(long, value_enum)]
        genus: Option<GenusArg>,
    },

    /// List registered processors and their capabilities.
    SurveyProcessors,

    /// Run the MCP tool server.
    Serve {
        /// Transport to serve on.
        #[arg(long, value_enum, default_value_t = TransportArg::Stdio)]
        transport: TransportArg,
        /// Listener port for network transports.
        #[arg(long, value_name = "N")]
        port: Option<u16>,
    },
}
