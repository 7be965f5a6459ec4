//! Error types and handling for librovore-core operations.
//!
//! This module provides one error type covering every failure in the query
//! pipeline. Errors are categorized for easier handling, carry context about
//! recoverability for retry logic, and expose a user-facing suggestion string
//! that surfaces through [`crate::results::ErrorResponse`] at the outermost
//! boundary.
//!
//! ## Error Categories
//!
//! - **Input validation**: bad sources, unsupported filters, bad match modes
//! - **Availability**: no processor recognized a source, or the selected
//!   inventory and structure processors cannot work together
//! - **Extraction quality**: extraction produced nothing meaningful
//! - **I/O**: HTTP failures, robots denial, content-type mismatches
//! - **Extension**: install and registration failures
//!
//! Internal layers propagate `Result<T, Error>` with `?`; only the CLI and
//! MCP boundaries reify errors into response values.

use thiserror::Error;

use crate::types::ProcessorGenus;

/// The main error type for librovore-core operations.
///
/// All public functions in librovore-core return `Result<T, Error>` for
/// consistent error handling. The error type includes automatic conversion
/// from common standard library errors and provides additional metadata for
/// error handling logic.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation failed.
    ///
    /// Covers filesystem reads for `file:` sources, extension cache
    /// directories, and configuration files. The underlying `std::io::Error`
    /// is preserved to maintain detailed error information.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport-level network failure or timeout.
    ///
    /// The request never produced an HTTP status: connection refused, DNS
    /// failure, TLS negotiation error, or a timeout. Typically recoverable.
    #[error("Network failure for '{url}': {cause}")]
    Network {
        /// URL being fetched when the failure occurred.
        url: String,
        /// Transport-level cause, flattened to text so the error is cacheable.
        cause: String,
    },

    /// The server answered with a non-success HTTP status.
    #[error("HTTP {status} for '{url}'")]
    HttpStatus {
        /// Status code returned by the server.
        status: u16,
        /// URL that produced the status.
        url: String,
    },

    /// robots.txt forbids fetching this URL with the configured user-agent.
    #[error("Access disallowed by robots.txt: '{url}'")]
    AccessDisallowed {
        /// URL that robots rules denied.
        url: String,
    },

    /// Retrieved content has a MIME type outside the text allow-list.
    #[error("Invalid content type '{actual}' for '{url}'")]
    ContentTypeInvalid {
        /// URL that was retrieved.
        url: String,
        /// The `Content-Type` the server reported.
        actual: String,
    },

    /// The source string could not be understood as a URL or path.
    #[error("Invalid source: {0}")]
    SourceInvalid(String),

    /// A filter key is not supported by the selected inventory processor.
    #[error("Filter '{filter}' is not supported by processor '{processor}'")]
    FilterUnsupported {
        /// The offending filter key.
        filter: String,
        /// Name of the processor whose capabilities were consulted.
        processor: String,
    },

    /// The requested match mode could not be constructed.
    ///
    /// Covers malformed regular expressions and out-of-range fuzzy
    /// thresholds.
    #[error("Invalid match mode: {0}")]
    MatchModeInvalid(String),

    /// No registered processor of the requested genus recognized the source.
    #[error("No {genus} processor recognized '{probed_source}'")]
    ProcessorUnavailable {
        /// The normalized source that was probed.
        probed_source: String,
        /// Which processor genus was being detected.
        genus: ProcessorGenus,
    },

    /// The detected inventory format is not supported by the detected
    /// structure processor.
    #[error(
        "Inventory type '{inventory_type}' is not supported by structure processor '{structure_processor}'"
    )]
    ProcessorIncompatible {
        /// Inventory type tag produced by inventory detection.
        inventory_type: String,
        /// Name of the structure processor that was selected.
        structure_processor: String,
    },

    /// Content extraction produced no meaningful documents at all.
    #[error("Structure processor '{processor}' extracted no meaningful content from '{probed_source}'")]
    StructureIncompatible {
        /// The source whose pages were fetched.
        probed_source: String,
        /// The structure processor that ran.
        processor: String,
    },

    /// Too few objects yielded meaningful content.
    #[error("Content extraction succeeded for only {success_rate:.0}% of objects")]
    ContentExtractFailure {
        /// Percentage of requested objects that produced meaningful content.
        success_rate: f64,
    },

    /// An inventory artifact exists but could not be parsed.
    ///
    /// Covers corrupt `objects.inv` payloads, malformed search indices, and
    /// unparseable `all.html` listings.
    #[error("Inventory parse error: {0}")]
    InventoryMalformed(String),

    /// Installing an external extension package failed after retries.
    #[error("Failed to install extension '{package}': {cause}")]
    ExtensionInstallFailure {
        /// Package specifier that was being installed.
        package: String,
        /// Last failure observed.
        cause: String,
    },

    /// A cached extension install tree exists but its metadata is unusable.
    #[error("Extension cache for '{package}' is corrupt")]
    ExtensionCacheCorrupt {
        /// Package specifier whose cache entry failed validation.
        package: String,
    },

    /// A processor could not be registered.
    ///
    /// The registration function was missing, or the processor name was
    /// empty or already taken within its genus.
    #[error("Failed to register processor '{name}': {cause}")]
    ExtensionRegistrationFailure {
        /// Name of the processor or extension entry.
        name: String,
        /// Why registration was rejected.
        cause: String,
    },

    /// Configuration is invalid or inaccessible.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Operation exceeded its configured timeout.
    #[error("Timeout: {0}")]
    Timeout(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl Error {
    /// Check if the error might be recoverable through retry logic.
    ///
    /// Returns `true` for errors that are typically temporary and might
    /// succeed if the operation is retried after a delay: network transport
    /// failures, timeouts, 5xx statuses, and interrupted I/O.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout(_) => true,
            Self::HttpStatus { status, .. } => *status >= 500,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }

    /// Get the error category as a string identifier.
    ///
    /// Used for the `error_type` field of rendered error responses, for
    /// structured logging, and for CLI exit-code mapping.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Network { .. } => "network_failure",
            Self::HttpStatus { .. } => "http_request_failure",
            Self::AccessDisallowed { .. } => "access_disallowed",
            Self::ContentTypeInvalid { .. } => "content_type_invalid",
            Self::SourceInvalid(_) => "source_invalid",
            Self::FilterUnsupported { .. } => "filter_unsupported",
            Self::MatchModeInvalid(_) => "match_mode_invalid",
            Self::ProcessorUnavailable { .. } => "processor_unavailable",
            Self::ProcessorIncompatible { .. } => "processor_incompatible",
            Self::StructureIncompatible { .. } => "structure_incompatible",
            Self::ContentExtractFailure { .. } => "content_extract_failure",
            Self::InventoryMalformed(_) => "inventory_malformed",
            Self::ExtensionInstallFailure { .. } => "extension_install_failure",
            Self::ExtensionCacheCorrupt { .. } => "extension_cache_corrupt",
            Self::ExtensionRegistrationFailure { .. } => "extension_registration_failure",
            Self::Config(_) => "config",
            Self::Serialization(_) => "serialization",
            Self::Timeout(_) => "timeout",
        }
    }

    /// Actionable hint for the user, rendered alongside the error message.
    ///
    /// Every category carries one so tool-calling agents receive something
    /// they can act on rather than an opaque failure.
    #[must_use]
    pub fn suggestion(&self) -> String {
        match self {
            Self::Io(_) => "Check that the path exists and is readable".to_string(),
            Self::Network { .. } | Self::Timeout(_) => {
                "The failure may be transient; retry after a short delay".to_string()
            },
            Self::HttpStatus { status, .. } if *status == 404 => {
                "Check the source URL; use `detect` to see which artifacts were probed".to_string()
            },
            Self::HttpStatus { .. } => {
                "The server rejected the request; verify the source URL is a documentation site"
                    .to_string()
            },
            Self::AccessDisallowed { .. } => {
                "The site's robots.txt denies automated access for this user-agent; \
                 configure a different user-agent only if you have permission"
                    .to_string()
            },
            Self::ContentTypeInvalid { .. } => {
                "The URL does not serve text content; point at the documentation site root"
                    .to_string()
            },
            Self::SourceInvalid(_) => {
                "Provide an http(s) URL or a local filesystem path".to_string()
            },
            Self::FilterUnsupported { processor, .. } => format!(
                "Run `survey-processors` to list filters supported by '{processor}'"
            ),
            Self::MatchModeInvalid(_) => {
                "Use one of: exact, regex, fuzzy (threshold 0-100)".to_string()
            },
            Self::ProcessorUnavailable { genus, .. } => format!(
                "No {genus} processor matched; run `detect` against the site root, \
                 or install an extension for this documentation generator"
            ),
            Self::ProcessorIncompatible { inventory_type, .. } => format!(
                "Install or enable a structure processor supporting '{inventory_type}', \
                 or use `query-inventory` which needs no structure processor"
            ),
            Self::StructureIncompatible { .. } | Self::ContentExtractFailure { .. } => {
                "Extracted content was mostly empty; this may indicate an incompatible \
                 theme or documentation structure - try `detect` to inspect"
                    .to_string()
            },
            Self::InventoryMalformed(_) => {
                "The inventory artifact exists but could not be parsed; the site may \
                 publish a partial or corrupt inventory"
                    .to_string()
            },
            Self::ExtensionInstallFailure { .. } => {
                "Check the package specifier and network access, then retry".to_string()
            },
            Self::ExtensionCacheCorrupt { package } => format!(
                "Delete the cached install tree for '{package}' and retry"
            ),
            Self::ExtensionRegistrationFailure { .. } => {
                "Verify the extension exposes a registration function and a unique name"
                    .to_string()
            },
            Self::Config(_) => {
                "Check the configuration file syntax against the documented schema".to_string()
            },
            Self::Serialization(_) => {
                "The data did not match the expected format; re-run with --reveal-internals"
                    .to_string()
            },
        }
    }
}

/// Convenience type alias for `std::result::Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
