//! Configuration management for the query engine.
//!
//! Configuration is stored in TOML and controls cache TTLs and bounds, robots
//! behavior, detection tuning, matching defaults, request limits, and the
//! extension lists that populate the processor registries.
//!
//! ## File Location
//!
//! Searched in order:
//!
//! 1. `$LIBROVORE_CONFIG` when set
//! 2. the platform config directory (e.g. `~/.config/librovore/config.toml`)
//!
//! A missing file yields defaults; a malformed file is an error.
//!
//! ## Example
//!
//! ```toml
//! [cache.content]
//! success-ttl = 300
//! error-ttl = 60
//! network-error-ttl = 10
//! max-memory-bytes = 33554432
//!
//! [cache.robots]
//! ttl = 86400
//! user-agent = "librovore/1.0"
//!
//! [[inventory-extensions]]
//! name = "sphinx"
//! enabled = true
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variable naming an explicit configuration file.
pub const CONFIG_ENV_VAR: &str = "LIBROVORE_CONFIG";

const fn default_success_ttl() -> u64 {
    300
}

const fn default_error_ttl() -> u64 {
    60
}

const fn default_network_error_ttl() -> u64 {
    10
}

const fn default_content_max_bytes() -> usize {
    32 * 1024 * 1024
}

const fn default_probe_entries_max() -> usize {
    1000
}

const fn default_robots_ttl() -> u64 {
    86_400
}

const fn default_robots_entries_max() -> usize {
    500
}

const fn default_robots_timeout() -> f64 {
    5.0
}

fn default_user_agent() -> String {
    concat!("librovore/", env!("CARGO_PKG_VERSION")).to_string()
}

const fn default_detection_ttl() -> u64 {
    3600
}

const fn default_confidence_floor() -> f64 {
    0.5
}

const fn default_base_weight() -> f64 {
    0.4
}

const fn default_signal_weight() -> f64 {
    0.2
}

const fn default_fuzzy_threshold() -> u8 {
    50
}

const fn default_probe_timeout() -> u64 {
    10
}

const fn default_retrieve_timeout() -> u64 {
    30
}

const fn default_per_host_concurrency() -> usize {
    8
}

const fn default_results_max() -> usize {
    5
}

const fn default_install_ttl_hours() -> u64 {
    7 * 24
}

const fn default_install_retries() -> u32 {
    3
}

const fn enabled_true() -> bool {
    true
}

/// Settings for the byte-bounded content cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ContentCacheConfig {
    /// Seconds a successful retrieval stays servable.
    pub success_ttl: u64,
    /// Seconds a client-error outcome (4xx, missing file) stays servable.
    pub error_ttl: u64,
    /// Seconds a transport failure stays servable before a retry is allowed.
    pub network_error_ttl: u64,
    /// Upper bound on total cached payload bytes.
    pub max_memory_bytes: usize,
}

impl Default for ContentCacheConfig {
    fn default() -> Self {
        Self {
            success_ttl: default_success_ttl(),
            error_ttl: default_error_ttl(),
            network_error_ttl: default_network_error_ttl(),
            max_memory_bytes: default_content_max_bytes(),
        }
    }
}

/// Settings for the entry-bounded probe cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ProbeCacheConfig {
    /// Seconds a successful probe stays servable.
    pub success_ttl: u64,
    /// Seconds a client-error probe stays servable.
    pub error_ttl: u64,
    /// Seconds a transport failure stays servable.
    pub network_error_ttl: u64,
    /// Upper bound on cached probe entries.
    pub entries_max: usize,
}

impl Default for ProbeCacheConfig {
    fn default() -> Self {
        Self {
            success_ttl: default_success_ttl(),
            error_ttl: default_error_ttl(),
            network_error_ttl: default_network_error_ttl(),
            entries_max: default_probe_entries_max(),
        }
    }
}

/// Settings for per-origin robots.txt handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RobotsConfig {
    /// Seconds a parsed robots.txt stays servable.
    pub ttl: u64,
    /// Upper bound on cached origins.
    pub entries_max: usize,
    /// Timeout in seconds for fetching robots.txt itself.
    pub request_timeout: f64,
    /// User-agent consulted against robots rules and sent on every request.
    pub user_agent: String,
}

impl Default for RobotsConfig {
    fn default() -> Self {
        Self {
            ttl: default_robots_ttl(),
            entries_max: default_robots_entries_max(),
            request_timeout: default_robots_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Cache settings grouped by cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CacheConfig {
    /// Content cache settings.
    pub content: ContentCacheConfig,
    /// Probe cache settings.
    pub probe: ProbeCacheConfig,
    /// Robots cache settings.
    pub robots: RobotsConfig,
}

/// Detection tuning.
///
/// The confidence weights are empirical constants with no derivation; they
/// are configuration, not invariants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DetectionConfig {
    /// Seconds a detection outcome stays cached per source.
    pub cache_ttl: u64,
    /// Detections below this confidence are rejected outright.
    pub confidence_floor: f64,
    /// Confidence granted by a processor's primary artifact.
    pub base_weight: f64,
    /// Confidence added per corroborating signal.
    pub signal_weight: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            cache_ttl: default_detection_ttl(),
            confidence_floor: default_confidence_floor(),
            base_weight: default_base_weight(),
            signal_weight: default_signal_weight(),
        }
    }
}

/// Name matching defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct MatchingConfig {
    /// When `true`, exact mode requires strict name equality instead of
    /// substring containment.
    pub exact_strict: bool,
    /// Default fuzzy threshold in `[0, 100]`.
    pub fuzzy_threshold: u8,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            exact_strict: false,
            fuzzy_threshold: default_fuzzy_threshold(),
        }
    }
}

/// Request and query limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct LimitsConfig {
    /// Per-request timeout in seconds for probes.
    pub probe_timeout: u64,
    /// Per-request timeout in seconds for retrievals.
    pub retrieve_timeout: u64,
    /// Optional whole-query soft timeout in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_timeout: Option<u64>,
    /// Maximum concurrent requests per host.
    pub per_host_concurrency: usize,
    /// Default result page size.
    pub results_max: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            probe_timeout: default_probe_timeout(),
            retrieve_timeout: default_retrieve_timeout(),
            query_timeout: None,
            per_host_concurrency: default_per_host_concurrency(),
            results_max: default_results_max(),
        }
    }
}

/// Installer invocation and cache settings for external extensions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ExtensionsConfig {
    /// Root directory for cached install trees; platform cache dir when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_root: Option<PathBuf>,
    /// Installer argv prefix; the package specifier and target directory are
    /// appended. Empty means external extensions cannot be installed.
    pub installer: Vec<String>,
    /// Hours a cached install tree stays valid.
    pub install_ttl_hours: u64,
    /// Install attempts before giving up.
    pub install_retries: u32,
}

impl Default for ExtensionsConfig {
    fn default() -> Self {
        Self {
            cache_root: None,
            installer: Vec::new(),
            install_ttl_hours: default_install_ttl_hours(),
            install_retries: default_install_retries(),
        }
    }
}

/// One configured extension entry.
///
/// An entry with a `package` specifier is *external* and goes through the
/// installer; an entry without one is *intrinsic* and resolves against the
/// built-in registrar table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExtensionEntry {
    /// Registration name; must be unique within its genus.
    pub name: String,
    /// Disabled entries are skipped entirely.
    #[serde(default = "enabled_true")]
    pub enabled: bool,
    /// Package specifier for external extensions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    /// Arguments forwarded to the registration function.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub arguments: BTreeMap<String, toml::Value>,
}

impl ExtensionEntry {
    /// An enabled intrinsic entry with no arguments.
    #[must_use]
    pub fn intrinsic(name: &str) -> Self {
        Self {
            name: name.to_string(),
            enabled: true,
            package: None,
            arguments: BTreeMap::new(),
        }
    }

    /// Whether this entry requires an installed package.
    #[must_use]
    pub const fn is_external(&self) -> bool {
        self.package.is_some()
    }
}

/// Global configuration for the query engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    /// Cache settings.
    pub cache: CacheConfig,
    /// Detection tuning.
    pub detection: DetectionConfig,
    /// Name matching defaults.
    pub matching: MatchingConfig,
    /// Request and query limits.
    pub limits: LimitsConfig,
    /// Installer and install-cache settings.
    pub extensions: ExtensionsConfig,
    /// Inventory processor extension list.
    pub inventory_extensions: Vec<ExtensionEntry>,
    /// Structure processor extension list.
    pub structure_extensions: Vec<ExtensionEntry>,
}

impl Default for Config {
    fn default() -> Self {
        let builtin = ["sphinx", "mkdocs", "rustdoc", "pydoctor"];
        Self {
            cache: CacheConfig::default(),
            detection: DetectionConfig::default(),
            matching: MatchingConfig::default(),
            limits: LimitsConfig::default(),
            extensions: ExtensionsConfig::default(),
            inventory_extensions: builtin.iter().map(|n| ExtensionEntry::intrinsic(n)).collect(),
            structure_extensions: builtin.iter().map(|n| ExtensionEntry::intrinsic(n)).collect(),
        }
    }
}

impl Config {
    /// Load configuration from the default location or create with defaults.
    ///
    /// # Errors
    ///
    /// Returns an error when an explicitly named file is missing, or when a
    /// file exists but contains invalid TOML or invalid values.
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Self::load_from(Path::new(&path));
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from an explicit file path.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read '{}': {e}", path.display()))
        })?;
        let config: Self = toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("invalid '{}': {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Platform default path for the configuration file, when resolvable.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "librovore", "librovore")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Platform default root for the extension install cache.
    #[must_use]
    pub fn default_extension_cache_root() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "librovore", "librovore")
            .map(|dirs| dirs.cache_dir().join("extensions"))
    }

    /// Validate value ranges that serde cannot express.
    fn validate(&self) -> Result<()> {
        if self.matching.fuzzy_threshold > 100 {
            return Err(Error::Config(format!(
                "matching.fuzzy-threshold must be in 0..=100, got {}",
                self.matching.fuzzy_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.detection.confidence_floor) {
            return Err(Error::Config(format!(
                "detection.confidence-floor must be in [0, 1], got {}",
                self.detection.confidence_floor
            )));
        }
        if self.limits.per_host_concurrency == 0 {
            return Err(Error::Config(
                "limits.per-host-concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Probe request timeout as a [`Duration`].
    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.limits.probe_timeout)
    }

    /// Retrieve request timeout as a [`Duration`].
    #[must_use]
    pub const fn retrieve_timeout(&self) -> Duration {
        Duration::from_secs(self.limits.retrieve_timeout)
    }

    /// Whole-query soft timeout as a [`Duration`], when configured.
    #[must_use]
    pub fn query_timeout(&self) -> Option<Duration> {
        self.limits.query_timeout.map(Duration::from_secs)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.cache.content.success_ttl, 300);
        assert_eq!(config.cache.content.error_ttl, 60);
        assert_eq!(config.cache.content.network_error_ttl, 10);
        assert_eq!(config.cache.content.max_memory_bytes, 33_554_432);
        assert_eq!(config.cache.probe.entries_max, 1000);
        assert_eq!(config.cache.robots.ttl, 86_400);
        assert_eq!(config.detection.cache_ttl, 3600);
        assert_eq!(config.matching.fuzzy_threshold, 50);
        assert_eq!(config.limits.per_host_concurrency, 8);
        assert_eq!(config.limits.results_max, 5);
    }

    #[test]
    fn test_builtin_extensions_enabled_by_default() {
        let config = Config::default();
        let names: Vec<&str> = config
            .inventory_extensions
            .iter()
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(names, vec!["sphinx", "mkdocs", "rustdoc", "pydoctor"]);
        assert!(config.inventory_extensions.iter().all(|e| e.enabled));
        assert!(config.structure_extensions.iter().all(|e| !e.is_external()));
    }

    #[test]
    fn test_parse_documented_example() {
        let raw = r#"
[cache.content]
success-ttl = 120
max-memory-bytes = 1048576

[cache.robots]
user-agent = "librovore/1.0"

[matching]
exact-strict = true

[[inventory-extensions]]
name = "sphinx"
enabled = true

[[structure-extensions]]
name = "mkdocs"
enabled = true
package = "my-vendor-docs>=1.0"
arguments = { foo = "bar" }
"#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.cache.content.success_ttl, 120);
        assert_eq!(config.cache.content.max_memory_bytes, 1_048_576);
        // Unset keys within a present section fall back to defaults.
        assert_eq!(config.cache.content.error_ttl, 60);
        assert!(config.matching.exact_strict);
        assert_eq!(config.inventory_extensions.len(), 1);
        let external = &config.structure_extensions[0];
        assert!(external.is_external());
        assert_eq!(
            external.arguments.get("foo").and_then(toml::Value::as_str),
            Some("bar")
        );
    }

    #[test]
    fn test_validation_rejects_out_of_range_values() {
        let mut config = Config::default();
        config.matching.fuzzy_threshold = 101;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.detection.confidence_floor = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.limits.per_host_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::load_from(&dir.path().join("nope.toml"));
        assert!(matches!(result, Err(crate::error::Error::Config(_))));
    }

    #[test]
    fn test_load_from_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = Config::default();
        std::fs::write(&path, toml::to_string(&config).unwrap()).unwrap();
        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.cache.content.success_ttl, config.cache.content.success_ttl);
        assert_eq!(loaded.inventory_extensions.len(), config.inventory_extensions.len());
    }
}
