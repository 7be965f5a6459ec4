//! Extension manager: populate the processor registries.
//!
//! Configuration lists extension entries per genus. Intrinsic entries (no
//! `package`) resolve against the registrar table; external entries are
//! installed by an installer subprocess into a content-addressed cache
//! (`<cache-root>/<sha256(spec)>/<platform-id>/`) with bounded retries and
//! exponential backoff, their path files are processed (path-appending
//! entries only; the code-execution form is rejected), and their registrar
//! is then resolved by name.
//!
//! Registries are accretive: entries are validated on insertion (non-empty,
//! unique within genus) and never removed for the process lifetime.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::{Config, ExtensionEntry};
use crate::error::{Error, Result};
use crate::inventory::{
    InventoryProcessor, mkdocs::MkDocsInventory, pydoctor::PydoctorInventory,
    rustdoc::RustdocInventory, sphinx::SphinxInventory,
};
use crate::structure::{
    StructureProcessor, mkdocs::MkDocsStructure, pydoctor::PydoctorStructure,
    rustdoc::RustdocStructure, sphinx::SphinxStructure,
};

/// Arguments forwarded from configuration to a registrar.
pub type RegistrarArguments = BTreeMap<String, toml::Value>;

/// Builds an inventory processor from configuration.
pub type InventoryRegistrar =
    Box<dyn Fn(&Config, &RegistrarArguments) -> Arc<dyn InventoryProcessor> + Send + Sync>;

/// Builds a structure processor from configuration.
pub type StructureRegistrar =
    Box<dyn Fn(&Config, &RegistrarArguments) -> Arc<dyn StructureProcessor> + Send + Sync>;

/// The per-genus processor registries.
///
/// Written only during initialization; read lock-free afterwards.
#[derive(Default)]
pub struct ProcessorRegistry {
    inventory: Vec<Arc<dyn InventoryProcessor>>,
    structure: Vec<Arc<dyn StructureProcessor>>,
}

impl ProcessorRegistry {
    /// Insert an inventory processor, validating name uniqueness.
    pub fn register_inventory(&mut self, processor: Arc<dyn InventoryProcessor>) -> Result<()> {
        let name = processor.name().to_string();
        if name.is_empty() {
            return Err(Error::ExtensionRegistrationFailure {
                name,
                cause: "processor name is empty".to_string(),
            });
        }
        if self.inventory.iter().any(|p| p.name() == name) {
            return Err(Error::ExtensionRegistrationFailure {
                name,
                cause: "duplicate name within inventory genus".to_string(),
            });
        }
        self.inventory.push(processor);
        Ok(())
    }

    /// Insert a structure processor, validating name uniqueness.
    pub fn register_structure(&mut self, processor: Arc<dyn StructureProcessor>) -> Result<()> {
        let name = processor.name().to_string();
        if name.is_empty() {
            return Err(Error::ExtensionRegistrationFailure {
                name,
                cause: "processor name is empty".to_string(),
            });
        }
        if self.structure.iter().any(|p| p.name() == name) {
            return Err(Error::ExtensionRegistrationFailure {
                name,
                cause: "duplicate name within structure genus".to_string(),
            });
        }
        self.structure.push(processor);
        Ok(())
    }

    /// Registered inventory processors, in registration order.
    #[must_use]
    pub fn inventory(&self) -> &[Arc<dyn InventoryProcessor>] {
        &self.inventory
    }

    /// Registered structure processors, in registration order.
    #[must_use]
    pub fn structure(&self) -> &[Arc<dyn StructureProcessor>] {
        &self.structure
    }
}

/// Named registrar functions, seeded with the built-in processors.
pub struct RegistrarTable {
    inventory: BTreeMap<String, InventoryRegistrar>,
    structure: BTreeMap<String, StructureRegistrar>,
}

impl Default for RegistrarTable {
    fn default() -> Self {
        let mut table = Self {
            inventory: BTreeMap::new(),
            structure: BTreeMap::new(),
        };
        table.add_inventory("sphinx", |config, _| {
            Arc::new(SphinxInventory::new(&config.detection))
        });
        table.add_inventory("mkdocs", |config, _| {
            Arc::new(MkDocsInventory::new(&config.detection))
        });
        table.add_inventory("rustdoc", |config, _| {
            Arc::new(RustdocInventory::new(&config.detection))
        });
        table.add_inventory("pydoctor", |config, _| {
            Arc::new(PydoctorInventory::new(&config.detection))
        });
        table.add_structure("sphinx", |config, _| {
            Arc::new(SphinxStructure::new(&config.detection))
        });
        table.add_structure("mkdocs", |config, _| {
            Arc::new(MkDocsStructure::new(&config.detection))
        });
        table.add_structure("rustdoc", |config, _| {
            Arc::new(RustdocStructure::new(&config.detection))
        });
        table.add_structure("pydoctor", |config, _| {
            Arc::new(PydoctorStructure::new(&config.detection))
        });
        table
    }
}

impl RegistrarTable {
    /// Add (or replace) an inventory registrar.
    pub fn add_inventory<F>(&mut self, name: &str, registrar: F)
    where
        F: Fn(&Config, &RegistrarArguments) -> Arc<dyn InventoryProcessor>
            + Send
            + Sync
            + 'static,
    {
        self.inventory.insert(name.to_string(), Box::new(registrar));
    }

    /// Add (or replace) a structure registrar.
    pub fn add_structure<F>(&mut self, name: &str, registrar: F)
    where
        F: Fn(&Config, &RegistrarArguments) -> Arc<dyn StructureProcessor>
            + Send
            + Sync
            + 'static,
    {
        self.structure.insert(name.to_string(), Box::new(registrar));
    }
}

/// Installs external extension packages into a target directory.
#[async_trait]
pub trait ExtensionInstaller: Send + Sync {
    /// Produce an install tree for `package` under `target`.
    async fn install(&self, package: &str, target: &Path) -> Result<()>;
}

/// Installer invoking a configured command with `<package> <target>` appended.
pub struct CommandInstaller {
    argv: Vec<String>,
}

impl CommandInstaller {
    /// Build from a configured argv prefix.
    #[must_use]
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }
}

#[async_trait]
impl ExtensionInstaller for CommandInstaller {
    async fn install(&self, package: &str, target: &Path) -> Result<()> {
        let Some((program, args)) = self.argv.split_first() else {
            return Err(Error::ExtensionInstallFailure {
                package: package.to_string(),
                cause: "no installer configured (extensions.installer is empty)".to_string(),
            });
        };
        let output = tokio::process::Command::new(program)
            .args(args)
            .arg(package)
            .arg(target)
            .output()
            .await
            .map_err(|e| Error::ExtensionInstallFailure {
                package: package.to_string(),
                cause: format!("installer spawn failed: {e}"),
            })?;
        if !output.status.success() {
            return Err(Error::ExtensionInstallFailure {
                package: package.to_string(),
                cause: format!(
                    "installer exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(())
    }
}

/// Metadata persisted beside each cached install tree.
#[derive(Debug, Serialize, Deserialize)]
struct InstallMetadata {
    package_spec: String,
    installed_at: DateTime<Utc>,
    ttl_hours: u64,
    platform_id: String,
}

const METADATA_FILE: &str = ".cache_metadata.json";

fn platform_id() -> String {
    format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)
}

fn package_cache_key(package: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(package.as_bytes());
    hex::encode(hasher.finalize())
}

/// Loads configured extensions and produces the registries.
pub struct ExtensionManager {
    config: Config,
    table: RegistrarTable,
    installer: Arc<dyn ExtensionInstaller>,
    search_paths: Vec<PathBuf>,
}

impl ExtensionManager {
    /// Manager with the built-in registrar table and configured installer.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let installer = Arc::new(CommandInstaller::new(config.extensions.installer.clone()));
        Self::with_parts(config, RegistrarTable::default(), installer)
    }

    /// Manager with explicit registrars and installer.
    #[must_use]
    pub fn with_parts(
        config: Config,
        table: RegistrarTable,
        installer: Arc<dyn ExtensionInstaller>,
    ) -> Self {
        Self {
            config,
            table,
            installer,
            search_paths: Vec::new(),
        }
    }

    /// Paths contributed by installed extensions' path files.
    #[must_use]
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Load every enabled extension and build the registries.
    ///
    /// Install or registration failure of an enabled extension fails
    /// initialization; disabled entries are skipped entirely.
    pub async fn build_registry(&mut self) -> Result<ProcessorRegistry> {
        let mut registry = ProcessorRegistry::default();

        let inventory_entries = self.config.inventory_extensions.clone();
        for entry in &inventory_entries {
            if !entry.enabled {
                debug!(name = entry.name, "inventory extension disabled; skipping");
                continue;
            }
            self.prepare_external(entry).await?;
            let registrar = self.table.inventory.get(&entry.name).ok_or_else(|| {
                Error::ExtensionRegistrationFailure {
                    name: entry.name.clone(),
                    cause: "no inventory registrar with this name".to_string(),
                }
            })?;
            let processor = registrar(&self.config, &entry.arguments);
            registry.register_inventory(processor)?;
            info!(name = entry.name, "inventory processor registered");
        }

        let structure_entries = self.config.structure_extensions.clone();
        for entry in &structure_entries {
            if !entry.enabled {
                debug!(name = entry.name, "structure extension disabled; skipping");
                continue;
            }
            self.prepare_external(entry).await?;
            let registrar = self.table.structure.get(&entry.name).ok_or_else(|| {
                Error::ExtensionRegistrationFailure {
                    name: entry.name.clone(),
                    cause: "no structure registrar with this name".to_string(),
                }
            })?;
            let processor = registrar(&self.config, &entry.arguments);
            registry.register_structure(processor)?;
            info!(name = entry.name, "structure processor registered");
        }

        Ok(registry)
    }

    /// Install an external entry (cache-aware) and process its path files.
    async fn prepare_external(&mut self, entry: &ExtensionEntry) -> Result<()> {
        let Some(package) = entry.package.as_deref() else {
            return Ok(());
        };
        let tree = self.ensure_installed(package).await?;
        let mut contributed = process_path_files(&tree);
        self.search_paths.push(tree);
        self.search_paths.append(&mut contributed);
        Ok(())
    }

    fn cache_root(&self) -> Result<PathBuf> {
        self.config
            .extensions
            .cache_root
            .clone()
            .or_else(Config::default_extension_cache_root)
            .ok_or_else(|| Error::Config("no extension cache root resolvable".to_string()))
    }

    /// A valid cached install tree, or a fresh install with retries.
    async fn ensure_installed(&self, package: &str) -> Result<PathBuf> {
        let tree = self
            .cache_root()?
            .join(package_cache_key(package))
            .join(platform_id());
        let metadata_path = tree.join(METADATA_FILE);

        if metadata_path.exists() {
            match read_metadata(&metadata_path) {
                Ok(metadata) if metadata.package_spec == package => {
                    let age = Utc::now().signed_duration_since(metadata.installed_at);
                    let ttl = chrono::Duration::hours(
                        i64::try_from(metadata.ttl_hours).unwrap_or(i64::MAX),
                    );
                    if age < ttl {
                        debug!(package, tree = %tree.display(), "using cached install");
                        return Ok(tree);
                    }
                    debug!(package, "cached install expired; reinstalling");
                },
                Ok(_) | Err(_) => {
                    return Err(Error::ExtensionCacheCorrupt {
                        package: package.to_string(),
                    });
                },
            }
        }

        tokio::fs::create_dir_all(&tree).await?;
        let mut delay = Duration::from_millis(100);
        let mut last_cause = String::new();
        for attempt in 1..=self.config.extensions.install_retries.max(1) {
            match self.installer.install(package, &tree).await {
                Ok(()) => {
                    let metadata = InstallMetadata {
                        package_spec: package.to_string(),
                        installed_at: Utc::now(),
                        ttl_hours: self.config.extensions.install_ttl_hours,
                        platform_id: platform_id(),
                    };
                    let raw = serde_json::to_string_pretty(&metadata)?;
                    tokio::fs::write(&metadata_path, raw).await?;
                    info!(package, tree = %tree.display(), "extension installed");
                    return Ok(tree);
                },
                Err(e) => {
                    warn!(package, attempt, error = %e, "extension install attempt failed");
                    last_cause = e.to_string();
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                },
            }
        }
        Err(Error::ExtensionInstallFailure {
            package: package.to_string(),
            cause: last_cause,
        })
    }
}

fn read_metadata(path: &Path) -> Result<InstallMetadata> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Process `.pth`-style path files in an install tree.
///
/// Only path-appending entries are honored; lines carrying executable code
/// are rejected outright rather than gated, since external extensions are
/// untrusted.
fn process_path_files(tree: &Path) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    let Ok(entries) = std::fs::read_dir(tree) else {
        return paths;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().is_none_or(|ext| ext != "pth") {
            continue;
        }
        let Ok(contents) = std::fs::read_to_string(&path) else {
            continue;
        };
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.starts_with("import ") || line.starts_with("import\t") {
                warn!(file = %path.display(), "rejecting executable path-file entry");
                continue;
            }
            let candidate = if Path::new(line).is_absolute() {
                PathBuf::from(line)
            } else {
                tree.join(line)
            };
            if candidate.exists() {
                paths.push(candidate);
            }
        }
    }
    paths
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingInstaller {
        attempts: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl ExtensionInstaller for CountingInstaller {
        async fn install(&self, package: &str, target: &Path) -> Result<()> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.fail_first {
                return Err(Error::ExtensionInstallFailure {
                    package: package.to_string(),
                    cause: format!("simulated failure {attempt}"),
                });
            }
            std::fs::write(target.join("marker.txt"), package).unwrap();
            Ok(())
        }
    }

    fn config_with_cache_root(root: &Path) -> Config {
        let mut config = Config::default();
        config.extensions.cache_root = Some(root.to_path_buf());
        config
    }

    #[tokio::test]
    async fn test_builtin_registry_registration_order() {
        let mut manager = ExtensionManager::new(Config::default());
        let registry = manager.build_registry().await.unwrap();
        let inventory_names: Vec<&str> =
            registry.inventory().iter().map(|p| p.name()).collect();
        assert_eq!(inventory_names, vec!["sphinx", "mkdocs", "rustdoc", "pydoctor"]);
        let structure_names: Vec<&str> =
            registry.structure().iter().map(|p| p.name()).collect();
        assert_eq!(structure_names, vec!["sphinx", "mkdocs", "rustdoc", "pydoctor"]);
    }

    #[tokio::test]
    async fn test_disabled_entries_are_skipped() {
        let mut config = Config::default();
        for entry in &mut config.inventory_extensions {
            if entry.name != "sphinx" {
                entry.enabled = false;
            }
        }
        let mut manager = ExtensionManager::new(config);
        let registry = manager.build_registry().await.unwrap();
        assert_eq!(registry.inventory().len(), 1);
        assert_eq!(registry.inventory()[0].name(), "sphinx");
    }

    #[tokio::test]
    async fn test_unknown_registrar_fails_registration() {
        let mut config = Config::default();
        config
            .inventory_extensions
            .push(ExtensionEntry::intrinsic("nonexistent"));
        let mut manager = ExtensionManager::new(config);
        let result = manager.build_registry().await;
        assert!(matches!(
            result,
            Err(Error::ExtensionRegistrationFailure { name, .. }) if name == "nonexistent"
        ));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let config = Config::default();
        let mut registry = ProcessorRegistry::default();
        registry
            .register_inventory(Arc::new(SphinxInventory::new(&config.detection)))
            .unwrap();
        let result =
            registry.register_inventory(Arc::new(SphinxInventory::new(&config.detection)));
        assert!(matches!(
            result,
            Err(Error::ExtensionRegistrationFailure { .. })
        ));
    }

    #[tokio::test]
    async fn test_install_retries_then_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let installer = Arc::new(CountingInstaller {
            attempts: AtomicU32::new(0),
            fail_first: 2,
        });
        let manager = ExtensionManager::with_parts(
            config_with_cache_root(dir.path()),
            RegistrarTable::default(),
            installer.clone(),
        );

        let tree = manager.ensure_installed("vendor-docs>=1.0").await.unwrap();
        assert_eq!(installer.attempts.load(Ordering::SeqCst), 3);
        assert!(tree.join("marker.txt").exists());
        assert!(tree.join(METADATA_FILE).exists());
        assert!(tree.ends_with(platform_id()));
    }

    #[tokio::test]
    async fn test_cached_install_skips_installer() {
        let dir = tempfile::tempdir().unwrap();
        let installer = Arc::new(CountingInstaller {
            attempts: AtomicU32::new(0),
            fail_first: 0,
        });
        let manager = ExtensionManager::with_parts(
            config_with_cache_root(dir.path()),
            RegistrarTable::default(),
            installer.clone(),
        );

        manager.ensure_installed("vendor-docs>=1.0").await.unwrap();
        manager.ensure_installed("vendor-docs>=1.0").await.unwrap();
        assert_eq!(installer.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_corrupt_metadata_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let package = "vendor-docs>=1.0";
        let tree = dir
            .path()
            .join(package_cache_key(package))
            .join(platform_id());
        std::fs::create_dir_all(&tree).unwrap();
        std::fs::write(tree.join(METADATA_FILE), "{not json").unwrap();

        let manager = ExtensionManager::with_parts(
            config_with_cache_root(dir.path()),
            RegistrarTable::default(),
            Arc::new(CountingInstaller {
                attempts: AtomicU32::new(0),
                fail_first: 0,
            }),
        );
        let result = manager.ensure_installed(package).await;
        assert!(matches!(result, Err(Error::ExtensionCacheCorrupt { .. })));
    }

    #[test]
    fn test_path_files_accept_paths_reject_code() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("lib")).unwrap();
        std::fs::write(
            dir.path().join("extra.pth"),
            "# comment\nlib\nimport os; os.system('evil')\nmissing-dir\n",
        )
        .unwrap();

        let paths = process_path_files(dir.path());
        assert_eq!(paths, vec![dir.path().join("lib")]);
    }

    #[tokio::test]
    async fn test_external_entry_with_custom_registrar() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_with_cache_root(dir.path());
        config.inventory_extensions.push(ExtensionEntry {
            name: "vendor".to_string(),
            enabled: true,
            package: Some("vendor-docs>=1.0".to_string()),
            arguments: BTreeMap::new(),
        });

        let mut table = RegistrarTable::default();
        table.add_inventory("vendor", |cfg, _| Arc::new(SphinxInventoryNamed::new(cfg)));

        let mut manager = ExtensionManager::with_parts(
            config,
            table,
            Arc::new(CountingInstaller {
                attempts: AtomicU32::new(0),
                fail_first: 0,
            }),
        );
        let registry = manager.build_registry().await.unwrap();
        assert!(registry.inventory().iter().any(|p| p.name() == "vendor"));
        assert!(!manager.search_paths().is_empty());
    }

    /// Wrapper giving the sphinx implementation a distinct registry name.
    struct SphinxInventoryNamed(SphinxInventory);

    impl SphinxInventoryNamed {
        fn new(config: &Config) -> Self {
            Self(SphinxInventory::new(&config.detection))
        }
    }

    #[async_trait]
    impl InventoryProcessor for SphinxInventoryNamed {
        fn name(&self) -> &str {
            "vendor"
        }

        fn capabilities(&self) -> &crate::types::InventoryCapabilities {
            self.0.capabilities()
        }

        async fn detect(
            &self,
            proxy: &crate::retrieval::CacheProxy,
            source: &str,
        ) -> Result<Option<crate::inventory::InventoryDetection>> {
            self.0.detect(proxy, source).await
        }

        async fn load_inventory(
            &self,
            proxy: &crate::retrieval::CacheProxy,
            detection: &crate::inventory::InventoryDetection,
        ) -> Result<Vec<crate::types::InventoryObject>> {
            self.0.load_inventory(proxy, detection).await
        }
    }
}
