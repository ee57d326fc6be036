//! Module registry: installed versions and per-project enablement.
//!
//! The whole view is derived from the `version` and `enabled` settings of
//! every module, memoized, and rebuilt whenever the settings store reports a
//! new enablement generation.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use extmod_core::error::AppError;
use extmod_core::result::AppResult;
use extmod_core::types::id::ProjectId;
use extmod_core::types::setting::{KEY_ENABLED, KEY_VERSION};
use extmod_core::types::value::SettingValue;

use crate::loader::ModuleLoader;
use crate::settings::SettingsStore;

/// Snapshot of enablement facts for every module.
#[derive(Debug, Default, Clone)]
pub struct RegistryView {
    /// Store generation the view was built at.
    generation: u64,
    /// Prefix → system-wide installed version.
    installed: BTreeMap<String, String>,
    /// Prefixes enabled by default for every project.
    default_enabled: BTreeSet<String>,
    /// Project → prefix → override.
    overrides: HashMap<ProjectId, BTreeMap<String, bool>>,
}

impl RegistryView {
    /// Installed version of `prefix`.
    pub fn version(&self, prefix: &str) -> Option<&str> {
        self.installed.get(prefix).map(String::as_str)
    }

    /// Every installed module with its version.
    pub fn installed(&self) -> &BTreeMap<String, String> {
        &self.installed
    }

    /// Modules usable in `project`, or the system-wide enabled set for
    /// `None`. Ordered by prefix.
    pub fn enabled_for(&self, project: Option<ProjectId>) -> BTreeMap<String, String> {
        let mut enabled: BTreeSet<&str> =
            self.default_enabled.iter().map(String::as_str).collect();

        if let Some(overrides) = project.and_then(|p| self.overrides.get(&p)) {
            for (prefix, on) in overrides {
                if *on {
                    enabled.insert(prefix);
                } else {
                    enabled.remove(prefix.as_str());
                }
            }
        }

        enabled
            .into_iter()
            .filter_map(|prefix| {
                self.installed
                    .get(prefix)
                    .map(|version| (prefix.to_string(), version.clone()))
            })
            .collect()
    }
}

/// Resolves module versions and enabled sets.
#[derive(Debug)]
pub struct ModuleRegistry {
    store: Arc<SettingsStore>,
    loader: Arc<dyn ModuleLoader>,
    view: RwLock<Option<Arc<RegistryView>>>,
}

impl ModuleRegistry {
    /// Creates a registry reading enablement facts from `store`.
    pub fn new(store: Arc<SettingsStore>, loader: Arc<dyn ModuleLoader>) -> Self {
        Self {
            store,
            loader,
            view: RwLock::new(None),
        }
    }

    /// Returns the current view, rebuilding it if an enablement write
    /// happened since it was built.
    pub async fn view(&self) -> AppResult<Arc<RegistryView>> {
        let generation = self.store.generation();
        {
            let guard = self.view.read().await;
            if let Some(view) = guard.as_ref() {
                if view.generation == generation {
                    return Ok(view.clone());
                }
            }
        }

        let mut guard = self.view.write().await;
        if let Some(view) = guard.as_ref() {
            if view.generation == generation {
                return Ok(view.clone());
            }
        }
        let view = Arc::new(self.build_view(generation).await?);
        *guard = Some(view.clone());
        Ok(view)
    }

    /// Drops the memoized view.
    pub async fn invalidate(&self) {
        *self.view.write().await = None;
    }

    /// Installed version of `prefix`, if any.
    pub async fn resolve_version(&self, prefix: &str) -> AppResult<Option<String>> {
        Ok(self.view().await?.version(prefix).map(str::to_string))
    }

    /// Modules usable in `project` with their versions, ordered by prefix.
    ///
    /// For `None` this is the set of installed modules enabled by default.
    pub async fn enabled_for(
        &self,
        project: Option<ProjectId>,
    ) -> AppResult<BTreeMap<String, String>> {
        Ok(self.view().await?.enabled_for(project))
    }

    /// Returns whether `prefix` is usable in `project`.
    pub async fn is_enabled(&self, prefix: &str, project: Option<ProjectId>) -> AppResult<bool> {
        Ok(self.enabled_for(project).await?.contains_key(prefix))
    }

    /// Installs or upgrades `prefix` to `version` system-wide.
    ///
    /// Fails with `DuplicateNamespace` when another installed prefix carries
    /// the same module namespace.
    pub async fn enable_module(&self, prefix: &str, version: &str) -> AppResult<()> {
        let manifest = self.loader.manifest(prefix, version).await?;
        let view = self.view().await?;

        for (other, other_version) in view.installed() {
            if other == prefix {
                continue;
            }
            let other_manifest = match self.loader.manifest(other, other_version).await {
                Ok(m) => m,
                Err(e) => {
                    warn!(
                        prefix = %other,
                        version = %other_version,
                        error = %e,
                        "Installed module has no readable manifest"
                    );
                    continue;
                }
            };
            if other_manifest.namespace == manifest.namespace {
                return Err(AppError::duplicate_namespace(format!(
                    "Module '{prefix}' cannot be enabled: namespace '{}' is already used by '{other}'",
                    manifest.namespace
                )));
            }
        }

        self.store.set_system(prefix, KEY_VERSION, version).await?;
        self.invalidate().await;
        info!(prefix = %prefix, version = %version, "Module enabled");
        Ok(())
    }

    /// Uninstalls `prefix` system-wide. Project overrides are kept but have
    /// no effect without a system version.
    pub async fn disable_module(&self, prefix: &str) -> AppResult<()> {
        self.store.remove_system(prefix, KEY_VERSION).await?;
        self.invalidate().await;
        info!(prefix = %prefix, "Module disabled");
        Ok(())
    }

    /// Sets whether `prefix` is enabled for projects without an override.
    pub async fn set_enabled_by_default(&self, prefix: &str, enabled: bool) -> AppResult<()> {
        self.store.set_system(prefix, KEY_ENABLED, enabled).await?;
        self.invalidate().await;
        Ok(())
    }

    /// Enables `prefix` for `project` regardless of its default.
    pub async fn enable_for_project(&self, prefix: &str, project: ProjectId) -> AppResult<()> {
        self.store.set_project(prefix, project, KEY_ENABLED, true).await?;
        self.invalidate().await;
        Ok(())
    }

    /// Disables `prefix` for `project` regardless of its default.
    pub async fn disable_for_project(&self, prefix: &str, project: ProjectId) -> AppResult<()> {
        self.store.set_project(prefix, project, KEY_ENABLED, false).await?;
        self.invalidate().await;
        Ok(())
    }

    /// Removes the override so `project` follows the default again.
    pub async fn clear_project_override(&self, prefix: &str, project: ProjectId) -> AppResult<()> {
        self.store.remove_project(prefix, project, KEY_ENABLED).await?;
        self.invalidate().await;
        Ok(())
    }

    async fn build_view(&self, generation: u64) -> AppResult<RegistryView> {
        let rows = self.store.rows_for_keys(&[KEY_VERSION, KEY_ENABLED]).await?;
        let mut view = RegistryView {
            generation,
            ..RegistryView::default()
        };

        for row in rows {
            let setting = &row.setting;
            let value = match setting.decode() {
                Ok(value) => value,
                Err(e) => {
                    warn!(prefix = %row.prefix, key = %setting.key, error = %e, "Skipping unreadable enablement setting");
                    continue;
                }
            };

            match (setting.key.as_str(), setting.project_id, value) {
                (KEY_VERSION, None, SettingValue::String(version)) => {
                    view.installed.entry(row.prefix).or_insert(version);
                }
                (KEY_ENABLED, None, SettingValue::Bool(true)) => {
                    view.default_enabled.insert(row.prefix);
                }
                (KEY_ENABLED, Some(project), SettingValue::Bool(on)) => {
                    view.overrides
                        .entry(project)
                        .or_default()
                        .entry(row.prefix)
                        .or_insert(on);
                }
                (KEY_ENABLED, None, SettingValue::Bool(false)) | (_, _, SettingValue::Null) => {}
                (key, _, other) => {
                    warn!(
                        prefix = %row.prefix,
                        key = %key,
                        value_type = %other.type_tag(),
                        "Ignoring enablement setting with unexpected scope or type"
                    );
                }
            }
        }

        debug!(
            generation,
            installed = view.installed.len(),
            default_enabled = view.default_enabled.len(),
            projects_with_overrides = view.overrides.len(),
            "Module registry view rebuilt"
        );
        Ok(view)
    }
}

#[cfg(test)]
mod tests {
    use extmod_core::config::SettingsConfig;
    use extmod_core::error::ErrorKind;
    use extmod_core::types::manifest::ModuleManifest;
    use extmod_database::MemorySettingsRepository;

    use super::*;
    use crate::loader::{ModuleInstance, StaticModuleLoader};

    fn registry() -> (Arc<SettingsStore>, Arc<StaticModuleLoader>, ModuleRegistry) {
        let store = Arc::new(SettingsStore::new(
            Arc::new(MemorySettingsRepository::new()),
            SettingsConfig::default(),
        ));
        let loader = Arc::new(StaticModuleLoader::new());
        let registry = ModuleRegistry::new(store.clone(), loader.clone());
        (store, loader, registry)
    }

    #[tokio::test]
    async fn test_resolve_version_follows_writes() {
        let (store, _, registry) = registry();
        assert_eq!(registry.resolve_version("alpha").await.unwrap(), None);

        store.set_system("alpha", KEY_VERSION, "1.0.0").await.unwrap();
        assert_eq!(
            registry.resolve_version("alpha").await.unwrap().as_deref(),
            Some("1.0.0")
        );

        store.set_system("alpha", KEY_VERSION, "1.1.0").await.unwrap();
        assert_eq!(
            registry.resolve_version("alpha").await.unwrap().as_deref(),
            Some("1.1.0")
        );
    }

    #[tokio::test]
    async fn test_view_is_memoized_between_writes() {
        let (store, _, registry) = registry();
        store.set_system("alpha", KEY_VERSION, "1.0.0").await.unwrap();

        let first = registry.view().await.unwrap();
        let second = registry.view().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        store.set_system("alpha", "unrelated", 1).await.unwrap();
        assert!(Arc::ptr_eq(&first, &registry.view().await.unwrap()));

        store.set_system("alpha", KEY_ENABLED, true).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &registry.view().await.unwrap()));
    }

    #[tokio::test]
    async fn test_project_overrides() {
        let (store, _, registry) = registry();
        let p = ProjectId::new(1);
        store.set_system("alpha", KEY_VERSION, "1.0.0").await.unwrap();
        store.set_system("beta", KEY_VERSION, "2.0.0").await.unwrap();
        store.set_system("alpha", KEY_ENABLED, true).await.unwrap();

        let all = registry.enabled_for(Some(p)).await.unwrap();
        assert_eq!(all.keys().collect::<Vec<_>>(), vec!["alpha"]);

        registry.enable_for_project("beta", p).await.unwrap();
        registry.disable_for_project("alpha", p).await.unwrap();
        let all = registry.enabled_for(Some(p)).await.unwrap();
        assert_eq!(all.get("beta").map(String::as_str), Some("2.0.0"));
        assert!(!all.contains_key("alpha"));

        // Other projects and the system scope are unaffected.
        assert!(registry.is_enabled("alpha", Some(ProjectId::new(2))).await.unwrap());
        assert!(registry.is_enabled("alpha", None).await.unwrap());
        assert!(!registry.is_enabled("beta", None).await.unwrap());

        registry.clear_project_override("alpha", p).await.unwrap();
        assert!(registry.is_enabled("alpha", Some(p)).await.unwrap());
    }

    #[tokio::test]
    async fn test_override_without_system_version_is_unusable() {
        let (_, _, registry) = registry();
        let p = ProjectId::new(4);
        registry.enable_for_project("ghost", p).await.unwrap();
        assert!(registry.enabled_for(Some(p)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_namespace_rejected() {
        let (_, loader, registry) = registry();
        loader.register(ModuleManifest::new("mailer", "1.0.0", "mailer"), ModuleInstance::new);
        loader.register(
            ModuleManifest::new("mailer_copy", "1.0.0", "mailer"),
            ModuleInstance::new,
        );
        loader.register(ModuleManifest::new("mailer", "1.1.0", "mailer"), ModuleInstance::new);

        registry.enable_module("mailer", "1.0.0").await.unwrap();
        let err = registry.enable_module("mailer_copy", "1.0.0").await.unwrap_err();
        assert!(err.is(ErrorKind::DuplicateNamespace));
        assert_eq!(registry.resolve_version("mailer_copy").await.unwrap(), None);

        // Upgrading the same prefix is not a conflict.
        registry.enable_module("mailer", "1.1.0").await.unwrap();
        assert_eq!(
            registry.resolve_version("mailer").await.unwrap().as_deref(),
            Some("1.1.0")
        );

        registry.disable_module("mailer").await.unwrap();
        registry.enable_module("mailer_copy", "1.0.0").await.unwrap();
    }
}
