//! Module loading: manifests and per-version hook handler tables.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::info;

use extmod_core::error::AppError;
use extmod_core::result::AppResult;
use extmod_core::types::manifest::ModuleManifest;

use crate::hooks::definitions::HookHandler;

/// Hook handlers of one instantiated module version, keyed by hook name.
///
/// The table is fixed when the module is instantiated; the dispatcher never
/// probes a module for a handler at call time.
#[derive(Debug, Default, Clone)]
pub struct ModuleInstance {
    handlers: HashMap<String, Arc<dyn HookHandler>>,
}

impl ModuleInstance {
    /// Creates an instance without handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the handler for `hook`, replacing any previous one.
    pub fn on(mut self, hook: impl Into<String>, handler: Arc<dyn HookHandler>) -> Self {
        self.handlers.insert(hook.into(), handler);
        self
    }

    /// Returns the handler for `hook`, if the module implements it.
    pub fn handler(&self, hook: &str) -> Option<Arc<dyn HookHandler>> {
        self.handlers.get(hook).cloned()
    }

    /// Names of every hook this instance handles.
    pub fn hooks(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

/// Locates module versions and builds their handler tables.
#[async_trait]
pub trait ModuleLoader: Send + Sync + fmt::Debug + 'static {
    /// Reads the manifest shipped with `prefix` at `version`.
    async fn manifest(&self, prefix: &str, version: &str) -> AppResult<ModuleManifest>;

    /// Builds the handler table for `prefix` at `version`.
    async fn instantiate(&self, prefix: &str, version: &str) -> AppResult<ModuleInstance>;
}

type Factory = Arc<dyn Fn() -> ModuleInstance + Send + Sync>;

struct Registration {
    manifest: ModuleManifest,
    factory: Factory,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("manifest", &self.manifest)
            .field("factory", &"<factory>")
            .finish()
    }
}

/// Loader for modules compiled into the host binary.
#[derive(Debug, Default)]
pub struct StaticModuleLoader {
    /// `(prefix, version)` → registration.
    modules: DashMap<(String, String), Registration>,
}

impl StaticModuleLoader {
    /// Creates an empty loader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a module version. `factory` runs once per instantiation.
    pub fn register<F>(&self, manifest: ModuleManifest, factory: F)
    where
        F: Fn() -> ModuleInstance + Send + Sync + 'static,
    {
        info!(
            prefix = %manifest.prefix,
            version = %manifest.version,
            namespace = %manifest.namespace,
            "Module registered"
        );
        self.modules.insert(
            (manifest.prefix.clone(), manifest.version.clone()),
            Registration {
                manifest,
                factory: Arc::new(factory),
            },
        );
    }

    /// Number of registered module versions.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Returns whether no module is registered.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    fn missing(prefix: &str, version: &str) -> AppError {
        AppError::not_found(format!("Module '{prefix}' version '{version}' is not available"))
    }
}

#[async_trait]
impl ModuleLoader for StaticModuleLoader {
    async fn manifest(&self, prefix: &str, version: &str) -> AppResult<ModuleManifest> {
        self.modules
            .get(&(prefix.to_string(), version.to_string()))
            .map(|entry| entry.manifest.clone())
            .ok_or_else(|| Self::missing(prefix, version))
    }

    async fn instantiate(&self, prefix: &str, version: &str) -> AppResult<ModuleInstance> {
        let factory = self
            .modules
            .get(&(prefix.to_string(), version.to_string()))
            .map(|entry| entry.factory.clone())
            .ok_or_else(|| Self::missing(prefix, version))?;
        Ok(factory())
    }
}
