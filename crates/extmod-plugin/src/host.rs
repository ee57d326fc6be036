//! Module host: wires the settings store, registry and dispatcher together.

use std::sync::Arc;

use tracing::info;

use extmod_core::config::{HooksConfig, SettingsConfig};
use extmod_core::result::AppResult;
use extmod_core::traits::{AdminNotifier, PermissionSource, SettingsRepository};
use extmod_core::types::id::ProjectId;

use crate::hooks::context::RequestScope;
use crate::hooks::definitions::{DispatchOutcome, HookArgs};
use crate::hooks::dispatcher::HookDispatcher;
use crate::loader::ModuleLoader;
use crate::permissions::ManifestPermissions;
use crate::registry::ModuleRegistry;
use crate::settings::{ModuleSettings, SettingsStore};

/// Entry point the surrounding application holds.
#[derive(Debug)]
pub struct ModuleHost {
    store: Arc<SettingsStore>,
    registry: Arc<ModuleRegistry>,
    dispatcher: Arc<HookDispatcher>,
}

impl ModuleHost {
    /// Creates a host granting hooks from module manifests.
    pub fn new(
        settings: SettingsConfig,
        hooks: HooksConfig,
        repository: Arc<dyn SettingsRepository>,
        loader: Arc<dyn ModuleLoader>,
        notifier: Arc<dyn AdminNotifier>,
    ) -> Self {
        let permissions = Arc::new(ManifestPermissions::new(
            loader.clone(),
            hooks.permission_alias_prefix.clone(),
        ));
        Self::with_permissions(settings, hooks, repository, loader, permissions, notifier)
    }

    /// Creates a host with a custom permission source.
    pub fn with_permissions(
        settings: SettingsConfig,
        hooks: HooksConfig,
        repository: Arc<dyn SettingsRepository>,
        loader: Arc<dyn ModuleLoader>,
        permissions: Arc<dyn PermissionSource>,
        notifier: Arc<dyn AdminNotifier>,
    ) -> Self {
        info!(
            lock_timeout_ms = settings.lock_timeout_ms,
            recursion_sensitive = ?hooks.recursion_sensitive,
            "Module host initialized"
        );

        let store = Arc::new(SettingsStore::new(repository, settings));
        let registry = Arc::new(ModuleRegistry::new(store.clone(), loader.clone()));
        let dispatcher = Arc::new(HookDispatcher::new(
            hooks,
            store.clone(),
            registry.clone(),
            loader,
            permissions,
            notifier,
        ));

        Self {
            store,
            registry,
            dispatcher,
        }
    }

    /// Opens a request scope for `project`, or a system scope for `None`.
    pub fn request(&self, project: Option<ProjectId>) -> RequestScope {
        RequestScope::new(project)
    }

    /// Dispatches `hook` within `scope`.
    pub async fn dispatch(
        &self,
        scope: &RequestScope,
        hook: &str,
        args: HookArgs,
    ) -> AppResult<DispatchOutcome> {
        self.dispatcher.dispatch(scope, hook, args).await
    }

    /// Runs the cron hook once in a system scope.
    ///
    /// The host schedules nothing itself; callers poll.
    pub async fn poll_cron(&self) -> AppResult<DispatchOutcome> {
        let scope = RequestScope::system();
        let hook = self.dispatcher.config().cron_hook.clone();
        let outcome = self.dispatcher.dispatch(&scope, &hook, HookArgs::none()).await?;
        info!(
            hook = %hook,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "Cron poll completed"
        );
        Ok(outcome)
    }

    /// Settings handle for `prefix` in the given scope.
    pub fn module_settings(&self, prefix: &str, project: Option<ProjectId>) -> ModuleSettings {
        self.store.for_module(prefix, project)
    }

    /// Returns the settings store.
    pub fn store(&self) -> &Arc<SettingsStore> {
        &self.store
    }

    /// Returns the module registry.
    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    /// Returns the hook dispatcher.
    pub fn dispatcher(&self) -> &Arc<HookDispatcher> {
        &self.dispatcher
    }
}
