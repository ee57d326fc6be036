//! Shared test helpers for integration tests.

#![allow(dead_code)]

use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use extmod_core::config::{HooksConfig, SettingsConfig};
use extmod_core::result::AppResult;
use extmod_core::traits::AdminNotifier;
use extmod_core::types::manifest::ModuleManifest;
use extmod_database::MemorySettingsRepository;
use extmod_plugin::{HookCall, HookHandler, HookOutcome, ModuleHost, ModuleInstance, StaticModuleLoader};

/// One recorded operator notification.
#[derive(Debug, Clone)]
pub struct Notification {
    pub subject: String,
    pub body: String,
    pub prefix: Option<String>,
}

/// Notifier that keeps every notification for inspection.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl AdminNotifier for RecordingNotifier {
    async fn notify(&self, subject: &str, body: &str, prefix: Option<&str>) {
        self.sent.lock().unwrap().push(Notification {
            subject: subject.to_string(),
            body: body.to_string(),
            prefix: prefix.map(str::to_string),
        });
    }
}

/// Synchronous handler built from a closure.
pub struct FnHandler<F> {
    f: F,
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnHandler")
    }
}

#[async_trait]
impl<F> HookHandler for FnHandler<F>
where
    F: Fn(&HookCall<'_>) -> AppResult<HookOutcome> + Send + Sync,
{
    async fn handle(&self, call: &HookCall<'_>) -> AppResult<HookOutcome> {
        (self.f)(call)
    }
}

/// Wraps a closure as a hook handler.
pub fn handler<F>(f: F) -> Arc<dyn HookHandler>
where
    F: Fn(&HookCall<'_>) -> AppResult<HookOutcome> + Send + Sync + 'static,
{
    Arc::new(FnHandler { f })
}

/// Ordered log shared between handlers.
#[derive(Debug, Default, Clone)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|e| *e == event).count()
    }
}

/// A host over in-memory storage and compiled-in modules.
pub struct TestHost {
    pub host: ModuleHost,
    pub repo: Arc<MemorySettingsRepository>,
    pub loader: Arc<StaticModuleLoader>,
    pub notifier: Arc<RecordingNotifier>,
}

impl TestHost {
    pub fn new() -> Self {
        Self::with_config(SettingsConfig::default(), HooksConfig::default())
    }

    pub fn with_config(settings: SettingsConfig, hooks: HooksConfig) -> Self {
        let repo = Arc::new(MemorySettingsRepository::new());
        let loader = Arc::new(StaticModuleLoader::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let host = ModuleHost::new(settings, hooks, repo.clone(), loader.clone(), notifier.clone());
        Self {
            host,
            repo,
            loader,
            notifier,
        }
    }

    /// Registers `manifest`, installs it system-wide and enables it by
    /// default.
    pub async fn install<F>(&self, manifest: ModuleManifest, factory: F)
    where
        F: Fn() -> ModuleInstance + Send + Sync + 'static,
    {
        let prefix = manifest.prefix.clone();
        let version = manifest.version.clone();
        self.loader.register(manifest, factory);
        let registry = self.host.registry();
        registry.enable_module(&prefix, &version).await.unwrap();
        registry.set_enabled_by_default(&prefix, true).await.unwrap();
    }

    /// Installs a module granted `hook` whose handler for it is `handler`.
    pub async fn install_handler(&self, prefix: &str, hook: &str, handler: Arc<dyn HookHandler>) {
        let manifest = ModuleManifest::new(prefix, "1.0.0", prefix).with_permission(hook);
        let hook = hook.to_string();
        self.install(manifest, move || ModuleInstance::new().on(hook.clone(), handler.clone()))
            .await;
    }
}
