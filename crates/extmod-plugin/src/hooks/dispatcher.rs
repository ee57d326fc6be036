//! Hook dispatcher: invokes one hook on every enabled module.
//!
//! A dispatch moves through these stages:
//! - Resolve the modules enabled for the request's project.
//! - Invoke each permitted module's handler in registry order. Errors and
//!   panics are contained per module.
//! - Re-run delayed modules while the delay queue keeps shrinking, then
//!   give what remains one last pass on which delays are refused.
//! - Resolve the recorded results into one value.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use futures::FutureExt;
use tracing::{debug, error, info, warn};

use extmod_core::config::HooksConfig;
use extmod_core::result::AppResult;
use extmod_core::traits::{AdminNotifier, PermissionSource};

use super::context::{HookCall, RequestScope, lock};
use super::definitions::{DispatchOutcome, HookArgs, HookOutcome, is_recordable};
use super::runner::HookRunner;
use crate::loader::{ModuleInstance, ModuleLoader};
use crate::registry::ModuleRegistry;
use crate::settings::SettingsStore;

/// Borrowed state shared by every invocation of one dispatch.
struct Pass<'a> {
    scope: &'a RequestScope,
    runner: &'a Mutex<HookRunner>,
    hook: &'a str,
    args: &'a HookArgs,
}

/// Dispatches hooks to module handlers.
#[derive(Debug)]
pub struct HookDispatcher {
    config: HooksConfig,
    store: Arc<SettingsStore>,
    registry: Arc<ModuleRegistry>,
    loader: Arc<dyn ModuleLoader>,
    permissions: Arc<dyn PermissionSource>,
    notifier: Arc<dyn AdminNotifier>,
    /// `(prefix, version)` → handler table.
    instances: DashMap<(String, String), Arc<ModuleInstance>>,
}

impl HookDispatcher {
    /// Creates a dispatcher.
    pub fn new(
        config: HooksConfig,
        store: Arc<SettingsStore>,
        registry: Arc<ModuleRegistry>,
        loader: Arc<dyn ModuleLoader>,
        permissions: Arc<dyn PermissionSource>,
        notifier: Arc<dyn AdminNotifier>,
    ) -> Self {
        Self {
            config,
            store,
            registry,
            loader,
            permissions,
            notifier,
            instances: DashMap::new(),
        }
    }

    /// Returns the settings store handlers write through.
    pub fn store(&self) -> &Arc<SettingsStore> {
        &self.store
    }

    /// Returns the module registry.
    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    /// Returns the dispatch policy.
    pub fn config(&self) -> &HooksConfig {
        &self.config
    }

    /// Dispatches `hook` to the modules enabled for `scope`.
    ///
    /// Handler failures never fail the dispatch; only errors resolving the
    /// enabled module set do.
    pub async fn dispatch(
        &self,
        scope: &RequestScope,
        hook: &str,
        args: HookArgs,
    ) -> AppResult<DispatchOutcome> {
        if self.config.is_recursion_sensitive(hook) && scope.is_dispatching(hook) {
            debug!(hook = %hook, "Suppressing recursive dispatch");
            let mut outcome = DispatchOutcome::empty(hook);
            outcome.suppressed = true;
            return Ok(outcome);
        }

        let modules = self.resolve_modules(scope, hook).await?;

        let runner = Mutex::new(HookRunner::new(hook));
        let _active = scope.enter(hook);
        let pass = Pass {
            scope,
            runner: &runner,
            hook,
            args: &args,
        };

        debug!(
            hook = %hook,
            project = ?scope.project().map(|p| p.get()),
            modules = modules.len(),
            "Dispatching hook"
        );

        let mut results = Vec::new();
        self.run_pass(&pass, &modules, &mut results).await;

        let mut previous = modules.len();
        let mut queued = lock(pass.runner).take_delayed();
        while !queued.is_empty() && queued.len() < previous {
            debug!(hook = %hook, delayed = queued.len(), "Re-running delayed modules");
            previous = queued.len();
            self.run_pass(&pass, &queued, &mut results).await;
            queued = lock(pass.runner).take_delayed();
        }

        lock(pass.runner).begin_last_run();
        if !queued.is_empty() {
            debug!(hook = %hook, delayed = queued.len(), "Running last pass for delayed modules");
            self.run_pass(&pass, &queued, &mut results).await;
        }

        let (started_at, elapsed, exit_requested) = {
            let runner = lock(pass.runner);
            (runner.started_at(), runner.elapsed(), runner.exit_requested())
        };
        if exit_requested {
            scope.request_exit();
        }

        let responders = results.iter().map(|(prefix, _)| prefix.clone()).collect();
        let result = self.resolve_result(hook, results).await;
        self.check_slow(hook, elapsed).await;

        Ok(DispatchOutcome {
            hook: hook.to_string(),
            result,
            responders,
            exit_requested,
            suppressed: false,
            started_at,
            elapsed,
        })
    }

    /// Enabled modules for the scope, minus modules that did not opt in to
    /// every-page hooks when this is one on a system page.
    async fn resolve_modules(
        &self,
        scope: &RequestScope,
        hook: &str,
    ) -> AppResult<Vec<(String, String)>> {
        let enabled = self.registry.enabled_for(scope.project()).await?;
        let system_every_page = scope.project().is_none() && self.config.is_every_page(hook);

        let mut modules = Vec::with_capacity(enabled.len());
        for (prefix, version) in enabled {
            if system_every_page {
                match self.loader.manifest(&prefix, &version).await {
                    Ok(manifest) if manifest.every_page_hooks_on_system_pages => {}
                    Ok(_) => {
                        debug!(hook = %hook, prefix = %prefix, "Module skips every-page hooks on system pages");
                        continue;
                    }
                    Err(e) => {
                        warn!(hook = %hook, prefix = %prefix, version = %version, error = %e, "Module manifest unavailable");
                        continue;
                    }
                }
            }
            modules.push((prefix, version));
        }
        Ok(modules)
    }

    async fn run_pass(
        &self,
        pass: &Pass<'_>,
        modules: &[(String, String)],
        results: &mut Vec<(String, serde_json::Value)>,
    ) {
        for (prefix, version) in modules {
            self.invoke_module(pass, prefix, version, results).await;
        }
    }

    async fn invoke_module(
        &self,
        pass: &Pass<'_>,
        prefix: &str,
        version: &str,
        results: &mut Vec<(String, serde_json::Value)>,
    ) {
        let hook = pass.hook;
        if !self.permissions.has_capability(prefix, version, hook).await {
            debug!(hook = %hook, prefix = %prefix, "Module lacks permission for hook");
            return;
        }

        let instance = match self.instance(prefix, version).await {
            Ok(instance) => instance,
            Err(e) => {
                self.report_fault(hook, prefix, version, &e.to_string()).await;
                return;
            }
        };
        let Some(handler) = instance.handler(hook) else {
            return;
        };

        let call = HookCall {
            dispatcher: self,
            scope: pass.scope,
            runner: pass.runner,
            prefix,
            version,
            hook,
            args: pass.args,
        };

        match AssertUnwindSafe(handler.handle(&call)).catch_unwind().await {
            Ok(Ok(HookOutcome::Return(Some(value)))) => {
                if is_recordable(&value) {
                    results.push((prefix.to_string(), value));
                }
            }
            Ok(Ok(HookOutcome::Return(None))) => {}
            Ok(Ok(HookOutcome::Delayed)) => {
                if !lock(pass.runner).delay(prefix, version) {
                    warn!(hook = %hook, prefix = %prefix, "Module delayed on the last pass and did not run");
                }
            }
            Ok(Ok(HookOutcome::Exit)) => {
                debug!(hook = %hook, prefix = %prefix, "Module requested exit after hook");
                lock(pass.runner).request_exit();
            }
            Ok(Err(e)) => self.report_fault(hook, prefix, version, &e.to_string()).await,
            Err(panic) => {
                self.report_fault(hook, prefix, version, &panic_message(panic.as_ref()))
                    .await
            }
        }
    }

    /// Returns the cached handler table, instantiating it on first use.
    async fn instance(&self, prefix: &str, version: &str) -> AppResult<Arc<ModuleInstance>> {
        let key = (prefix.to_string(), version.to_string());
        if let Some(instance) = self.instances.get(&key) {
            return Ok(instance.clone());
        }

        let instance = Arc::new(self.loader.instantiate(prefix, version).await?);
        info!(
            prefix = %prefix,
            version = %version,
            hooks = instance.hooks().count(),
            "Module instantiated"
        );
        self.instances.insert(key, instance.clone());
        Ok(instance)
    }

    async fn resolve_result(
        &self,
        hook: &str,
        mut results: Vec<(String, serde_json::Value)>,
    ) -> Option<serde_json::Value> {
        if results.len() <= 1 {
            return results.pop().map(|(_, value)| value);
        }

        if self.config.is_recursion_sensitive(hook) {
            let all = results
                .iter()
                .filter_map(|(_, value)| value.as_bool())
                .all(|ok| ok);
            return Some(serde_json::Value::Bool(all));
        }

        let responders = results
            .iter()
            .map(|(prefix, _)| prefix.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        warn!(
            hook = %hook,
            responders = %responders,
            "Multiple modules returned a value; only the last one is used"
        );
        self.notifier
            .notify(
                "Conflicting module hook results",
                &format!(
                    "Modules {responders} each returned a value for hook '{hook}'. \
                     Only the value from the last module was used."
                ),
                None,
            )
            .await;
        results.pop().map(|(_, value)| value)
    }

    async fn report_fault(&self, hook: &str, prefix: &str, version: &str, message: &str) {
        error!(
            hook = %hook,
            prefix = %prefix,
            version = %version,
            error = %message,
            "Module hook handler failed"
        );
        self.notifier
            .notify(
                "Module hook failure",
                &format!("Module '{prefix}' ({version}) failed while running hook '{hook}': {message}"),
                Some(prefix),
            )
            .await;
    }

    async fn check_slow(&self, hook: &str, elapsed: Duration) {
        let limit = Duration::from_millis(self.config.slow_dispatch_warning_ms);
        if elapsed <= limit {
            return;
        }
        warn!(
            hook = %hook,
            elapsed_ms = elapsed.as_millis() as u64,
            limit_ms = self.config.slow_dispatch_warning_ms,
            "Slow hook dispatch"
        );
        self.notifier
            .notify(
                "Slow module hook",
                &format!(
                    "Hook '{hook}' took {}ms across all modules",
                    elapsed.as_millis()
                ),
                None,
            )
            .await;
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}
