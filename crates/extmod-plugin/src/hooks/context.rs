//! Request scope and the per-invocation view handed to handlers.

use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;

use extmod_core::result::AppResult;
use extmod_core::types::id::ProjectId;

use super::definitions::{DispatchOutcome, HookArgs};
use super::dispatcher::HookDispatcher;
use super::runner::HookRunner;
use crate::settings::ModuleSettings;

/// Locks `mutex`, recovering the data if a panicking handler poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct ScopeState {
    /// Hooks dispatching in this request, outermost first.
    active_hooks: Vec<String>,
    exit_requested: bool,
}

/// Context of one request to the host.
///
/// Carries the project the request runs for and tracks which hooks are
/// currently dispatching, so nested dispatches from inside handlers can be
/// detected and unwound.
#[derive(Debug, Default)]
pub struct RequestScope {
    project: Option<ProjectId>,
    state: Mutex<ScopeState>,
}

impl RequestScope {
    /// Scope for `project`, or a system scope for `None`.
    pub fn new(project: Option<ProjectId>) -> Self {
        Self {
            project,
            state: Mutex::default(),
        }
    }

    /// System (non-project) scope.
    pub fn system() -> Self {
        Self::new(None)
    }

    /// Project of this request.
    pub fn project(&self) -> Option<ProjectId> {
        self.project
    }

    /// Innermost hook currently dispatching in this request, if any.
    pub fn active_hook(&self) -> Option<String> {
        lock(&self.state).active_hooks.last().cloned()
    }

    /// Returns whether `hook` is dispatching at any nesting level.
    pub fn is_dispatching(&self, hook: &str) -> bool {
        lock(&self.state).active_hooks.iter().any(|h| h == hook)
    }

    /// Returns whether any handler asked to end this request.
    pub fn exit_requested(&self) -> bool {
        lock(&self.state).exit_requested
    }

    pub(crate) fn request_exit(&self) {
        lock(&self.state).exit_requested = true;
    }

    /// Marks `hook` as dispatching until the returned guard drops.
    pub(crate) fn enter(&self, hook: &str) -> ActiveHookGuard<'_> {
        let mut state = lock(&self.state);
        state.active_hooks.push(hook.to_string());
        ActiveHookGuard {
            scope: self,
            depth: state.active_hooks.len() - 1,
        }
    }
}

/// Pops the hook it guards, and anything nested above it, on drop.
pub(crate) struct ActiveHookGuard<'a> {
    scope: &'a RequestScope,
    depth: usize,
}

impl Drop for ActiveHookGuard<'_> {
    fn drop(&mut self) {
        lock(&self.scope.state).active_hooks.truncate(self.depth);
    }
}

/// One module's view of the hook invocation it is handling.
#[derive(Debug)]
pub struct HookCall<'a> {
    pub(crate) dispatcher: &'a HookDispatcher,
    pub(crate) scope: &'a RequestScope,
    pub(crate) runner: &'a Mutex<HookRunner>,
    pub(crate) prefix: &'a str,
    pub(crate) version: &'a str,
    pub(crate) hook: &'a str,
    pub(crate) args: &'a HookArgs,
}

impl HookCall<'_> {
    /// Prefix of the module being invoked.
    pub fn prefix(&self) -> &str {
        self.prefix
    }

    /// Version of the module being invoked.
    pub fn version(&self) -> &str {
        self.version
    }

    /// Name of the hook being dispatched.
    pub fn hook(&self) -> &str {
        self.hook
    }

    /// Arguments of the dispatch.
    pub fn args(&self) -> &HookArgs {
        self.args
    }

    /// Project of the request, or `None` on system pages.
    pub fn project(&self) -> Option<ProjectId> {
        self.scope.project()
    }

    /// Returns whether this is the final pass, on which delays are refused.
    pub fn is_last_run(&self) -> bool {
        lock(self.runner).is_last_run()
    }

    /// Asks to run this module again after the others.
    ///
    /// Returns `true` if the delay was accepted; the handler should then
    /// return [`HookOutcome::Delayed`](super::definitions::HookOutcome::Delayed)
    /// without doing its work. Returns `false` on the final pass, where the
    /// handler must run to completion.
    pub fn delay_module_execution(&self) -> bool {
        lock(self.runner).delay(self.prefix, self.version)
    }

    /// Settings of the invoked module, bound to the request's project.
    pub fn settings(&self) -> ModuleSettings {
        self.dispatcher
            .store()
            .for_module(self.prefix, self.scope.project())
    }

    /// Dispatches another hook from inside this handler.
    pub fn dispatch<'b>(
        &'b self,
        hook: &'b str,
        args: HookArgs,
    ) -> BoxFuture<'b, AppResult<DispatchOutcome>> {
        Box::pin(self.dispatcher.dispatch(self.scope, hook, args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enter_restores_previous_hook() {
        let scope = RequestScope::new(Some(ProjectId::new(3)));
        assert_eq!(scope.active_hook(), None);

        {
            let _outer = scope.enter("email");
            assert_eq!(scope.active_hook().as_deref(), Some("email"));
            {
                let _inner = scope.enter("save_record");
                assert_eq!(scope.active_hook().as_deref(), Some("save_record"));
                assert!(scope.is_dispatching("email"));
                assert!(scope.is_dispatching("save_record"));
            }
            assert_eq!(scope.active_hook().as_deref(), Some("email"));
            assert!(!scope.is_dispatching("save_record"));
        }

        assert_eq!(scope.active_hook(), None);
        assert!(!scope.is_dispatching("email"));
        assert_eq!(scope.project(), Some(ProjectId::new(3)));
    }
}
