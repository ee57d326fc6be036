//! Hook handler contract and dispatch result types.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use extmod_core::result::AppResult;

use super::context::HookCall;

/// Positional arguments passed to every handler of one dispatch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HookArgs(Vec<serde_json::Value>);

impl HookArgs {
    /// No arguments.
    pub fn none() -> Self {
        Self::default()
    }

    /// Returns the argument at `index`.
    pub fn get(&self, index: usize) -> Option<&serde_json::Value> {
        self.0.get(index)
    }

    /// Number of arguments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns whether there are no arguments.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<serde_json::Value>> for HookArgs {
    fn from(values: Vec<serde_json::Value>) -> Self {
        Self(values)
    }
}

/// What a handler did with its turn.
#[derive(Debug, Clone, PartialEq)]
pub enum HookOutcome {
    /// Ran to completion, optionally producing a value.
    Return(Option<serde_json::Value>),
    /// Stopped early to run again after the other modules.
    Delayed,
    /// Ran to completion and asks the caller to end the request after the
    /// hook finishes.
    Exit,
}

impl HookOutcome {
    /// Completed without a value.
    pub fn done() -> Self {
        Self::Return(None)
    }

    /// Completed with `value`.
    pub fn value(value: impl Into<serde_json::Value>) -> Self {
        Self::Return(Some(value.into()))
    }
}

/// Returns whether a handler's return value counts as a result.
///
/// Only booleans and non-empty arrays or objects do.
pub fn is_recordable(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Bool(_) => true,
        serde_json::Value::Array(items) => !items.is_empty(),
        serde_json::Value::Object(map) => !map.is_empty(),
        _ => false,
    }
}

/// A module's hook implementation.
#[async_trait]
pub trait HookHandler: Send + Sync + std::fmt::Debug {
    /// Handles one invocation.
    ///
    /// To run after the other modules, call
    /// [`HookCall::delay_module_execution`] and return
    /// [`HookOutcome::Delayed`] if it returned `true`.
    async fn handle(&self, call: &HookCall<'_>) -> AppResult<HookOutcome>;
}

/// Result of dispatching one hook.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutcome {
    /// Hook name.
    pub hook: String,
    /// Resolved result, if any module produced one.
    pub result: Option<serde_json::Value>,
    /// Modules that produced a result, in the order they produced it.
    pub responders: Vec<String>,
    /// Whether a handler asked to end the request after this hook.
    pub exit_requested: bool,
    /// Whether the recursion guard suppressed the dispatch.
    pub suppressed: bool,
    /// When the dispatch started.
    pub started_at: DateTime<Utc>,
    /// Wall time spent dispatching.
    pub elapsed: Duration,
}

impl DispatchOutcome {
    /// An outcome for a dispatch that invoked nothing.
    pub(crate) fn empty(hook: &str) -> Self {
        Self {
            hook: hook.to_string(),
            result: None,
            responders: Vec::new(),
            exit_requested: false,
            suppressed: false,
            started_at: Utc::now(),
            elapsed: Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_recordable_values() {
        assert!(is_recordable(&json!(false)));
        assert!(is_recordable(&json!([1])));
        assert!(is_recordable(&json!({"status": "ok"})));

        assert!(!is_recordable(&json!(null)));
        assert!(!is_recordable(&json!([])));
        assert!(!is_recordable(&json!({})));
        assert!(!is_recordable(&json!("text")));
        assert!(!is_recordable(&json!(0)));
    }

    #[test]
    fn test_hook_args_access() {
        let args = HookArgs::from(vec![json!(7), json!("x")]);
        assert_eq!(args.len(), 2);
        assert_eq!(args.get(1), Some(&json!("x")));
        assert!(args.get(2).is_none());
        assert!(HookArgs::none().is_empty());
    }
}
