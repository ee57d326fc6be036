//! Hook dispatch configuration.

use serde::{Deserialize, Serialize};

/// Hook dispatch policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HooksConfig {
    /// Hooks that are suppressed when re-entered from their own handlers.
    /// Their boolean results are combined with logical AND.
    #[serde(default = "default_recursion_sensitive")]
    pub recursion_sensitive: Vec<String>,
    /// Hooks fired on every page. On system (non-project) pages these only
    /// reach modules that opt in through their manifest.
    #[serde(default = "default_every_page")]
    pub every_page: Vec<String>,
    /// Hook dispatched by the externally driven cron poll.
    #[serde(default = "default_cron_hook")]
    pub cron_hook: String,
    /// Legacy permission prefix: `hook_<name>` grants the hook `<name>`.
    #[serde(default = "default_permission_alias_prefix")]
    pub permission_alias_prefix: String,
    /// Dispatches slower than this are reported to operators.
    #[serde(default = "default_slow_dispatch_warning")]
    pub slow_dispatch_warning_ms: u64,
}

impl HooksConfig {
    /// Returns whether `hook` is recursion sensitive.
    pub fn is_recursion_sensitive(&self, hook: &str) -> bool {
        self.recursion_sensitive.iter().any(|h| h == hook)
    }

    /// Returns whether `hook` is an every-page hook.
    pub fn is_every_page(&self, hook: &str) -> bool {
        self.every_page.iter().any(|h| h == hook)
    }
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            recursion_sensitive: default_recursion_sensitive(),
            every_page: default_every_page(),
            cron_hook: default_cron_hook(),
            permission_alias_prefix: default_permission_alias_prefix(),
            slow_dispatch_warning_ms: default_slow_dispatch_warning(),
        }
    }
}

fn default_recursion_sensitive() -> Vec<String> {
    vec!["email".to_string()]
}

fn default_every_page() -> Vec<String> {
    vec![
        "every_page_top".to_string(),
        "every_page_before_render".to_string(),
    ]
}

fn default_cron_hook() -> String {
    "cron".to_string()
}

fn default_permission_alias_prefix() -> String {
    "hook_".to_string()
}

fn default_slow_dispatch_warning() -> u64 {
    10_000
}
