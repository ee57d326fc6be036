//! Hook permission source.

use async_trait::async_trait;

/// Decides whether a module version may receive a hook.
#[async_trait]
pub trait PermissionSource: Send + Sync + std::fmt::Debug + 'static {
    /// Returns whether `prefix` at `version` holds the capability for `hook`.
    async fn has_capability(&self, prefix: &str, version: &str, hook: &str) -> bool;
}
