//! Operator notification sink.

use async_trait::async_trait;

/// Fire-and-forget channel for operator-facing warnings.
///
/// Used for handler faults, ambiguous hook results, deadlock retries and
/// slow dispatches. Implementations must not fail the caller.
#[async_trait]
pub trait AdminNotifier: Send + Sync + std::fmt::Debug + 'static {
    /// Sends a notification, optionally attributed to a module prefix.
    async fn notify(&self, subject: &str, body: &str, prefix: Option<&str>);
}
