//! Operator notifications written to the log.

use async_trait::async_trait;
use tracing::warn;

use extmod_core::traits::AdminNotifier;

/// Notifier that emits every notification as a structured warning.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl AdminNotifier for TracingNotifier {
    async fn notify(&self, subject: &str, body: &str, prefix: Option<&str>) {
        warn!(
            subject = %subject,
            prefix = prefix.unwrap_or("-"),
            body = %body,
            "Operator notification"
        );
    }
}
