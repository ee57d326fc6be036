//! Deadlock classification and bounded automatic retry.
//!
//! A statement that fails with a deadlock is retried up to `retries` times,
//! each retry reported to operators. A further failure escalates as a plain
//! `Database` error.

use std::future::Future;
use std::sync::Arc;

use tracing::warn;

use extmod_core::error::{AppError, ErrorKind};
use extmod_core::result::AppResult;
use extmod_core::traits::AdminNotifier;

/// SQLSTATE `deadlock_detected`.
const SQLSTATE_DEADLOCK: &str = "40P01";

/// SQLSTATE `serialization_failure`.
const SQLSTATE_SERIALIZATION_FAILURE: &str = "40001";

/// Returns whether `err` is a transient deadlock worth retrying.
pub fn is_deadlock(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => matches!(
            db.code().as_deref(),
            Some(SQLSTATE_DEADLOCK) | Some(SQLSTATE_SERIALIZATION_FAILURE)
        ),
        _ => false,
    }
}

/// Maps a sqlx error into a `Database` [`AppError`].
pub fn database_error(what: &str, err: sqlx::Error) -> AppError {
    let message = if is_deadlock(&err) {
        format!("Failed to {what}: deadlock persisted after retry")
    } else {
        format!("Failed to {what}")
    };
    AppError::with_source(ErrorKind::Database, message, err)
}

/// Retry policy for deadlocked statements.
#[derive(Debug, Clone)]
pub struct DeadlockRetry {
    retries: u32,
    notifier: Arc<dyn AdminNotifier>,
}

impl DeadlockRetry {
    /// Creates a policy allowing `retries` extra attempts.
    pub fn new(retries: u32, notifier: Arc<dyn AdminNotifier>) -> Self {
        Self { retries, notifier }
    }

    /// Number of extra attempts after the first deadlock.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Runs `op`, retrying deadlocks.
    ///
    /// `op` must build a fresh statement on each call; it is only safe for
    /// statements that run outside an explicit transaction.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if is_deadlock(&e) && attempt < self.retries => {
                    attempt += 1;
                    self.report(what, attempt, &e).await;
                }
                Err(e) => return Err(database_error(what, e)),
            }
        }
    }

    /// Logs and reports one retried deadlock.
    pub async fn report(&self, what: &str, attempt: u32, err: &sqlx::Error) {
        warn!(
            operation = %what,
            attempt,
            max_retries = self.retries,
            error = %err,
            "Deadlock detected, retrying statement"
        );
        self.notifier
            .notify(
                "Database deadlock retried",
                &format!("Deadlock while trying to {what} (retry {attempt}): {err}"),
                None,
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;
    use std::error::Error as StdError;
    use std::fmt;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;

    #[derive(Debug)]
    struct PgCode(&'static str);

    impl fmt::Display for PgCode {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "sqlstate {}", self.0)
        }
    }

    impl StdError for PgCode {}

    impl sqlx::error::DatabaseError for PgCode {
        fn message(&self) -> &str {
            "simulated failure"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            Some(Cow::Borrowed(self.0))
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> sqlx::error::ErrorKind {
            sqlx::error::ErrorKind::Other
        }
    }

    fn pg_error(code: &'static str) -> sqlx::Error {
        sqlx::Error::Database(Box::new(PgCode(code)))
    }

    #[derive(Debug, Default)]
    struct CountingNotifier(AtomicU32);

    #[async_trait]
    impl AdminNotifier for CountingNotifier {
        async fn notify(&self, _subject: &str, _body: &str, _prefix: Option<&str>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_deadlock_classification() {
        assert!(is_deadlock(&pg_error("40P01")));
        assert!(is_deadlock(&pg_error("40001")));
        assert!(!is_deadlock(&pg_error("23505")));
        assert!(!is_deadlock(&sqlx::Error::RowNotFound));
    }

    #[tokio::test]
    async fn test_persistent_deadlock_escalates_as_database_error() {
        let notifier = Arc::new(CountingNotifier::default());
        let retry = DeadlockRetry::new(1, notifier.clone());
        let attempts = AtomicU32::new(0);

        let err = retry
            .run("write setting", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(pg_error("40P01")) }
            })
            .await
            .unwrap_err();

        assert!(err.is(ErrorKind::Database));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(notifier.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deadlock_then_success_is_retried() {
        let notifier = Arc::new(CountingNotifier::default());
        let retry = DeadlockRetry::new(1, notifier.clone());
        let attempts = AtomicU32::new(0);

        let value = retry
            .run("write setting", || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(pg_error("40P01"))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(notifier.0.load(Ordering::SeqCst), 1);
    }
}
