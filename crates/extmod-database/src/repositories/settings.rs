//! Module settings repository implementation.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{Acquire, PgPool, Postgres, Transaction};
use tracing::{debug, warn};

use extmod_core::error::AppError;
use extmod_core::result::AppResult;
use extmod_core::traits::{SettingsRepository, SettingsTransaction};
use extmod_core::types::id::{ModuleId, ProjectId};
use extmod_core::types::setting::{PrefixedSetting, StoredSetting};

use super::module::ModuleRepository;
use crate::retry::{DeadlockRetry, database_error, is_deadlock};

/// Interval between advisory lock attempts.
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(25);

const SELECT_COLUMNS: &str = "module_id, project_id, key, value_type, value";

/// Row shape of `module_settings`.
#[derive(Debug, sqlx::FromRow)]
struct SettingRow {
    module_id: ModuleId,
    project_id: Option<ProjectId>,
    key: String,
    value_type: String,
    value: String,
}

impl From<SettingRow> for StoredSetting {
    fn from(row: SettingRow) -> Self {
        Self {
            module_id: row.module_id,
            project_id: row.project_id,
            key: row.key,
            type_tag: row.value_type,
            value: row.value,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PrefixedRow {
    prefix: String,
    #[sqlx(flatten)]
    setting: SettingRow,
}

/// PostgreSQL-backed settings repository.
#[derive(Debug, Clone)]
pub struct PgSettingsRepository {
    pool: PgPool,
    retry: DeadlockRetry,
    modules: ModuleRepository,
}

impl PgSettingsRepository {
    /// Create a new settings repository.
    pub fn new(pool: PgPool, retry: DeadlockRetry) -> Self {
        Self {
            modules: ModuleRepository::new(pool.clone(), retry.clone()),
            pool,
            retry,
        }
    }

    /// Returns the module identity repository.
    pub fn modules(&self) -> &ModuleRepository {
        &self.modules
    }
}

#[async_trait]
impl SettingsRepository for PgSettingsRepository {
    async fn module_id(&self, prefix: &str) -> AppResult<ModuleId> {
        self.modules.ensure_id(prefix).await
    }

    async fn find(
        &self,
        module_id: ModuleId,
        project_id: Option<ProjectId>,
        key: &str,
    ) -> AppResult<Option<StoredSetting>> {
        let pool = &self.pool;
        let query = format!(
            "SELECT {SELECT_COLUMNS} FROM module_settings \
             WHERE module_id = $1 AND project_id IS NOT DISTINCT FROM $2 AND key = $3 \
             ORDER BY setting_id LIMIT 1"
        );
        let sql = query.as_str();
        let row = self
            .retry
            .run("find module setting", move || {
                sqlx::query_as::<_, SettingRow>(sql)
                    .bind(module_id)
                    .bind(project_id)
                    .bind(key)
                    .fetch_optional(pool)
            })
            .await?;
        Ok(row.map(StoredSetting::from))
    }

    async fn find_scope(
        &self,
        module_id: ModuleId,
        project_id: Option<ProjectId>,
    ) -> AppResult<Vec<StoredSetting>> {
        let pool = &self.pool;
        let query = format!(
            "SELECT {SELECT_COLUMNS} FROM module_settings \
             WHERE module_id = $1 AND project_id IS NOT DISTINCT FROM $2 \
             ORDER BY key, setting_id"
        );
        let sql = query.as_str();
        let rows = self
            .retry
            .run("list module settings", move || {
                sqlx::query_as::<_, SettingRow>(sql)
                    .bind(module_id)
                    .bind(project_id)
                    .fetch_all(pool)
            })
            .await?;
        Ok(rows.into_iter().map(StoredSetting::from).collect())
    }

    async fn find_by_keys(&self, keys: &[&str]) -> AppResult<Vec<PrefixedSetting>> {
        let pool = &self.pool;
        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        let keys = &keys;
        let rows = self
            .retry
            .run("load settings by key", move || {
                sqlx::query_as::<_, PrefixedRow>(
                    "SELECT m.prefix, s.module_id, s.project_id, s.key, s.value_type, s.value \
                     FROM module_settings s JOIN modules m ON m.module_id = s.module_id \
                     WHERE s.key = ANY($1) \
                     ORDER BY m.module_id, s.setting_id",
                )
                .bind(keys)
                .fetch_all(pool)
            })
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| PrefixedSetting {
                prefix: row.prefix,
                setting: row.setting.into(),
            })
            .collect())
    }

    async fn begin_locked(
        &self,
        lock_name: &str,
        timeout: Duration,
    ) -> AppResult<Box<dyn SettingsTransaction>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| database_error("begin settings transaction", e))?;

        let deadline = Instant::now() + timeout;
        loop {
            let acquired: bool = sqlx::query_scalar(
                "SELECT pg_try_advisory_xact_lock(hashtextextended($1, 0))",
            )
            .bind(lock_name)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| database_error("acquire settings lock", e))?;

            if acquired {
                break;
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(lock = %lock_name, timeout_ms = timeout.as_millis() as u64, "Settings lock timed out");
                // Dropping `tx` rolls it back.
                return Err(AppError::lock_timeout(format!(
                    "Timed out after {}ms waiting for lock '{lock_name}'",
                    timeout.as_millis()
                )));
            }
            tokio::time::sleep(LOCK_POLL_INTERVAL.min(deadline - now)).await;
        }

        debug!(lock = %lock_name, "Settings lock acquired");
        Ok(Box::new(PgSettingsTransaction {
            tx,
            retry: self.retry.clone(),
        }))
    }

    async fn health_check(&self) -> AppResult<bool> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map(|v| v == 1)
            .map_err(|e| database_error("run health check", e))
    }
}

/// Transaction holding a `pg_advisory_xact_lock`.
///
/// The lock is released by commit or rollback; sqlx rolls the transaction
/// back when it is dropped uncommitted.
struct PgSettingsTransaction {
    tx: Transaction<'static, Postgres>,
    retry: DeadlockRetry,
}

impl PgSettingsTransaction {
    /// Executes a statement inside a savepoint, rolling back to it and
    /// retrying when the statement deadlocks.
    async fn execute_retrying<'q, F>(&mut self, what: &str, build: F) -> AppResult<u64>
    where
        F: Fn() -> Query<'q, Postgres, PgArguments> + Send,
    {
        let mut attempt = 0;
        loop {
            let mut savepoint = Acquire::begin(&mut self.tx)
                .await
                .map_err(|e| database_error("open savepoint", e))?;

            match build().execute(&mut *savepoint).await {
                Ok(done) => {
                    savepoint
                        .commit()
                        .await
                        .map_err(|e| database_error("release savepoint", e))?;
                    return Ok(done.rows_affected());
                }
                Err(e) if is_deadlock(&e) && attempt < self.retry.retries() => {
                    savepoint
                        .rollback()
                        .await
                        .map_err(|e| database_error("roll back savepoint", e))?;
                    attempt += 1;
                    self.retry.report(what, attempt, &e).await;
                }
                Err(e) => return Err(database_error(what, e)),
            }
        }
    }
}

#[async_trait]
impl SettingsTransaction for PgSettingsTransaction {
    async fn find(
        &mut self,
        module_id: ModuleId,
        project_id: Option<ProjectId>,
        key: &str,
    ) -> AppResult<Option<StoredSetting>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM module_settings \
             WHERE module_id = $1 AND project_id IS NOT DISTINCT FROM $2 AND key = $3 \
             ORDER BY setting_id LIMIT 1"
        );
        let row = sqlx::query_as::<_, SettingRow>(&sql)
            .bind(module_id)
            .bind(project_id)
            .bind(key)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| database_error("read module setting under lock", e))?;
        Ok(row.map(StoredSetting::from))
    }

    async fn insert(&mut self, setting: &StoredSetting) -> AppResult<()> {
        self.execute_retrying("insert module setting", || {
            sqlx::query(
                "INSERT INTO module_settings (module_id, project_id, key, value_type, value) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(setting.module_id)
            .bind(setting.project_id)
            .bind(setting.key.as_str())
            .bind(setting.type_tag.as_str())
            .bind(setting.value.as_str())
        })
        .await?;
        Ok(())
    }

    async fn update(&mut self, setting: &StoredSetting) -> AppResult<()> {
        self.execute_retrying("update module setting", || {
            sqlx::query(
                "UPDATE module_settings SET value_type = $4, value = $5, updated_at = NOW() \
                 WHERE module_id = $1 AND project_id IS NOT DISTINCT FROM $2 AND key = $3",
            )
            .bind(setting.module_id)
            .bind(setting.project_id)
            .bind(setting.key.as_str())
            .bind(setting.type_tag.as_str())
            .bind(setting.value.as_str())
        })
        .await?;
        Ok(())
    }

    async fn delete(
        &mut self,
        module_id: ModuleId,
        project_id: Option<ProjectId>,
        key: &str,
    ) -> AppResult<u64> {
        self.execute_retrying("delete module setting", || {
            sqlx::query(
                "DELETE FROM module_settings \
                 WHERE module_id = $1 AND project_id IS NOT DISTINCT FROM $2 AND key = $3",
            )
            .bind(module_id)
            .bind(project_id)
            .bind(key)
        })
        .await
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| database_error("commit module settings", e))
    }
}
