//! Module identity repository implementation.

use dashmap::DashMap;
use sqlx::PgPool;
use tracing::debug;

use extmod_core::result::AppResult;
use extmod_core::types::id::ModuleId;

use crate::retry::DeadlockRetry;

/// Maps module prefixes to surrogate ids, assigning them lazily.
///
/// Ids never change once assigned, so they are cached for the life of the
/// process.
#[derive(Debug, Clone)]
pub struct ModuleRepository {
    pool: PgPool,
    retry: DeadlockRetry,
    ids: DashMap<String, ModuleId>,
}

impl ModuleRepository {
    /// Create a new module repository.
    pub fn new(pool: PgPool, retry: DeadlockRetry) -> Self {
        Self {
            pool,
            retry,
            ids: DashMap::new(),
        }
    }

    /// Return the id for `prefix`, inserting the module row on first use.
    pub async fn ensure_id(&self, prefix: &str) -> AppResult<ModuleId> {
        if let Some(id) = self.ids.get(prefix) {
            return Ok(*id);
        }

        let pool = &self.pool;
        self.retry
            .run("register module prefix", move || {
                sqlx::query("INSERT INTO modules (prefix) VALUES ($1) ON CONFLICT (prefix) DO NOTHING")
                    .bind(prefix)
                    .execute(pool)
            })
            .await?;

        let id: ModuleId = self
            .retry
            .run("look up module id", move || {
                sqlx::query_scalar("SELECT module_id FROM modules WHERE prefix = $1")
                    .bind(prefix)
                    .fetch_one(pool)
            })
            .await?;

        debug!(prefix = %prefix, module_id = %id, "Resolved module id");
        self.ids.insert(prefix.to_string(), id);
        Ok(id)
    }

    /// List every known prefix with its id.
    pub async fn find_all(&self) -> AppResult<Vec<(String, ModuleId)>> {
        let pool = &self.pool;
        self.retry
            .run("list modules", move || {
                sqlx::query_as::<_, (String, ModuleId)>(
                    "SELECT prefix, module_id FROM modules ORDER BY module_id",
                )
                .fetch_all(pool)
            })
            .await
    }
}
