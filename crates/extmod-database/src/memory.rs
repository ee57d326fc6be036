//! In-process settings repository.
//!
//! Rows live in a shared vector; writers serialize through one async mutex
//! per lock name, acquired with a deadline. A transaction buffers its
//! writes and applies them on commit, so dropping it discards them.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, warn};

use extmod_core::error::AppError;
use extmod_core::result::AppResult;
use extmod_core::traits::{SettingsRepository, SettingsTransaction};
use extmod_core::types::id::{ModuleId, ProjectId};
use extmod_core::types::setting::{PrefixedSetting, StoredSetting};

/// Settings repository backed by process memory.
#[derive(Debug, Default)]
pub struct MemorySettingsRepository {
    /// Prefix → assigned id.
    modules: DashMap<String, ModuleId>,
    /// Last assigned module id.
    last_id: AtomicI64,
    /// Committed rows in insertion order. Duplicates are representable.
    rows: Arc<RwLock<Vec<StoredSetting>>>,
    /// Lock name → mutex.
    locks: DashMap<String, Arc<Mutex<()>>>,
    /// Number of committed physical writes.
    writes: Arc<AtomicU64>,
}

impl MemorySettingsRepository {
    /// Creates an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of physical writes committed so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Counts committed rows for one `(module, project, key)` triple.
    pub async fn row_count(
        &self,
        module_id: ModuleId,
        project_id: Option<ProjectId>,
        key: &str,
    ) -> usize {
        self.rows
            .read()
            .await
            .iter()
            .filter(|row| matches(row, module_id, project_id, key))
            .count()
    }

    /// Appends a row without taking any lock.
    ///
    /// Seeds fixtures such as legacy type tags or duplicated rows.
    pub async fn insert_unlocked(&self, row: StoredSetting) {
        self.rows.write().await.push(row);
    }

    fn prefix_of(&self, module_id: ModuleId) -> Option<String> {
        self.modules
            .iter()
            .find(|entry| *entry.value() == module_id)
            .map(|entry| entry.key().clone())
    }
}

fn matches(
    row: &StoredSetting,
    module_id: ModuleId,
    project_id: Option<ProjectId>,
    key: &str,
) -> bool {
    row.module_id == module_id && row.project_id == project_id && row.key == key
}

#[async_trait]
impl SettingsRepository for MemorySettingsRepository {
    async fn module_id(&self, prefix: &str) -> AppResult<ModuleId> {
        if let Some(id) = self.modules.get(prefix) {
            return Ok(*id);
        }
        let id = *self
            .modules
            .entry(prefix.to_string())
            .or_insert_with(|| ModuleId::new(self.last_id.fetch_add(1, Ordering::SeqCst) + 1));
        debug!(prefix = %prefix, module_id = %id, "Assigned module id");
        Ok(id)
    }

    async fn find(
        &self,
        module_id: ModuleId,
        project_id: Option<ProjectId>,
        key: &str,
    ) -> AppResult<Option<StoredSetting>> {
        Ok(self
            .rows
            .read()
            .await
            .iter()
            .find(|row| matches(row, module_id, project_id, key))
            .cloned())
    }

    async fn find_scope(
        &self,
        module_id: ModuleId,
        project_id: Option<ProjectId>,
    ) -> AppResult<Vec<StoredSetting>> {
        let mut rows: Vec<StoredSetting> = self
            .rows
            .read()
            .await
            .iter()
            .filter(|row| row.module_id == module_id && row.project_id == project_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(rows)
    }

    async fn find_by_keys(&self, keys: &[&str]) -> AppResult<Vec<PrefixedSetting>> {
        let rows = self.rows.read().await;
        let mut found: Vec<PrefixedSetting> = rows
            .iter()
            .filter(|row| keys.contains(&row.key.as_str()))
            .filter_map(|row| {
                self.prefix_of(row.module_id).map(|prefix| PrefixedSetting {
                    prefix,
                    setting: row.clone(),
                })
            })
            .collect();
        found.sort_by_key(|p| p.setting.module_id);
        Ok(found)
    }

    async fn begin_locked(
        &self,
        lock_name: &str,
        timeout: Duration,
    ) -> AppResult<Box<dyn SettingsTransaction>> {
        let lock = self
            .locks
            .entry(lock_name.to_string())
            .or_default()
            .clone();

        let guard = match tokio::time::timeout(timeout, lock.lock_owned()).await {
            Ok(guard) => guard,
            Err(_) => {
                warn!(lock = %lock_name, timeout_ms = timeout.as_millis() as u64, "Settings lock timed out");
                return Err(AppError::lock_timeout(format!(
                    "Timed out after {}ms waiting for lock '{lock_name}'",
                    timeout.as_millis()
                )));
            }
        };

        debug!(lock = %lock_name, "Settings lock acquired");
        Ok(Box::new(MemoryTransaction {
            _guard: guard,
            rows: self.rows.clone(),
            writes: self.writes.clone(),
            pending: Vec::new(),
        }))
    }

    async fn health_check(&self) -> AppResult<bool> {
        Ok(true)
    }
}

/// A buffered write.
#[derive(Debug)]
enum PendingOp {
    Insert(StoredSetting),
    Update(StoredSetting),
    Delete {
        module_id: ModuleId,
        project_id: Option<ProjectId>,
        key: String,
    },
}

/// Locked unit of work over [`MemorySettingsRepository`].
struct MemoryTransaction {
    _guard: OwnedMutexGuard<()>,
    rows: Arc<RwLock<Vec<StoredSetting>>>,
    writes: Arc<AtomicU64>,
    pending: Vec<PendingOp>,
}

#[async_trait]
impl SettingsTransaction for MemoryTransaction {
    async fn find(
        &mut self,
        module_id: ModuleId,
        project_id: Option<ProjectId>,
        key: &str,
    ) -> AppResult<Option<StoredSetting>> {
        let mut current = self
            .rows
            .read()
            .await
            .iter()
            .find(|row| matches(row, module_id, project_id, key))
            .cloned();

        for op in &self.pending {
            match op {
                PendingOp::Insert(row) if matches(row, module_id, project_id, key) => {
                    if current.is_none() {
                        current = Some(row.clone());
                    }
                }
                PendingOp::Update(row) if matches(row, module_id, project_id, key) => {
                    if current.is_some() {
                        current = Some(row.clone());
                    }
                }
                PendingOp::Delete {
                    module_id: m,
                    project_id: p,
                    key: k,
                } if *m == module_id && *p == project_id && k == key => {
                    current = None;
                }
                _ => {}
            }
        }
        Ok(current)
    }

    async fn insert(&mut self, setting: &StoredSetting) -> AppResult<()> {
        self.pending.push(PendingOp::Insert(setting.clone()));
        Ok(())
    }

    async fn update(&mut self, setting: &StoredSetting) -> AppResult<()> {
        self.pending.push(PendingOp::Update(setting.clone()));
        Ok(())
    }

    async fn delete(
        &mut self,
        module_id: ModuleId,
        project_id: Option<ProjectId>,
        key: &str,
    ) -> AppResult<u64> {
        let existing = self.find(module_id, project_id, key).await?;
        self.pending.push(PendingOp::Delete {
            module_id,
            project_id,
            key: key.to_string(),
        });
        Ok(u64::from(existing.is_some()))
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let MemoryTransaction {
            _guard,
            rows,
            writes,
            pending,
        } = *self;

        let mut rows = rows.write().await;
        for op in &pending {
            match op {
                PendingOp::Insert(row) => rows.push(row.clone()),
                PendingOp::Update(new) => {
                    for row in rows
                        .iter_mut()
                        .filter(|row| matches(row, new.module_id, new.project_id, &new.key))
                    {
                        row.type_tag = new.type_tag.clone();
                        row.value = new.value.clone();
                    }
                }
                PendingOp::Delete {
                    module_id,
                    project_id,
                    key,
                } => rows.retain(|row| !matches(row, *module_id, *project_id, key)),
            }
        }
        writes.fetch_add(pending.len() as u64, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use extmod_core::error::ErrorKind;
    use extmod_core::types::value::TypeTag;

    use super::*;

    fn row(module_id: ModuleId, project: Option<i64>, key: &str, value: &str) -> StoredSetting {
        StoredSetting::new(
            module_id,
            project.map(ProjectId::new),
            key,
            TypeTag::String,
            value,
        )
    }

    #[tokio::test]
    async fn test_module_ids_are_stable() {
        let repo = MemorySettingsRepository::new();
        let a = repo.module_id("alpha").await.unwrap();
        let b = repo.module_id("beta").await.unwrap();
        assert_ne!(a, b);
        assert_eq!(repo.module_id("alpha").await.unwrap(), a);
    }

    #[tokio::test]
    async fn test_commit_makes_writes_visible() {
        let repo = MemorySettingsRepository::new();
        let id = repo.module_id("alpha").await.unwrap();

        let mut tx = repo
            .begin_locked("l", Duration::from_secs(1))
            .await
            .unwrap();
        tx.insert(&row(id, None, "color", "red")).await.unwrap();
        assert_eq!(
            tx.find(id, None, "color").await.unwrap().unwrap().value,
            "red"
        );
        assert!(repo.find(id, None, "color").await.unwrap().is_none());
        tx.commit().await.unwrap();

        assert_eq!(repo.find(id, None, "color").await.unwrap().unwrap().value, "red");
        assert_eq!(repo.write_count(), 1);
    }

    #[tokio::test]
    async fn test_dropped_transaction_discards_writes() {
        let repo = MemorySettingsRepository::new();
        let id = repo.module_id("alpha").await.unwrap();

        {
            let mut tx = repo
                .begin_locked("l", Duration::from_secs(1))
                .await
                .unwrap();
            tx.insert(&row(id, None, "color", "red")).await.unwrap();
        }

        assert!(repo.find(id, None, "color").await.unwrap().is_none());
        assert_eq!(repo.write_count(), 0);
        // The lock was released by the drop.
        assert!(repo.begin_locked("l", Duration::from_millis(50)).await.is_ok());
    }

    #[tokio::test]
    async fn test_lock_times_out_while_held() {
        let repo = MemorySettingsRepository::new();
        let _held = repo
            .begin_locked("busy", Duration::from_secs(1))
            .await
            .unwrap();

        let err = repo
            .begin_locked("busy", Duration::from_millis(30))
            .await
            .err()
            .unwrap();
        assert!(err.is(ErrorKind::LockTimeout));

        assert!(repo.begin_locked("other", Duration::from_millis(30)).await.is_ok());
    }

    #[tokio::test]
    async fn test_scopes_are_distinct() {
        let repo = MemorySettingsRepository::new();
        let id = repo.module_id("alpha").await.unwrap();
        repo.insert_unlocked(row(id, None, "k", "system")).await;
        repo.insert_unlocked(row(id, Some(7), "k", "project")).await;

        let mut tx = repo
            .begin_locked("l", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(tx.delete(id, None, "k").await.unwrap(), 1);
        tx.commit().await.unwrap();

        assert!(repo.find(id, None, "k").await.unwrap().is_none());
        assert_eq!(
            repo.find(id, Some(ProjectId::new(7)), "k")
                .await
                .unwrap()
                .unwrap()
                .value,
            "project"
        );
    }

    #[tokio::test]
    async fn test_find_by_keys_carries_prefix() {
        let repo = MemorySettingsRepository::new();
        let a = repo.module_id("alpha").await.unwrap();
        let b = repo.module_id("beta").await.unwrap();
        repo.insert_unlocked(row(b, None, "version", "1.0.0")).await;
        repo.insert_unlocked(row(a, None, "version", "2.0.0")).await;
        repo.insert_unlocked(row(a, None, "other", "x")).await;

        let found = repo.find_by_keys(&["version"]).await.unwrap();
        let prefixes: Vec<&str> = found.iter().map(|p| p.prefix.as_str()).collect();
        assert_eq!(prefixes, vec!["alpha", "beta"]);
    }
}
