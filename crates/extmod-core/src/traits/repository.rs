//! Settings repository traits for pluggable persistence backends.

use std::time::Duration;

use async_trait::async_trait;

use crate::result::AppResult;
use crate::types::id::{ModuleId, ProjectId};
use crate::types::setting::{PrefixedSetting, StoredSetting};

/// Persistence backend for module identities and settings rows.
///
/// The backend provides no uniqueness guarantee for
/// `(module, project, key)`. Writers get it by doing every
/// read-compare-write inside [`SettingsRepository::begin_locked`].
#[async_trait]
pub trait SettingsRepository: Send + Sync + std::fmt::Debug + 'static {
    /// Returns the surrogate id for a module prefix, assigning one on first
    /// reference.
    async fn module_id(&self, prefix: &str) -> AppResult<ModuleId>;

    /// Reads one row. `project_id = None` matches only system-wide rows.
    async fn find(
        &self,
        module_id: ModuleId,
        project_id: Option<ProjectId>,
        key: &str,
    ) -> AppResult<Option<StoredSetting>>;

    /// Reads every row of one module in one scope.
    async fn find_scope(
        &self,
        module_id: ModuleId,
        project_id: Option<ProjectId>,
    ) -> AppResult<Vec<StoredSetting>>;

    /// Reads every row, across all modules and scopes, whose key is one of
    /// `keys`.
    async fn find_by_keys(&self, keys: &[&str]) -> AppResult<Vec<PrefixedSetting>>;

    /// Opens a unit of work holding the named advisory lock.
    ///
    /// Waits at most `timeout` for the lock and fails with a `LockTimeout`
    /// error otherwise. The lock is held until the returned transaction is
    /// committed or dropped; dropping it discards its writes.
    async fn begin_locked(
        &self,
        lock_name: &str,
        timeout: Duration,
    ) -> AppResult<Box<dyn SettingsTransaction>>;

    /// Check that the backend is reachable.
    async fn health_check(&self) -> AppResult<bool>;
}

/// A locked unit of work over the settings table.
#[async_trait]
pub trait SettingsTransaction: Send {
    /// Reads one row, seeing this transaction's own writes.
    async fn find(
        &mut self,
        module_id: ModuleId,
        project_id: Option<ProjectId>,
        key: &str,
    ) -> AppResult<Option<StoredSetting>>;

    /// Inserts a new row.
    async fn insert(&mut self, setting: &StoredSetting) -> AppResult<()>;

    /// Rewrites the type tag and value of an existing row.
    async fn update(&mut self, setting: &StoredSetting) -> AppResult<()>;

    /// Deletes the row in exactly this scope. Returns the number of rows
    /// removed.
    async fn delete(
        &mut self,
        module_id: ModuleId,
        project_id: Option<ProjectId>,
        key: &str,
    ) -> AppResult<u64>;

    /// Makes the writes visible and releases the lock.
    async fn commit(self: Box<Self>) -> AppResult<()>;
}
