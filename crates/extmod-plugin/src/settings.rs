//! Typed module settings scoped by module, project and key.
//!
//! Reads go straight to the repository. Every write runs
//! lock → read → compare → write inside one locked unit of work, so two
//! writers can never both insert a row for the same `(module, project, key)`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info, warn};

use extmod_core::config::SettingsConfig;
use extmod_core::error::AppError;
use extmod_core::result::AppResult;
use extmod_core::traits::SettingsRepository;
use extmod_core::types::id::{ModuleId, ProjectId};
use extmod_core::types::setting::{PrefixedSetting, StoredSetting, is_enablement_key};
use extmod_core::types::value::{SettingValue, TypeTag};

/// Module settings store.
#[derive(Debug)]
pub struct SettingsStore {
    repository: Arc<dyn SettingsRepository>,
    config: SettingsConfig,
    /// Bumped after every physical write to an enablement key.
    generation: AtomicU64,
}

impl SettingsStore {
    /// Creates a store over `repository`.
    pub fn new(repository: Arc<dyn SettingsRepository>, config: SettingsConfig) -> Self {
        Self {
            repository,
            config,
            generation: AtomicU64::new(0),
        }
    }

    /// Current enablement generation.
    ///
    /// Changes whenever a `version` or `enabled` row was physically written
    /// through this store.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Returns the store limits and lock timeout.
    pub fn config(&self) -> &SettingsConfig {
        &self.config
    }

    /// Returns the value stored in exactly this scope.
    ///
    /// `project = None` reads the system-wide value only.
    pub async fn get(
        &self,
        prefix: &str,
        project: Option<ProjectId>,
        key: &str,
    ) -> AppResult<Option<SettingValue>> {
        let module_id = self.repository.module_id(prefix).await?;
        match self.repository.find(module_id, project, key).await? {
            Some(row) => decode_row(prefix, &row),
            None => Ok(None),
        }
    }

    /// Returns the system-wide value.
    pub async fn get_system(&self, prefix: &str, key: &str) -> AppResult<Option<SettingValue>> {
        self.get(prefix, None, key).await
    }

    /// Returns the value stored for `project`, ignoring the system value.
    pub async fn get_project(
        &self,
        prefix: &str,
        project: ProjectId,
        key: &str,
    ) -> AppResult<Option<SettingValue>> {
        self.get(prefix, Some(project), key).await
    }

    /// Returns the project value, falling back to the system value.
    pub async fn get_effective(
        &self,
        prefix: &str,
        project: ProjectId,
        key: &str,
    ) -> AppResult<Option<SettingValue>> {
        match self.get_project(prefix, project, key).await? {
            Some(value) => Ok(Some(value)),
            None => self.get_system(prefix, key).await,
        }
    }

    /// Returns every value stored in one scope, keyed by setting key.
    pub async fn get_all(
        &self,
        prefix: &str,
        project: Option<ProjectId>,
    ) -> AppResult<BTreeMap<String, SettingValue>> {
        let module_id = self.repository.module_id(prefix).await?;
        let mut values = BTreeMap::new();
        for row in self.repository.find_scope(module_id, project).await? {
            if values.contains_key(&row.key) {
                continue;
            }
            if let Some(value) = decode_row(prefix, &row)? {
                values.insert(row.key, value);
            }
        }
        Ok(values)
    }

    /// Writes `value` in exactly this scope. Writing `Null` removes the row.
    ///
    /// Returns whether a physical write happened; writing the value already
    /// stored is a no-op.
    pub async fn set(
        &self,
        prefix: &str,
        project: Option<ProjectId>,
        key: &str,
        value: impl Into<SettingValue>,
    ) -> AppResult<bool> {
        let value = value.into();
        if key.is_empty() {
            return Err(AppError::validation("Setting key must not be empty"));
        }
        let (tag, text) = value.encode()?;
        self.check_limits(prefix, key, &text)?;

        let module_id = self.repository.module_id(prefix).await?;
        let lock_name = lock_name(module_id, project);
        let mut tx = self
            .repository
            .begin_locked(&lock_name, self.config.lock_timeout())
            .await?;

        let row = StoredSetting::new(module_id, project, key, tag, text);
        let wrote = match tx.find(module_id, project, key).await? {
            Some(current) if current.holds(tag, &row.value) => false,
            None if tag == TypeTag::Null => false,
            Some(_) if tag == TypeTag::Null => {
                tx.delete(module_id, project, key).await?;
                true
            }
            Some(_) => {
                tx.update(&row).await?;
                true
            }
            None => {
                tx.insert(&row).await?;
                true
            }
        };

        if !wrote {
            debug!(prefix = %prefix, key = %key, "Setting unchanged, skipping write");
            return Ok(false);
        }

        tx.commit().await?;
        if is_enablement_key(key) {
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
        debug!(
            prefix = %prefix,
            project = ?project.map(ProjectId::get),
            key = %key,
            value_type = %tag,
            "Setting written"
        );
        Ok(true)
    }

    /// Writes the system-wide value.
    pub async fn set_system(
        &self,
        prefix: &str,
        key: &str,
        value: impl Into<SettingValue>,
    ) -> AppResult<bool> {
        self.set(prefix, None, key, value).await
    }

    /// Writes the value for `project`.
    pub async fn set_project(
        &self,
        prefix: &str,
        project: ProjectId,
        key: &str,
        value: impl Into<SettingValue>,
    ) -> AppResult<bool> {
        self.set(prefix, Some(project), key, value).await
    }

    /// Removes the row in exactly this scope.
    pub async fn remove(
        &self,
        prefix: &str,
        project: Option<ProjectId>,
        key: &str,
    ) -> AppResult<bool> {
        self.set(prefix, project, key, SettingValue::Null).await
    }

    /// Removes the system-wide value.
    pub async fn remove_system(&self, prefix: &str, key: &str) -> AppResult<bool> {
        self.remove(prefix, None, key).await
    }

    /// Removes the value for `project`.
    pub async fn remove_project(
        &self,
        prefix: &str,
        project: ProjectId,
        key: &str,
    ) -> AppResult<bool> {
        self.remove(prefix, Some(project), key).await
    }

    /// Removes every key in one scope. Returns how many rows were removed.
    pub async fn remove_all(&self, prefix: &str, project: Option<ProjectId>) -> AppResult<usize> {
        let module_id = self.repository.module_id(prefix).await?;
        let mut keys: Vec<String> = self
            .repository
            .find_scope(module_id, project)
            .await?
            .into_iter()
            .map(|row| row.key)
            .collect();
        keys.dedup();

        let mut removed = 0;
        for key in &keys {
            if self.remove(prefix, project, key).await? {
                removed += 1;
            }
        }
        info!(
            prefix = %prefix,
            project = ?project.map(ProjectId::get),
            removed,
            "Module settings removed"
        );
        Ok(removed)
    }

    /// Reads raw rows for the given keys across all modules and scopes.
    pub async fn rows_for_keys(&self, keys: &[&str]) -> AppResult<Vec<PrefixedSetting>> {
        self.repository.find_by_keys(keys).await
    }

    /// Returns a handle bound to one module and scope.
    pub fn for_module(
        self: &Arc<Self>,
        prefix: impl Into<String>,
        project: Option<ProjectId>,
    ) -> ModuleSettings {
        ModuleSettings {
            store: self.clone(),
            prefix: prefix.into(),
            project,
        }
    }

    fn check_limits(&self, prefix: &str, key: &str, text: &str) -> AppResult<()> {
        if key.len() > self.config.key_size_limit {
            warn!(prefix = %prefix, key_len = key.len(), "Setting key too long");
            return Err(AppError::limit_exceeded(format!(
                "Setting key is {} bytes; the limit is {}",
                key.len(),
                self.config.key_size_limit
            )));
        }
        if text.len() > self.config.value_size_limit {
            warn!(prefix = %prefix, key = %key, value_len = text.len(), "Setting value too large");
            return Err(AppError::limit_exceeded(format!(
                "Value for setting '{key}' is {} bytes; the limit is {}",
                text.len(),
                self.config.value_size_limit
            )));
        }
        Ok(())
    }
}

/// Lock guarding every key of one module in one scope.
fn lock_name(module_id: ModuleId, project: Option<ProjectId>) -> String {
    match project {
        Some(project) => format!("module_settings:{module_id}:{project}"),
        None => format!("module_settings:{module_id}:system"),
    }
}

fn decode_row(prefix: &str, row: &StoredSetting) -> AppResult<Option<SettingValue>> {
    let value = row.decode().map_err(|e| {
        warn!(prefix = %prefix, key = %row.key, value_type = %row.type_tag, "Stored setting has inconsistent type");
        e
    })?;
    Ok((!value.is_null()).then_some(value))
}

/// Settings handle bound to one module and one request scope.
///
/// `get` resolves project overrides when the scope has a project.
#[derive(Debug, Clone)]
pub struct ModuleSettings {
    store: Arc<SettingsStore>,
    prefix: String,
    project: Option<ProjectId>,
}

impl ModuleSettings {
    /// Module prefix this handle writes under.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Project of the bound scope.
    pub fn project(&self) -> Option<ProjectId> {
        self.project
    }

    /// Effective value: project value if present, else system value.
    pub async fn get(&self, key: &str) -> AppResult<Option<SettingValue>> {
        match self.project {
            Some(project) => self.store.get_effective(&self.prefix, project, key).await,
            None => self.store.get_system(&self.prefix, key).await,
        }
    }

    /// System-wide value.
    pub async fn get_system(&self, key: &str) -> AppResult<Option<SettingValue>> {
        self.store.get_system(&self.prefix, key).await
    }

    /// Project value without fallback.
    pub async fn get_project(&self, key: &str) -> AppResult<Option<SettingValue>> {
        let project = self.require_project()?;
        self.store.get_project(&self.prefix, project, key).await
    }

    /// Writes the system-wide value.
    pub async fn set_system(&self, key: &str, value: impl Into<SettingValue>) -> AppResult<bool> {
        self.store.set_system(&self.prefix, key, value).await
    }

    /// Writes the project value.
    pub async fn set_project(&self, key: &str, value: impl Into<SettingValue>) -> AppResult<bool> {
        let project = self.require_project()?;
        self.store.set_project(&self.prefix, project, key, value).await
    }

    /// Removes the system-wide value.
    pub async fn remove_system(&self, key: &str) -> AppResult<bool> {
        self.store.remove_system(&self.prefix, key).await
    }

    /// Removes the project value.
    pub async fn remove_project(&self, key: &str) -> AppResult<bool> {
        let project = self.require_project()?;
        self.store.remove_project(&self.prefix, project, key).await
    }

    /// Every value stored in the bound scope.
    pub async fn get_all(&self) -> AppResult<BTreeMap<String, SettingValue>> {
        self.store.get_all(&self.prefix, self.project).await
    }

    fn require_project(&self) -> AppResult<ProjectId> {
        self.project.ok_or_else(|| {
            AppError::validation(format!(
                "Module '{}' has no project in scope for a project setting",
                self.prefix
            ))
        })
    }
}
