//! Persisted setting rows.

use serde::{Deserialize, Serialize};

use super::id::{ModuleId, ProjectId};
use super::value::{SettingValue, TypeTag};
use crate::result::AppResult;

/// Reserved key holding a module's system-wide installed version.
pub const KEY_VERSION: &str = "version";

/// Reserved key holding the system-wide default-enabled flag, or a
/// project-level enable/disable override.
pub const KEY_ENABLED: &str = "enabled";

/// Returns whether a write to `key` can change module enablement.
pub fn is_enablement_key(key: &str) -> bool {
    key == KEY_VERSION || key == KEY_ENABLED
}

/// One raw row of the module settings table.
///
/// `project_id = None` is the system-wide scope, which is distinct from
/// every concrete project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSetting {
    /// Owning module.
    pub module_id: ModuleId,
    /// Project scope, or `None` for system-wide.
    pub project_id: Option<ProjectId>,
    /// Setting key.
    pub key: String,
    /// Raw persisted type tag.
    pub type_tag: String,
    /// Encoded value text.
    pub value: String,
}

impl StoredSetting {
    /// Builds a row from an encoded value.
    pub fn new(
        module_id: ModuleId,
        project_id: Option<ProjectId>,
        key: impl Into<String>,
        type_tag: TypeTag,
        value: impl Into<String>,
    ) -> Self {
        Self {
            module_id,
            project_id,
            key: key.into(),
            type_tag: type_tag.as_str().to_string(),
            value: value.into(),
        }
    }

    /// Decodes the stored text according to its tag.
    pub fn decode(&self) -> AppResult<SettingValue> {
        let tag: TypeTag = self.type_tag.parse()?;
        SettingValue::decode(tag, &self.value)
    }

    /// Returns whether this row already holds exactly `(tag, text)`.
    pub fn holds(&self, tag: TypeTag, text: &str) -> bool {
        self.value == text
            && self
                .type_tag
                .parse::<TypeTag>()
                .map(|stored| stored == tag)
                .unwrap_or(false)
    }
}

/// A stored row paired with the prefix of the module that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixedSetting {
    /// Module prefix.
    pub prefix: String,
    /// The row.
    pub setting: StoredSetting,
}
