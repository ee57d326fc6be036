//! Module manifest: the static description a module ships with.

use serde::{Deserialize, Serialize};

/// Static metadata describing one version of a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleManifest {
    /// Stable module identifier.
    pub prefix: String,
    /// Semantic version string.
    pub version: String,
    /// Human-readable name.
    #[serde(default)]
    pub name: String,
    /// Logical identity shared by every copy of the same module, whatever
    /// prefix it was installed under.
    pub namespace: String,
    /// Hooks this module is allowed to receive, by name or legacy alias.
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Opt in to every-page hooks on system (non-project) pages.
    #[serde(default)]
    pub every_page_hooks_on_system_pages: bool,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
}

impl ModuleManifest {
    /// Creates a manifest with no permissions.
    pub fn new(
        prefix: impl Into<String>,
        version: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        let prefix = prefix.into();
        Self {
            name: prefix.clone(),
            prefix,
            version: version.into(),
            namespace: namespace.into(),
            permissions: Vec::new(),
            every_page_hooks_on_system_pages: false,
            description: String::new(),
        }
    }

    /// Grants permission for a hook.
    pub fn with_permission(mut self, hook: impl Into<String>) -> Self {
        self.permissions.push(hook.into());
        self
    }

    /// Opts in to every-page hooks on system pages.
    pub fn with_system_page_hooks(mut self) -> Self {
        self.every_page_hooks_on_system_pages = true;
        self
    }
}
