//! Manifest-backed hook permissions.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use extmod_core::traits::PermissionSource;

use crate::loader::ModuleLoader;

/// Grants a hook when the module's manifest lists it by name, or by the
/// legacy alias `<alias_prefix><hook>`.
#[derive(Debug)]
pub struct ManifestPermissions {
    loader: Arc<dyn ModuleLoader>,
    alias_prefix: String,
}

impl ManifestPermissions {
    /// Creates a permission source reading manifests from `loader`.
    pub fn new(loader: Arc<dyn ModuleLoader>, alias_prefix: impl Into<String>) -> Self {
        Self {
            loader,
            alias_prefix: alias_prefix.into(),
        }
    }
}

#[async_trait]
impl PermissionSource for ManifestPermissions {
    async fn has_capability(&self, prefix: &str, version: &str, hook: &str) -> bool {
        let manifest = match self.loader.manifest(prefix, version).await {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(prefix = %prefix, version = %version, error = %e, "Cannot read module permissions");
                return false;
            }
        };
        let alias = format!("{}{hook}", self.alias_prefix);
        manifest
            .permissions
            .iter()
            .any(|granted| granted == hook || *granted == alias)
    }
}

#[cfg(test)]
mod tests {
    use extmod_core::types::manifest::ModuleManifest;

    use super::*;
    use crate::loader::{ModuleInstance, StaticModuleLoader};

    #[tokio::test]
    async fn test_exact_and_alias_permissions() {
        let loader = Arc::new(StaticModuleLoader::new());
        loader.register(
            ModuleManifest::new("alpha", "1.0.0", "alpha")
                .with_permission("save_record")
                .with_permission("hook_every_page_top"),
            ModuleInstance::new,
        );
        let permissions = ManifestPermissions::new(loader, "hook_");

        assert!(permissions.has_capability("alpha", "1.0.0", "save_record").await);
        assert!(permissions.has_capability("alpha", "1.0.0", "every_page_top").await);
        assert!(!permissions.has_capability("alpha", "1.0.0", "email").await);
        assert!(!permissions.has_capability("alpha", "9.9.9", "save_record").await);
    }
}
