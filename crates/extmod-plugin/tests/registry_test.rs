//! Integration tests for module enablement.

mod helpers;

use extmod_core::error::ErrorKind;
use extmod_core::types::id::ProjectId;
use extmod_core::types::manifest::ModuleManifest;
use extmod_core::types::value::SettingValue;
use extmod_plugin::ModuleInstance;

#[tokio::test]
async fn test_project_override_requires_system_version() {
    let app = helpers::TestHost::new();
    let registry = app.host.registry();
    let p = ProjectId::new(1);

    app.loader
        .register(ModuleManifest::new("m1", "1.0.0", "m1"), ModuleInstance::new);
    registry.enable_module("m1", "1.0.0").await.unwrap();
    registry.set_enabled_by_default("m1", false).await.unwrap();
    registry.enable_for_project("m1", p).await.unwrap();

    // m2 has a project override but was never installed.
    registry.enable_for_project("m2", p).await.unwrap();

    let enabled = registry.enabled_for(Some(p)).await.unwrap();
    assert_eq!(enabled.get("m1").map(String::as_str), Some("1.0.0"));
    assert!(!enabled.contains_key("m2"));

    assert!(registry.enabled_for(Some(ProjectId::new(2))).await.unwrap().is_empty());
    assert!(registry.enabled_for(None).await.unwrap().is_empty());

    // The override survives, but without a system version it grants nothing.
    registry.disable_module("m1").await.unwrap();
    assert_eq!(
        app.host.store().get_project("m1", p, "enabled").await.unwrap(),
        Some(SettingValue::Bool(true))
    );
    assert!(registry.enabled_for(Some(p)).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_default_enabled_module_can_be_disabled_per_project() {
    let app = helpers::TestHost::new();
    let registry = app.host.registry();
    app.install(ModuleManifest::new("m1", "1.0.0", "m1"), ModuleInstance::new)
        .await;

    let p = ProjectId::new(8);
    assert!(registry.is_enabled("m1", Some(p)).await.unwrap());

    registry.disable_for_project("m1", p).await.unwrap();
    assert!(!registry.is_enabled("m1", Some(p)).await.unwrap());
    assert!(registry.is_enabled("m1", Some(ProjectId::new(9))).await.unwrap());

    registry.disable_module("m1").await.unwrap();
    assert!(!registry.is_enabled("m1", Some(ProjectId::new(9))).await.unwrap());
    assert_eq!(registry.resolve_version("m1").await.unwrap(), None);
}

#[tokio::test]
async fn test_direct_store_writes_invalidate_registry() {
    let app = helpers::TestHost::new();
    let registry = app.host.registry();
    let store = app.host.store();

    assert_eq!(registry.resolve_version("m1").await.unwrap(), None);
    store.set_system("m1", "version", "3.2.1").await.unwrap();
    assert_eq!(
        registry.resolve_version("m1").await.unwrap().as_deref(),
        Some("3.2.1")
    );
}

#[tokio::test]
async fn test_two_prefixes_cannot_share_a_namespace() {
    let app = helpers::TestHost::new();
    app.install(
        ModuleManifest::new("survey_tools", "1.0.0", "survey-tools"),
        ModuleInstance::new,
    )
    .await;
    app.loader.register(
        ModuleManifest::new("survey_tools_copy", "1.0.0", "survey-tools"),
        ModuleInstance::new,
    );

    let err = app
        .host
        .registry()
        .enable_module("survey_tools_copy", "1.0.0")
        .await
        .unwrap_err();
    assert!(err.is(ErrorKind::DuplicateNamespace));
}
