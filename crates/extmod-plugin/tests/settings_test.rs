//! Integration tests for the module settings store.

mod helpers;

use std::collections::BTreeMap;
use std::sync::Arc;

use extmod_core::config::{HooksConfig, SettingsConfig};
use extmod_core::error::ErrorKind;
use extmod_core::traits::SettingsRepository;
use extmod_core::types::id::ProjectId;
use extmod_core::types::value::SettingValue;

#[tokio::test]
async fn test_values_round_trip_through_module_settings() {
    let app = helpers::TestHost::new();
    let settings = app.host.module_settings("reports", None);

    let mut nested = BTreeMap::new();
    nested.insert("enabled".to_string(), SettingValue::Bool(true));
    nested.insert("limits".to_string(), SettingValue::from(vec![10, 20]));

    let cases = vec![
        ("bool", SettingValue::Bool(true)),
        ("int", SettingValue::Int(i64::MAX)),
        ("float", SettingValue::Float(-1.5)),
        ("string", SettingValue::from("a \"quoted\" value")),
        ("array", SettingValue::from(vec!["x", "y"])),
        ("object", SettingValue::Object(nested)),
    ];

    for (key, value) in &cases {
        settings.set_system(key, value.clone()).await.unwrap();
    }
    for (key, value) in &cases {
        assert_eq!(settings.get_system(key).await.unwrap().as_ref(), Some(value));
    }

    let all = settings.get_all().await.unwrap();
    assert_eq!(all.len(), cases.len());
}

#[tokio::test]
async fn test_second_identical_write_is_noop() {
    let app = helpers::TestHost::new();
    let store = app.host.store();

    assert!(store.set_system("reports", "title", "Monthly").await.unwrap());
    let writes = app.repo.write_count();
    assert!(!store.set_system("reports", "title", "Monthly").await.unwrap());
    assert_eq!(app.repo.write_count(), writes);
}

#[tokio::test]
async fn test_project_value_overrides_system_value() {
    let app = helpers::TestHost::new();
    let store = app.host.store();
    let p = ProjectId::new(12);

    store.set_system("reports", "k", "S").await.unwrap();
    store.set_project("reports", p, "k", "T").await.unwrap();
    assert_eq!(
        store.get_effective("reports", p, "k").await.unwrap(),
        Some(SettingValue::from("T"))
    );

    store.remove_project("reports", p, "k").await.unwrap();
    assert_eq!(
        store.get_effective("reports", p, "k").await.unwrap(),
        Some(SettingValue::from("S"))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_writes_leave_one_row() {
    let app = helpers::TestHost::new();
    let store = app.host.store().clone();

    let mut tasks = Vec::new();
    for i in 0..16_i64 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            store.set_system("reports", "counter", i).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let module_id = app.repo.module_id("reports").await.unwrap();
    assert_eq!(app.repo.row_count(module_id, None, "counter").await, 1);
    let value = store.get_system("reports", "counter").await.unwrap();
    assert!(matches!(value, Some(SettingValue::Int(i)) if (0..16).contains(&i)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_project_writes_stay_per_scope() {
    let app = helpers::TestHost::new();
    let store = app.host.store().clone();

    let mut tasks = Vec::new();
    for project in 1..=4_i64 {
        for round in 0..4_i64 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .set_project("reports", ProjectId::new(project), "owner", round)
                    .await
            }));
        }
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let module_id = app.repo.module_id("reports").await.unwrap();
    for project in 1..=4_i64 {
        assert_eq!(
            app.repo
                .row_count(module_id, Some(ProjectId::new(project)), "owner")
                .await,
            1
        );
    }
    assert_eq!(app.repo.row_count(module_id, None, "owner").await, 0);
}

#[tokio::test]
async fn test_value_size_limit() {
    let settings = SettingsConfig {
        value_size_limit: 32,
        ..SettingsConfig::default()
    };
    let app = helpers::TestHost::with_config(settings, HooksConfig::default());
    let store = app.host.store();

    let at_limit = "x".repeat(32);
    assert!(store.set_system("reports", "blob", at_limit.as_str()).await.unwrap());

    let err = store
        .set_system("reports", "blob", "y".repeat(33))
        .await
        .unwrap_err();
    assert!(err.is(ErrorKind::LimitExceeded));
    assert_eq!(
        store.get_system("reports", "blob").await.unwrap(),
        Some(SettingValue::from(at_limit))
    );
}

#[tokio::test]
async fn test_remove_all_clears_one_scope() {
    let app = helpers::TestHost::new();
    let store = Arc::clone(app.host.store());
    let p = ProjectId::new(3);

    store.set_project("reports", p, "a", 1).await.unwrap();
    store.set_project("reports", p, "b", 2).await.unwrap();
    store.set_system("reports", "a", 0).await.unwrap();

    assert_eq!(store.remove_all("reports", Some(p)).await.unwrap(), 2);
    assert!(store.get_all("reports", Some(p)).await.unwrap().is_empty());
    assert_eq!(
        store.get_effective("reports", p, "a").await.unwrap(),
        Some(SettingValue::Int(0))
    );
}
