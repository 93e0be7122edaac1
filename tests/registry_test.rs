use std::fs;

use tempfile::tempdir;
use vista::{
    error::ClassifierError,
    registry::{HealthStatus, ModelRegistry, PLACEHOLDER_MODEL_ID},
};

mod common;
use common::write_model;

#[test]
fn test_empty_directory_yields_placeholder() {
    let root = tempdir().unwrap();
    let registry = ModelRegistry::open(root.path(), "latest");

    let models = registry.list();
    assert_eq!(models.len(), 1);
    assert_eq!(models[0].id, PLACEHOLDER_MODEL_ID);
    assert_eq!(models[0].classes.len(), 50);

    let snapshot = registry.health_snapshot();
    assert_eq!(snapshot.status, HealthStatus::Degraded);
    assert_eq!(snapshot.models[PLACEHOLDER_MODEL_ID].status, HealthStatus::Healthy);
}

#[test]
fn test_missing_directory_yields_placeholder() {
    let root = tempdir().unwrap();
    let registry = ModelRegistry::open(root.path().join("absent"), "latest");
    assert_eq!(registry.default_id().as_deref(), Some(PLACEHOLDER_MODEL_ID));
}

#[test]
fn test_real_models_are_healthy_and_first_is_default() {
    let root = tempdir().unwrap();
    write_model(root.path(), "zebra", r#"{"classes": ["a", "b"]}"#);
    write_model(root.path(), "apple", r#"{"classes": ["c"]}"#);
    fs::create_dir(root.path().join("bare")).unwrap();

    let registry = ModelRegistry::open(root.path(), "latest");
    let ids: Vec<String> = registry.list().into_iter().map(|m| m.id).collect();
    assert_eq!(ids, vec!["apple", "bare", "zebra"]);
    assert_eq!(registry.default_id().as_deref(), Some("apple"));
    assert_eq!(registry.health_snapshot().status, HealthStatus::Healthy);

    // A directory without metadata gets the built-in class list.
    let bare = registry.get("bare").unwrap();
    assert_eq!(bare.info.classes.len(), bare.info.output_dim());
}

#[test]
fn test_health_tracks_error_rate() {
    for (total, failures) in [(2u64, 1u64), (2, 2), (10, 1), (10, 2), (10, 5), (10, 6), (20, 0)] {
        let root = tempdir().unwrap();
        let registry = ModelRegistry::open(root.path(), "latest");

        for _ in 0..(total - failures) {
            registry.record_outcome(PLACEHOLDER_MODEL_ID, 5.0, true);
        }
        let mut last_count = 0;
        for _ in 0..failures {
            registry.record_outcome(PLACEHOLDER_MODEL_ID, 5.0, false);
            let count = registry.get(PLACEHOLDER_MODEL_ID).unwrap().health.predictions;
            assert!(count > last_count);
            last_count = count;
        }

        let health = registry.get(PLACEHOLDER_MODEL_ID).unwrap().health;
        assert_eq!(health.predictions, total);
        assert_eq!(health.errors, failures);

        let rate = failures as f64 / total as f64;
        let expected = if rate > 0.5 {
            HealthStatus::Unhealthy
        } else if rate > 0.1 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        assert_eq!(health.status, expected, "{} failures of {}", failures, total);
    }
}

#[test]
fn test_unhealthy_model_recovers() {
    let root = tempdir().unwrap();
    let registry = ModelRegistry::open(root.path(), "latest");

    registry.record_outcome(PLACEHOLDER_MODEL_ID, 1.0, false);
    assert_eq!(
        registry.get(PLACEHOLDER_MODEL_ID).unwrap().health.status,
        HealthStatus::Unhealthy
    );

    for _ in 0..9 {
        registry.record_outcome(PLACEHOLDER_MODEL_ID, 1.0, true);
    }
    assert_eq!(
        registry.get(PLACEHOLDER_MODEL_ID).unwrap().health.status,
        HealthStatus::Healthy
    );
}

#[test]
fn test_reload_picks_up_new_metadata() {
    let root = tempdir().unwrap();
    write_model(root.path(), "pets", r#"{"name": "Pets", "classes": ["cat", "dog"]}"#);
    let registry = ModelRegistry::open(root.path(), "latest");
    registry.record_outcome("pets", 3.0, false);

    write_model(
        root.path(),
        "pets",
        r#"{"name": "Pets v2", "classes": ["cat", "dog", "bird"]}"#,
    );
    let model = registry.reload("pets").unwrap();
    assert_eq!(model.info.name, "Pets v2");
    assert_eq!(model.info.classes.len(), 3);
    // Counters start over.
    assert_eq!(model.health.predictions, 0);
    assert_eq!(model.health.status, HealthStatus::Healthy);
}

#[test]
fn test_reload_of_removed_model_fails() {
    let root = tempdir().unwrap();
    write_model(root.path(), "gone", r#"{"classes": ["x"]}"#);
    let registry = ModelRegistry::open(root.path(), "latest");

    fs::remove_dir_all(root.path().join("gone")).unwrap();
    assert!(matches!(
        registry.reload("gone"),
        Err(ClassifierError::ModelNotFound(_))
    ));
    assert!(registry.get("gone").is_err());
    // It was the only model: the placeholder takes over as default.
    assert_eq!(registry.default_id().as_deref(), Some(PLACEHOLDER_MODEL_ID));
    assert!(registry.default_model().is_ok());
}

#[test]
fn test_failed_reload_moves_default() {
    let root = tempdir().unwrap();
    write_model(root.path(), "a", r#"{"classes": ["x"]}"#);
    write_model(root.path(), "b", r#"{"classes": ["y"]}"#);
    let registry = ModelRegistry::open(root.path(), "latest");
    assert_eq!(registry.default_id().as_deref(), Some("a"));

    write_model(root.path(), "a", r#"{"output_shape": [3], "classes": ["x"]}"#);
    assert!(matches!(
        registry.reload("a"),
        Err(ClassifierError::InvalidModel { .. })
    ));
    assert_eq!(registry.default_id().as_deref(), Some("b"));
    assert_eq!(registry.default_model().unwrap().info.id, "b");
    assert!(registry.get(PLACEHOLDER_MODEL_ID).is_err());
}

#[test]
fn test_reload_placeholder_in_place() {
    let root = tempdir().unwrap();
    let registry = ModelRegistry::open(root.path(), "latest");
    registry.record_outcome(PLACEHOLDER_MODEL_ID, 5.0, false);

    let model = registry.reload(PLACEHOLDER_MODEL_ID).unwrap();
    assert_eq!(model.health.errors, 0);
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.default_id().as_deref(), Some(PLACEHOLDER_MODEL_ID));
    assert!(registry.is_healthy(PLACEHOLDER_MODEL_ID));
}

#[test]
fn test_status_counts() {
    let root = tempdir().unwrap();
    write_model(root.path(), "a", r#"{"classes": ["x"]}"#);
    write_model(root.path(), "b", r#"{"classes": ["y"]}"#);
    let registry = ModelRegistry::open(root.path(), "latest");
    registry.record_outcome("a", 10.0, true);
    registry.record_outcome("b", 30.0, true);

    let status = registry.status();
    assert_eq!(status.loaded_models, 2);
    assert_eq!(status.total_models, 2);
    assert_eq!(status.models["a"].predictions, 1);

    let (predictions, avg) = registry.totals();
    assert_eq!(predictions, 2);
    assert!((avg - 20.0).abs() < 1e-9);
}

#[test]
fn test_status_counts_rejected_directories() {
    let root = tempdir().unwrap();
    write_model(root.path(), "good", r#"{"classes": ["x", "y"]}"#);
    write_model(root.path(), "bad", r#"{"output_shape": [1000], "classes": ["x"]}"#);
    let registry = ModelRegistry::open(root.path(), "latest");

    let status = registry.status();
    assert_eq!(status.loaded_models, 1);
    assert_eq!(status.total_models, 2);
    assert!(status.models.contains_key("good"));
}
