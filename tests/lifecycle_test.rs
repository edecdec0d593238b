//! Integration tests for the full train-promote-predict lifecycle

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use sentinela::config::{ClusterConfig, PipelineConfig, SearchConfig};
use sentinela::run::{RunOutcome, RunRegistry};
use sentinela::store::registry::{ModelRegistry, Slot, SyncOutcome};
use sentinela::store::{LocalFsStore, ObjectStore};
use sentinela::{PredictionPipeline, TrainingPipeline};
use tempfile::tempdir;

const SENSORS: usize = 4;

fn write_schema(path: &Path) {
    let mut cols = String::new();
    let _ = write!(cols, "\"Wafer\": \"varchar\"");
    for i in 1..=SENSORS {
        let _ = write!(cols, ", \"Sensor-{i}\": \"float\"");
    }
    let _ = write!(cols, ", \"Good/Bad\": \"int\"");
    fs::write(
        path,
        format!(
            "{{\"NumberofColumns\": {}, \"ColName\": {{{cols}}}}}",
            SENSORS + 2
        ),
    )
    .unwrap();
}

/// Rows fall into two sensor regimes; the label follows Sensor-2.
fn write_raw_file(path: &Path, rows: usize, offset: f64, with_label: bool) {
    let mut text = String::from("Wafer");
    for i in 1..=SENSORS {
        let _ = write!(text, ",Sensor-{i}");
    }
    let _ = writeln!(text, ",Good/Bad");
    for i in 0..rows {
        let base = if i % 2 == 0 { 0.0 } else { 40.0 };
        let good = i % 4 < 2;
        let label = if good { -1 } else { 1 };
        let _ = writeln!(
            text,
            "wafer-{offset}-{i},{},{},{},{},{}",
            base + i as f64 * 0.01 + offset,
            if good { -1.0 } else { 1.0 },
            base * 0.5 + i as f64 * 0.02,
            base + 1.0,
            if with_label { label } else { 0 }
        );
    }
    fs::write(path, text).unwrap();
}

fn test_config(root: &Path) -> PipelineConfig {
    let schema_path = root.join("schema.json");
    write_schema(&schema_path);
    PipelineConfig {
        schema_path,
        artifact_root: root.join("artifacts"),
        store_root: root.join("object_store"),
        model_cache_dir: root.join("model_cache"),
        search: SearchConfig {
            n_iter: 1,
            ..Default::default()
        },
        cluster: ClusterConfig {
            max_k: 5,
            ..Default::default()
        },
        ..Default::default()
    }
}

#[test]
fn test_train_then_predict_over_local_store() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let store = LocalFsStore::new(&config.store_root);
    let runs = RunRegistry::new();

    let train_inbox = dir.path().join("train");
    fs::create_dir_all(&train_inbox).unwrap();
    write_raw_file(&train_inbox.join("wafer_15062023_143210.csv"), 30, 0.0, true);
    write_raw_file(&train_inbox.join("wafer_16062023_090000.csv"), 30, 0.1, true);

    let training = TrainingPipeline::new(&config, &runs, &store)
        .run(&train_inbox)
        .unwrap();
    assert_eq!(training.outcome, RunOutcome::Succeeded);
    assert_eq!(training.promoted_to, Some(Slot::Champion));
    assert!(training.clusters >= 2);
    for (_, auc) in &training.winners {
        assert!((0.0..=1.0).contains(auc));
    }

    // The generation is complete in the store: manifest plus one
    // bundle per cluster.
    let registry = ModelRegistry::new(&store);
    let manifest = registry.load_manifest(&training.run_id).unwrap();
    assert_eq!(manifest.clusters, training.clusters);
    assert_eq!(manifest.winning_auc.len(), training.clusters);

    let predict_inbox = dir.path().join("predict");
    fs::create_dir_all(&predict_inbox).unwrap();
    write_raw_file(
        &predict_inbox.join("wafer_17062023_110000.csv"),
        12,
        0.2,
        true,
    );

    let prediction = PredictionPipeline::new(&config, &runs, &store)
        .run(&predict_inbox)
        .unwrap();
    assert_eq!(prediction.outcome, RunOutcome::Succeeded);
    assert_eq!(prediction.scored_rows, 12);

    let feedback = fs::read_to_string(
        config
            .artifact_root
            .join(&prediction.run_id)
            .join("predictions_with_confidence.csv"),
    )
    .unwrap();
    assert!(feedback.starts_with("id,prediction,confidence,cluster"));
    assert_eq!(feedback.lines().count(), 13);
    for line in feedback.lines().skip(1) {
        let prediction = line.split(',').nth(1).unwrap();
        assert!(prediction == "Working" || prediction == "NotWorking");
    }

    // The scored batch was archived for later retraining.
    assert!(store
        .exists(&format!(
            "artifacts/retraining_data/{}.csv",
            prediction.run_id
        ))
        .unwrap());
}

#[test]
fn test_repeat_sync_downloads_nothing() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let store = LocalFsStore::new(&config.store_root);
    let runs = RunRegistry::new();

    let inbox = dir.path().join("train");
    fs::create_dir_all(&inbox).unwrap();
    write_raw_file(&inbox.join("wafer_15062023_143210.csv"), 30, 0.0, true);
    TrainingPipeline::new(&config, &runs, &store)
        .run(&inbox)
        .unwrap();

    let registry = ModelRegistry::new(&store);
    let first = registry
        .sync_cache(Slot::Champion, &config.model_cache_dir)
        .unwrap();
    assert!(matches!(first, SyncOutcome::Refreshed { .. }));

    let second = registry
        .sync_cache(Slot::Champion, &config.model_cache_dir)
        .unwrap();
    assert_eq!(second, SyncOutcome::Unchanged);
}

#[test]
fn test_retraining_replaces_the_champion() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let store = LocalFsStore::new(&config.store_root);
    let runs = RunRegistry::new();

    let inbox = dir.path().join("train");
    fs::create_dir_all(&inbox).unwrap();
    write_raw_file(&inbox.join("wafer_15062023_143210.csv"), 30, 0.0, true);

    let first = TrainingPipeline::new(&config, &runs, &store)
        .run(&inbox)
        .unwrap();
    // First generation always takes the champion slot.
    assert_eq!(first.promoted_to, Some(Slot::Champion));

    write_raw_file(&inbox.join("wafer_16062023_090000.csv"), 30, 0.1, true);
    let second = TrainingPipeline::new(&config, &runs, &store)
        .run(&inbox)
        .unwrap();
    assert!(second.promoted_to.is_some());

    let registry = ModelRegistry::new(&store);
    let promoted_slot = second.promoted_to.unwrap();
    let pointer = registry.current(promoted_slot).unwrap().unwrap();
    assert_eq!(pointer.run_id, second.run_id);

    // The first generation's objects are still in the store; only the
    // pointer moved.
    assert!(registry.load_manifest(&first.run_id).is_ok());
}

#[test]
fn test_rejected_files_are_quarantined() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let store = LocalFsStore::new(&config.store_root);
    let runs = RunRegistry::new();

    let inbox = dir.path().join("train");
    fs::create_dir_all(&inbox).unwrap();
    write_raw_file(&inbox.join("wafer_15062023_143210.csv"), 30, 0.0, true);
    // Wrong name grammar.
    write_raw_file(&inbox.join("sensors_dump.csv"), 10, 0.0, true);

    let report = TrainingPipeline::new(&config, &runs, &store)
        .run(&inbox)
        .unwrap();
    assert_eq!(report.accepted_files, 1);
    assert_eq!(report.rejected_files, 1);
}
