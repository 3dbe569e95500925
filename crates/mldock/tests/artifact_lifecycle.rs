use std::collections::BTreeMap;
use std::fs;
use std::fs::File;
use std::path::Path;

use mldock::Error;
use mldock::artifacts::ArtifactManager;
use mldock::lifecycle::{ServingLifecycle, TrainingLifecycle};
use mldock::transfer::ARCHIVE_NAME;

fn write(path: &Path, body: &str) {
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(path, body).expect("write");
}

fn env(base: &Path, pairs: &[(&str, String)]) -> BTreeMap<String, String> {
    let mut env: BTreeMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    env.insert("MLDOCK_BASE_DIR".into(), base.to_string_lossy().to_string());
    env
}

fn zip_names(path: &Path) -> Vec<String> {
    let file = File::open(path).expect("open zip");
    let archive = zip::ZipArchive::new(file).expect("read zip");
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| !n.ends_with('/'))
        .map(str::to_string)
        .collect();
    names.sort();
    names
}

#[test]
fn input_channel_is_downloaded_into_input_data() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let source = tmp.path().join("datasets/iris");
    write(&source.join("iris.csv"), "5.1,3.5,1.4,0.2,setosa\n");
    let base = tmp.path().join("opt/ml");

    let manager = ArtifactManager::from_env(env(
        &base,
        &[("MLDOCK_INPUT_CHANNEL_IRIS", source.to_string_lossy().to_string())],
    ));
    let report = manager.setup_inputs().expect("setup inputs");

    assert_eq!(report.synced, vec!["MLDOCK_INPUT_CHANNEL_IRIS".to_string()]);
    let landed = base.join("input/data/iris/iris.csv");
    assert_eq!(
        fs::read_to_string(landed).expect("landed"),
        "5.1,3.5,1.4,0.2,setosa\n"
    );

    // Present locally now, so a second run leaves it alone.
    let again = manager.setup_inputs().expect("setup inputs again");
    assert!(again.synced.is_empty());
    assert_eq!(again.skipped.len(), 1);
}

#[test]
fn model_output_channel_uploads_a_single_archive() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let base = tmp.path().join("opt/ml");
    let remote = tmp.path().join("bucket/models/iris");
    write(&base.join("model/iris/model.pkl"), "weights");
    write(&base.join("model/iris/extra/metrics.json"), "{}");

    let manager = ArtifactManager::from_env(env(
        &base,
        &[(
            "MLDOCK_MODEL_OUTPUT_CHANNEL_IRIS",
            remote.to_string_lossy().to_string(),
        )],
    ));
    manager.cleanup_model_artifacts().expect("cleanup");

    let uploaded: Vec<String> = fs::read_dir(&remote)
        .expect("remote")
        .map(|e| e.expect("entry").file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(uploaded, vec![ARCHIVE_NAME.to_string()]);
    assert_eq!(
        zip_names(&remote.join(ARCHIVE_NAME)),
        vec!["extra/metrics.json".to_string(), "model.pkl".to_string()]
    );
}

#[test]
fn output_channel_without_local_directory_is_skipped() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let base = tmp.path().join("opt/ml");
    let remote = tmp.path().join("remote");

    let manager = ArtifactManager::from_env(env(
        &base,
        &[("MLDOCK_OUTPUT_CHANNEL_REPORTS", remote.to_string_lossy().to_string())],
    ));
    let report = manager.cleanup_outputs().expect("cleanup outputs");
    assert_eq!(report.skipped, vec!["MLDOCK_OUTPUT_CHANNEL_REPORTS".to_string()]);
    assert!(!remote.exists());
}

#[test]
fn non_prod_stage_does_not_sync() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let base = tmp.path().join("opt/ml");
    let source = tmp.path().join("src");
    write(&source.join("x.csv"), "1");

    let lifecycle = TrainingLifecycle::new(ArtifactManager::from_env(env(
        &base,
        &[
            ("MLDOCK_STAGE", "dev".to_string()),
            ("MLDOCK_INPUT_CHANNEL_X", source.to_string_lossy().to_string()),
        ],
    )));
    let layout = lifecycle.startup().expect("startup");
    assert!(layout.input_data_dir().is_dir());
    assert!(!layout.input_data_dir().join("x").exists());
}

#[test]
fn prod_training_run_syncs_both_ways() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let base = tmp.path().join("opt/ml");
    let source = tmp.path().join("src/train");
    let model_remote = tmp.path().join("remote/model");
    write(&source.join("rows.csv"), "1,2\n");

    let lifecycle = TrainingLifecycle::new(ArtifactManager::from_env(env(
        &base,
        &[
            ("MLDOCK_STAGE", "prod".to_string()),
            ("MLDOCK_HYPERPARAMETERS", r#"{"epochs": 2}"#.to_string()),
            ("MLDOCK_INPUT_CHANNEL_TRAIN", source.to_string_lossy().to_string()),
            (
                "MLDOCK_MODEL_OUTPUT_CHANNEL",
                model_remote.to_string_lossy().to_string(),
            ),
        ],
    )));

    let rows = lifecycle
        .run(|layout| {
            let rows = fs::read_to_string(layout.input_data_dir().join("train/rows.csv"))
                .map_err(Error::from)?;
            fs::write(layout.model_dir().join("model.bin"), "trained").map_err(Error::from)?;
            let hp = layout.read_hyperparameters()?;
            assert_eq!(hp["epochs"], 2);
            Ok(rows)
        })
        .expect("training run");

    assert_eq!(rows, "1,2\n");
    assert!(model_remote.join(ARCHIVE_NAME).is_file());
}

#[test]
fn failed_training_writes_failure_file_and_still_cleans_up() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let base = tmp.path().join("opt/ml");
    let model_remote = tmp.path().join("remote/model");

    let lifecycle = TrainingLifecycle::new(ArtifactManager::from_env(env(
        &base,
        &[
            ("MLDOCK_STAGE", "prod".to_string()),
            (
                "MLDOCK_MODEL_OUTPUT_CHANNEL_BEST",
                model_remote.to_string_lossy().to_string(),
            ),
        ],
    )));

    let err = lifecycle
        .run(|layout| -> mldock::Result<()> {
            write(&layout.model_dir().join("best/partial.bin"), "partial");
            Err(Error::msg("loss diverged"))
        })
        .unwrap_err();

    assert!(err.to_string().contains("loss diverged"));
    let failure = fs::read_to_string(base.join("output/failure")).expect("failure file");
    assert!(failure.starts_with("Exception during training:"), "{failure}");
    assert!(failure.contains("loss diverged"));
    assert!(model_remote.join(ARCHIVE_NAME).is_file());
}

#[test]
fn serving_startup_fills_model_dir_from_bare_channel() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let base = tmp.path().join("opt/ml");
    let source = tmp.path().join("registry/iris");
    write(&source.join("weights.bin"), "w");

    let lifecycle = ServingLifecycle::new(ArtifactManager::from_env(env(
        &base,
        &[
            ("MLDOCK_STAGE", "prod".to_string()),
            ("MLDOCK_MODEL_INPUT_CHANNEL", source.to_string_lossy().to_string()),
        ],
    )));
    let layout = lifecycle.startup().expect("startup");

    assert_eq!(
        fs::read_to_string(layout.model_dir().join("weights.bin")).expect("weights"),
        "w"
    );
}
