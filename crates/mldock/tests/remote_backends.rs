#![cfg(unix)]

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use mldock::Error;
use mldock::artifacts::{ArtifactManager, SchemeTransport};
use mldock::container::ContainerSettings;
use mldock::storage::{Backend, BackendSettings, resolve_with};
use mldock::transfer::{self, ARCHIVE_NAME};

// Minimal stand-in for `aws s3 cp|ls` backed by a directory tree.
const FAKE_AWS: &str = r#"#!/bin/sh
root="$FAKE_REMOTE_ROOT"
while [ "$#" -gt 0 ] && [ "$1" != "s3" ]; do shift; done
shift
op="$1"; shift
case "$op" in
  ls)
    [ "$1" = "--recursive" ] && shift
    url="${1#s3://}"
    bucket="${url%%/*}"
    prefix="${url#*/}"
    [ -d "$root/$bucket" ] || exit 1
    cd "$root/$bucket" || exit 1
    find . -type f | sed 's|^\./||' | sort | while read -r key; do
      case "$key" in
        "$prefix"*) echo "2024-01-01 00:00:00 1 $key" ;;
      esac
    done
    ;;
  cp)
    [ "$1" = "--only-show-errors" ] && shift
    src="$1"; dst="$2"
    case "$src" in s3://*) src="$root/${src#s3://}" ;; esac
    case "$dst" in s3://*) dst="$root/${dst#s3://}" ;; esac
    mkdir -p "$(dirname "$dst")"
    cp "$src" "$dst"
    ;;
  *)
    echo "unexpected op $op" >&2
    exit 2
    ;;
esac
"#;

// Minimal stand-in for `gcloud storage cp|ls`.
const FAKE_GCLOUD: &str = r#"#!/bin/sh
root="$FAKE_REMOTE_ROOT"
[ "$1" = "storage" ] && shift
if [ "$1" = "--project" ]; then shift 2; fi
op="$1"; shift
case "$op" in
  ls)
    url="${1#gs://}"
    url="${url%\*\*}"
    bucket="${url%%/*}"
    prefix="${url#*/}"
    found=""
    if [ -d "$root/$bucket" ]; then
      found=$(cd "$root/$bucket" && find . -type f | sed 's|^\./||' | sort | while read -r key; do
        case "$key" in
          "$prefix"*) echo "gs://$bucket/$key" ;;
        esac
      done)
    fi
    if [ -z "$found" ]; then
      echo "ERROR: (gcloud.storage.ls) One or more URLs matched no objects." >&2
      exit 1
    fi
    echo "$found"
    ;;
  cp)
    src="$1"; dst="$2"
    case "$src" in gs://*) src="$root/${src#gs://}" ;; esac
    case "$dst" in gs://*) dst="$root/${dst#gs://}" ;; esac
    mkdir -p "$(dirname "$dst")"
    cp "$src" "$dst"
    ;;
esac
"#;

const NO_CREDENTIALS: &str = r#"#!/bin/sh
echo "fatal error: Unable to locate credentials. You can configure credentials by running \"aws configure\"." >&2
exit 255
"#;

fn install_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).expect("write script");
    let mut perms = fs::metadata(&path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("chmod");
    path
}

fn write(path: &Path, body: &str) {
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(path, body).expect("write");
}

struct FakeRemote {
    _tmp: tempfile::TempDir,
    root: PathBuf,
    work: PathBuf,
    settings: BackendSettings,
}

fn fake_remote() -> FakeRemote {
    let tmp = tempfile::tempdir().expect("tempdir");
    let bin = tmp.path().join("bin");
    let root = tmp.path().join("remote");
    let work = tmp.path().join("work");
    fs::create_dir_all(&bin).expect("bin");
    fs::create_dir_all(&root).expect("root");
    fs::create_dir_all(&work).expect("work");

    let mut settings = BackendSettings::default();
    settings.aws_program = install_script(&bin, "aws", FAKE_AWS)
        .to_string_lossy()
        .to_string();
    settings.gcloud_program = install_script(&bin, "gcloud", FAKE_GCLOUD)
        .to_string_lossy()
        .to_string();
    settings
        .command_env
        .insert("FAKE_REMOTE_ROOT".into(), root.to_string_lossy().to_string());
    FakeRemote {
        _tmp: tmp,
        root,
        work,
        settings,
    }
}

#[test]
fn s3_upload_and_download_round_trip() {
    let fake = fake_remote();
    let src = fake.work.join("src");
    write(&src.join("a.csv"), "a");
    write(&src.join("nested/b.csv"), "b");

    let (handle, base) = resolve_with("s3://bucket/projects/iris", &fake.settings).expect("resolve");
    assert_eq!(handle.backend(), Backend::S3);
    let up = transfer::upload(&handle, &base, &src, "data/train", false).expect("upload");
    assert_eq!(up.transferred.len(), 2);
    assert!(fake.root.join("bucket/projects/iris/data/train/b.csv").is_file());

    let dest = fake.work.join("dest");
    let down = transfer::download(&handle, &base, "data/train", &dest).expect("download");
    assert_eq!(down.transferred.len(), 2);
    assert_eq!(fs::read_to_string(dest.join("a.csv")).expect("a"), "a");
    assert_eq!(fs::read_to_string(dest.join("b.csv")).expect("b"), "b");
}

#[test]
fn s3_listing_respects_prefix_boundaries() {
    let fake = fake_remote();
    write(&fake.root.join("bucket/data/train/x.csv"), "x");
    write(&fake.root.join("bucket/data/training/y.csv"), "y");

    let (handle, base) = resolve_with("s3://bucket/data/train", &fake.settings).expect("resolve");
    let dest = fake.work.join("dest");
    transfer::download(&handle, &base, ".", &dest).expect("download");
    assert!(dest.join("x.csv").is_file());
    assert!(!dest.join("y.csv").exists());
}

#[test]
fn s3_missing_prefix_downloads_nothing() {
    let fake = fake_remote();
    let (handle, base) = resolve_with("s3://empty-bucket/none", &fake.settings).expect("resolve");
    let report = transfer::download(&handle, &base, ".", &fake.work.join("dest")).expect("download");
    assert!(report.is_empty());
}

#[test]
fn gcs_archived_upload_extracts_on_download() {
    let fake = fake_remote();
    let model = fake.work.join("model");
    write(&model.join("weights.bin"), "w");
    write(&model.join("cfg/params.json"), "{}");

    let (handle, base) = resolve_with("gs://models/iris/v1", &fake.settings).expect("resolve");
    assert_eq!(handle.backend(), Backend::Gcs);
    transfer::upload(&handle, &base, &model, ".", true).expect("upload");
    assert!(fake.root.join("models/iris/v1").join(ARCHIVE_NAME).is_file());

    let dest = fake.work.join("restored");
    let report = transfer::download(&handle, &base, ".", &dest).expect("download");
    assert_eq!(report.extracted.len(), 1);
    assert!(!dest.join(ARCHIVE_NAME).exists());
    assert!(dest.join("weights.bin").is_file());
    assert!(dest.join("cfg/params.json").is_file());
}

#[test]
fn gcs_no_matches_is_empty() {
    let fake = fake_remote();
    let (handle, base) = resolve_with("gs://nothing/here", &fake.settings).expect("resolve");
    let report = transfer::download(&handle, &base, ".", &fake.work.join("dest")).expect("download");
    assert!(report.is_empty());
}

#[test]
fn missing_cli_is_backend_unavailable() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let mut settings = BackendSettings::default();
    settings.aws_program = tmp.path().join("no-such-aws").to_string_lossy().to_string();

    let (handle, base) = resolve_with("s3://bucket/key", &settings).expect("resolve");
    let err = transfer::download(&handle, &base, ".", &tmp.path().join("dest")).unwrap_err();
    assert!(
        matches!(err, Error::BackendUnavailable { backend: Backend::S3, .. }),
        "{err}"
    );
    assert_eq!(err.exit_code(), 1);
}

#[test]
fn credential_failure_is_backend_unavailable() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let src = tmp.path().join("src");
    write(&src.join("a.txt"), "a");
    let mut settings = BackendSettings::default();
    settings.aws_program = install_script(tmp.path(), "aws", NO_CREDENTIALS)
        .to_string_lossy()
        .to_string();

    let (handle, base) = resolve_with("s3://bucket/key", &settings).expect("resolve");
    let err = transfer::upload(&handle, &base, &src, ".", false).unwrap_err();
    assert!(matches!(err, Error::BackendUnavailable { .. }), "{err}");
    assert!(err.to_string().contains("Unable to locate credentials"), "{err}");
}

#[test]
fn artifact_manager_syncs_through_s3() {
    let fake = fake_remote();
    write(&fake.root.join("bucket/iris/train.csv"), "rows");
    let base = fake.work.join("opt/ml");
    write(&base.join("model/model.pkl"), "trained");

    let mut env = BTreeMap::new();
    env.insert("MLDOCK_BASE_DIR".to_string(), base.to_string_lossy().to_string());
    env.insert("MLDOCK_INPUT_CHANNEL_IRIS".to_string(), "s3://bucket/iris".to_string());
    env.insert("MLDOCK_MODEL_OUTPUT_CHANNEL".to_string(), "s3://bucket/models/iris".to_string());
    let settings = ContainerSettings::from_env(&env);
    let manager = ArtifactManager::new(SchemeTransport::new(fake.settings.clone()), settings, env);

    manager.setup_inputs().expect("setup inputs");
    assert_eq!(
        fs::read_to_string(base.join("input/data/iris/train.csv")).expect("train"),
        "rows"
    );

    manager.cleanup_model_artifacts().expect("cleanup");
    assert!(fake.root.join("bucket/models/iris").join(ARCHIVE_NAME).is_file());
}
