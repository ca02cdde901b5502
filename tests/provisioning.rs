use std::cell::Cell;
use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};

use facecam::{FailurePolicy, ModelFetcher, ModelOrigin, ModelSpec, OfflineFetcher, Provisioner};

/// Serves fixed bytes, or fails after writing a prefix. Counts calls.
struct MockFetcher {
    body: Vec<u8>,
    fail_after_write: bool,
    calls: Cell<usize>,
}

impl MockFetcher {
    fn serving(body: &[u8]) -> Self {
        Self {
            body: body.to_vec(),
            fail_after_write: false,
            calls: Cell::new(0),
        }
    }

    fn broken_midway(prefix: &[u8]) -> Self {
        Self {
            body: prefix.to_vec(),
            fail_after_write: true,
            calls: Cell::new(0),
        }
    }
}

impl ModelFetcher for MockFetcher {
    fn fetch(&self, url: &str, sink: &mut dyn Write) -> Result<u64> {
        self.calls.set(self.calls.get() + 1);
        sink.write_all(&self.body)?;
        if self.fail_after_write {
            return Err(anyhow!("connection reset while fetching {}", url));
        }
        Ok(self.body.len() as u64)
    }
}

impl ModelFetcher for &MockFetcher {
    fn fetch(&self, url: &str, sink: &mut dyn Write) -> Result<u64> {
        (*self).fetch(url, sink)
    }
}

fn spec_with_url(path: &Path) -> ModelSpec {
    ModelSpec {
        url: Some("http://127.0.0.1:9/model.onnx".to_string()),
        ..ModelSpec::local(path)
    }
}

fn part_path(path: &Path) -> std::path::PathBuf {
    let mut name = path.file_name().unwrap().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

#[test]
fn local_model_is_used_without_network_access() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.onnx");
    fs::write(&path, b"local weights").unwrap();

    let fetcher = MockFetcher::serving(b"remote weights");
    let file = Provisioner::new(&fetcher)
        .ensure(&spec_with_url(&path))
        .unwrap();

    assert_eq!(file.origin, ModelOrigin::Local);
    assert_eq!(file.path, path);
    assert_eq!(fetcher.calls.get(), 0);
    assert_eq!(fs::read(&path).unwrap(), b"local weights");
}

#[test]
fn missing_model_is_downloaded_and_committed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("model.onnx");
    let body = b"onnx bytes";

    let mut spec = spec_with_url(&path);
    spec.sha256 = Some(hex::encode(Sha256::digest(body)));

    let fetcher = MockFetcher::serving(body);
    let file = Provisioner::new(&fetcher).ensure(&spec).unwrap();

    assert_eq!(file.origin, ModelOrigin::Downloaded { bytes: 10 });
    assert_eq!(fs::read(&path).unwrap(), body);
    assert!(!part_path(&path).exists());
    assert_eq!(fetcher.calls.get(), 1);
}

#[test]
fn unreachable_url_fails_and_removes_partial_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.onnx");

    let fetcher = MockFetcher::broken_midway(b"half a model");
    let err = Provisioner::new(&fetcher)
        .ensure(&spec_with_url(&path))
        .unwrap_err();

    let message = format!("{:#}", err);
    assert!(message.contains("could not provision model"), "{}", message);
    assert!(message.contains("connection reset"), "{}", message);
    assert!(!path.exists());
    assert!(!part_path(&path).exists());
}

#[test]
fn offline_fetcher_reports_a_clear_failure() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.onnx");

    let err = Provisioner::new(OfflineFetcher)
        .ensure(&spec_with_url(&path))
        .unwrap_err();
    assert!(format!("{:#}", err).contains("downloads are disabled"));
    assert!(!part_path(&path).exists());
}

#[test]
fn missing_model_without_url_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.onnx");

    let fetcher = MockFetcher::serving(b"unused");
    let err = Provisioner::new(&fetcher)
        .ensure(&ModelSpec::local(&path))
        .unwrap_err();
    assert!(format!("{:#}", err).contains("no download url"));
    assert_eq!(fetcher.calls.get(), 0);
}

#[test]
fn empty_download_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.onnx");

    let fetcher = MockFetcher::serving(b"");
    let err = Provisioner::new(&fetcher)
        .ensure(&spec_with_url(&path))
        .unwrap_err();
    assert!(format!("{:#}", err).contains("empty file"));
    assert!(!path.exists());
    assert!(!part_path(&path).exists());
}

#[test]
fn checksum_mismatch_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.onnx");

    let mut spec = spec_with_url(&path);
    spec.sha256 = Some(hex::encode(Sha256::digest(b"expected bytes")));

    let fetcher = MockFetcher::serving(b"tampered bytes");
    let err = Provisioner::new(&fetcher).ensure(&spec).unwrap_err();
    assert!(format!("{:#}", err).contains("checksum mismatch"));
    assert!(!path.exists());
    assert!(!part_path(&path).exists());
}

#[test]
fn fallback_policy_substitutes_the_local_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.onnx");
    let fallback = dir.path().join("backup.onnx");
    fs::write(&fallback, b"backup weights").unwrap();

    let mut spec = spec_with_url(&path);
    spec.on_failure = FailurePolicy::Fallback;
    spec.fallback_path = Some(fallback.clone());

    let fetcher = MockFetcher::broken_midway(b"partial");
    let file = Provisioner::new(&fetcher).ensure(&spec).unwrap();

    assert_eq!(file.path, fallback);
    match file.origin {
        ModelOrigin::Fallback { reason } => assert!(reason.contains("connection reset")),
        other => panic!("expected fallback origin, got {:?}", other),
    }
    assert!(!part_path(&path).exists());
}

#[test]
fn fallback_policy_still_fails_when_fallback_is_missing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.onnx");

    let mut spec = spec_with_url(&path);
    spec.on_failure = FailurePolicy::Fallback;
    spec.fallback_path = Some(dir.path().join("absent.onnx"));

    let fetcher = MockFetcher::broken_midway(b"partial");
    let err = Provisioner::new(&fetcher).ensure(&spec).unwrap_err();
    assert!(format!("{:#}", err).contains("not available either"));
}

#[test]
fn loader_runs_once_on_the_committed_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.onnx");
    let fetcher = MockFetcher::serving(b"weights");

    let (handle, file) = Provisioner::new(&fetcher)
        .provision(&spec_with_url(&path), |file| Ok(fs::read(&file.path)?))
        .unwrap();
    assert_eq!(handle, b"weights");
    assert_eq!(file.path, path);

    let err = Provisioner::new(&fetcher)
        .provision(&spec_with_url(&path), |_| -> Result<()> {
            Err(anyhow!("not an onnx graph"))
        })
        .unwrap_err();
    assert!(format!("{:#}", err).contains("failed to load model"));
}
