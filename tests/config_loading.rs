use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::{Builder, NamedTempFile};

use facecam::config::{AppConfig, LabelSource};
use facecam::{FailurePolicy, ModelOrigin, SourceSpec};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "FACECAM_CONFIG",
        "FACECAM_SOURCE",
        "FACECAM_MODEL_PATH",
        "FACECAM_MODEL_URL",
        "FACECAM_CONFIDENCE",
        "FACECAM_LABELS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_json_config_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "model": {
            "path": "models/face.onnx",
            "url": "https://models.example/face.onnx",
            "on_download_failure": "fallback",
            "fallback_path": "models/backup.onnx"
        },
        "detector": {
            "confidence": 0.55,
            "iou_threshold": 0.5,
            "input_size": 320,
            "labels": ["person", "face"]
        },
        "source": {
            "uri": "stub://bench?frames=10",
            "width": 320,
            "height": 240,
            "target_fps": 15
        },
        "window": { "title": "bench", "width": 800, "height": 600 },
        "max_frames": 25
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("FACECAM_CONFIG", file.path());
    std::env::set_var("FACECAM_CONFIDENCE", "0.65");
    std::env::set_var("FACECAM_MODEL_PATH", "override.onnx");

    let cfg = AppConfig::load(None).expect("load config");
    assert_eq!(cfg.model.path, PathBuf::from("override.onnx"));
    assert_eq!(
        cfg.model.url.as_deref(),
        Some("https://models.example/face.onnx")
    );
    assert_eq!(cfg.model.on_failure, FailurePolicy::Fallback);
    assert_eq!(
        cfg.model.fallback_path,
        Some(PathBuf::from("models/backup.onnx"))
    );
    assert_eq!(cfg.detector.confidence, 0.65);
    assert_eq!(cfg.detector.iou_threshold, 0.5);
    assert_eq!(cfg.detector.input_size, 320);
    assert_eq!(
        cfg.detector.labels,
        LabelSource::Inline(vec!["person".to_string(), "face".to_string()])
    );
    assert_eq!(cfg.capture.width, 320);
    assert_eq!(cfg.capture.target_fps, 15);
    assert_eq!(cfg.window.title, "bench");
    assert_eq!(cfg.window.size, Some((800, 600)));
    assert_eq!(cfg.max_frames, Some(25));
    assert_eq!(
        cfg.source_spec().unwrap(),
        SourceSpec::Synthetic {
            name: "bench".to_string(),
            max_frames: Some(10),
        }
    );

    clear_env();
}

#[test]
fn loads_toml_config_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
max_frames = 3

[model]
path = "yolov8n.onnx"
fallback_labels = ["helmet", "vest"]

[detector]
backend = "Stub"
labels = ["coco"]

[source]
uri = "/dev/video2"

[window]
headless = true
"#;
    file.write_all(toml.as_bytes()).expect("write config");

    let cfg = AppConfig::load(Some(file.path())).expect("load config");
    assert_eq!(cfg.model.path, PathBuf::from("yolov8n.onnx"));
    assert_eq!(cfg.detector.backend, "stub");
    assert_eq!(cfg.detector.labels, LabelSource::Coco);
    assert_eq!(cfg.class_table().unwrap().label(0), "person");
    let fallback = cfg
        .class_table_for(&ModelOrigin::Fallback {
            reason: "offline".to_string(),
        })
        .unwrap();
    assert_eq!(fallback.label(1), "vest");
    assert!(cfg.window.headless);
    assert_eq!(
        cfg.source_spec().unwrap(),
        SourceSpec::Device("/dev/video2".to_string())
    );
}

#[test]
fn env_labels_and_source_apply_without_a_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("FACECAM_SOURCE", "1");
    std::env::set_var("FACECAM_LABELS", "cat, dog,,");
    std::env::set_var("FACECAM_MODEL_URL", "http://127.0.0.1:9/model.onnx");

    let cfg = AppConfig::load(None).expect("load config");
    assert_eq!(
        cfg.source_spec().unwrap(),
        SourceSpec::Device("/dev/video1".to_string())
    );
    assert_eq!(
        cfg.detector.labels,
        LabelSource::Inline(vec!["cat".to_string(), "dog".to_string()])
    );
    assert_eq!(
        cfg.model.url.as_deref(),
        Some("http://127.0.0.1:9/model.onnx")
    );

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("FACECAM_CONFIDENCE", "high");
    assert!(AppConfig::load(None).is_err());
    std::env::set_var("FACECAM_CONFIDENCE", "1.5");
    assert!(AppConfig::load(None).is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(br#"{ "detector": { "threshold": 0.3 } }"#)
        .expect("write config");
    let err = AppConfig::load(Some(file.path())).unwrap_err();
    assert!(format!("{:#}", err).contains("invalid config file"));

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(br#"{ "model": { "on_download_failure": "fallback" } }"#)
        .expect("write config");
    assert!(AppConfig::load(Some(file.path())).is_err());

    assert!(AppConfig::load(Some(std::path::Path::new("/nonexistent/facecam.json"))).is_err());
}

#[cfg(all(feature = "ingest-v4l2", target_os = "linux"))]
#[test]
fn default_source_builds_a_camera_source() {
    let cfg = AppConfig::default();
    let source = facecam::build_source(&cfg.source_spec().unwrap(), &cfg.capture).unwrap();
    assert_eq!(source.describe(), "/dev/video0");
}
