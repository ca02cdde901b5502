//! facecam - live object detection on a camera feed
//!
//! Provisions the model, opens the configured source, and shows annotated
//! frames until Escape is pressed, the window is closed, the stream ends, or
//! Ctrl-C is received.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::Ordering;

use facecam::{
    build_source, AppConfig, CaptureLoop, CaptureOptions, Detector, FailurePolicy,
    FrameSource, HeadlessDisplay, LabelSource, RunSummary, StubBackend, Ui,
};

#[derive(Parser, Debug)]
#[command(name = "facecam", version, about = "Live object detection on a camera feed")]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension)
    #[arg(long, value_name = "PATH", env = "FACECAM_CONFIG")]
    config: Option<PathBuf>,

    /// Frame source: camera index, /dev/videoN, http(s) URL, JPEG file/dir, or stub://name
    #[arg(long, value_name = "SOURCE")]
    source: Option<String>,

    /// Local model path
    #[arg(long, value_name = "PATH")]
    model: Option<PathBuf>,

    /// URL to download the model from when it is missing
    #[arg(long, value_name = "URL")]
    model_url: Option<String>,

    /// Use this local model if the download fails
    #[arg(long, value_name = "PATH")]
    fallback_model: Option<PathBuf>,

    /// Minimum confidence for a detection to be drawn
    #[arg(long, value_name = "0..1")]
    confidence: Option<f32>,

    /// Class label file, one label per line
    #[arg(long, value_name = "PATH")]
    labels_path: Option<PathBuf>,

    /// Detector backend (tract|stub)
    #[arg(long, value_name = "NAME")]
    backend: Option<String>,

    /// Run without a window
    #[arg(long)]
    headless: bool,

    /// Stop after this many frames
    #[arg(long, value_name = "N")]
    max_frames: Option<u64>,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let ui = Ui::from_args(Some(&args.ui), std::io::stderr().is_terminal());

    let cfg = {
        let _stage = ui.stage("Load configuration");
        load_config(&args)?
    };
    log::info!(
        "source={} model={} backend={} confidence={:.2}",
        cfg.source,
        cfg.model.path.display(),
        cfg.detector.backend,
        cfg.detector.confidence
    );

    let mut detector = build_detector(&cfg, &ui)?;
    {
        let _stage = ui.stage("Warm up detector");
        detector.warm_up()?;
    }

    let source = {
        let _stage = ui.stage("Prepare source");
        build_source(&cfg.source_spec()?, &cfg.capture)?
    };

    let mut capture = CaptureLoop::new(
        detector,
        CaptureOptions {
            confidence: cfg.detector.confidence,
            max_frames: cfg.max_frames,
        },
    )?;
    let stop = capture.stop_flag();
    ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))
        .context("install Ctrl-C handler")?;

    let summary = if cfg.window.headless {
        capture.run(source, |_, _| Ok(HeadlessDisplay::new()))?
    } else {
        run_windowed(&mut capture, source, &cfg)?
    };

    log_summary(&summary);
    if !summary.exit_reason.is_normal() {
        return Err(anyhow!("source {} could not be opened", summary.source));
    }
    Ok(())
}

fn load_config(args: &Args) -> Result<AppConfig> {
    let mut cfg = AppConfig::load(args.config.as_deref())?;
    if let Some(source) = &args.source {
        cfg.source = source.clone();
    }
    if let Some(model) = &args.model {
        cfg.model.path = model.clone();
    }
    if let Some(url) = &args.model_url {
        cfg.model.url = Some(url.clone());
    }
    if let Some(fallback) = &args.fallback_model {
        cfg.model.fallback_path = Some(fallback.clone());
        cfg.model.on_failure = FailurePolicy::Fallback;
    }
    if let Some(confidence) = args.confidence {
        cfg.detector.confidence = confidence;
    }
    if let Some(path) = &args.labels_path {
        cfg.detector.labels = LabelSource::File(path.clone());
    }
    if let Some(backend) = &args.backend {
        cfg.detector.backend = backend.clone();
    }
    if args.headless {
        cfg.window.headless = true;
    }
    if args.max_frames.is_some() {
        cfg.max_frames = args.max_frames;
    }
    cfg.validate()?;
    Ok(cfg)
}

fn build_detector(cfg: &AppConfig, ui: &Ui) -> Result<Detector> {
    match cfg.detector.backend.as_str() {
        "stub" => {
            log::warn!("stub backend selected; no model is loaded and nothing will be detected");
            Ok(Detector::new(StubBackend::empty(), cfg.class_table()?))
        }
        _ => build_tract_detector(cfg, ui),
    }
}

#[cfg(feature = "backend-tract")]
fn build_tract_detector(cfg: &AppConfig, ui: &Ui) -> Result<Detector> {
    use facecam::{ClassTable, ModelFile, ModelOrigin, TractBackend};

    let load = |file: &ModelFile| -> Result<(TractBackend, ClassTable)> {
        if let ModelOrigin::Fallback { reason } = &file.origin {
            log::warn!("running with fallback model {} ({})", file.path.display(), reason);
        }
        let classes = cfg.class_table_for(&file.origin)?;
        log::info!("model={} classes={}", file.path.display(), classes.len());
        let backend =
            TractBackend::load(&file.path, cfg.detector.input_size, cfg.yolo_params(&classes))?;
        Ok((backend, classes))
    };

    let _stage = ui.stage("Provision and load model");
    let ((backend, classes), _file) = provisioner(ui).provision(&cfg.model_spec(), load)?;
    Ok(Detector::new(backend, classes))
}

#[cfg(not(feature = "backend-tract"))]
fn build_tract_detector(_cfg: &AppConfig, _ui: &Ui) -> Result<Detector> {
    Err(anyhow!(
        "the tract backend is not compiled in (rebuild with --features backend-tract or use --backend stub)"
    ))
}

#[cfg(all(feature = "backend-tract", feature = "download"))]
fn provisioner(ui: &Ui) -> facecam::Provisioner<facecam::HttpFetcher> {
    facecam::Provisioner::new(facecam::HttpFetcher::new(ui.clone()))
}

#[cfg(all(feature = "backend-tract", not(feature = "download")))]
fn provisioner(_ui: &Ui) -> facecam::Provisioner<facecam::OfflineFetcher> {
    facecam::Provisioner::new(facecam::OfflineFetcher)
}

#[cfg(feature = "display-minifb")]
fn run_windowed(
    capture: &mut CaptureLoop,
    source: Box<dyn FrameSource>,
    cfg: &AppConfig,
) -> Result<RunSummary> {
    let settings = cfg.window.clone();
    capture.run(source, move |width, height| {
        facecam::WindowDisplay::open(&settings, width, height)
    })
}

#[cfg(not(feature = "display-minifb"))]
fn run_windowed(
    _capture: &mut CaptureLoop,
    _source: Box<dyn FrameSource>,
    _cfg: &AppConfig,
) -> Result<RunSummary> {
    Err(anyhow!(
        "no display support compiled in (rebuild with --features display-minifb or pass --headless)"
    ))
}

fn log_summary(summary: &RunSummary) {
    log::info!(
        "stopped: {} after {} frame(s) from {} ({} captured)",
        summary.exit_reason,
        summary.frames,
        summary.source,
        summary.frames_captured
    );
    log::info!(
        "detections={} avg_inference={:.1}ms fps={:.1}",
        summary.detections,
        summary.avg_inference_ms(),
        summary.fps()
    );
}
