use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use cropcam::capture::{FrameSource, TestPatternSource};
use cropcam::classify::Classifier;
use cropcam::config::{DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_HEALTHY_LABEL, DEFAULT_LABELS};
use cropcam::output::{NullOutput, OutputSink};
use cropcam::snapshot::SnapshotRecord;
use cropcam::{
    CaptureSession, CaptureSettings, OpenError, OverlayPolicy, SessionConfig, SessionHandle,
};
use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;

/// How long the keyboard thread waits for a snapshot to be written.
const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Continuous detection with overlay
    Realtime,
    /// Capture one image, analyze and save it
    Capture,
    /// Report camera status as JSON
    Status,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Detection mode
    #[arg(long, value_enum, default_value_t = Mode::Realtime)]
    mode: Mode,

    /// Input webcam device index
    #[arg(short, long, env = "CAMERA_INDEX", default_value_t = 0)]
    input_device: u32,

    /// Capture resolution width
    #[arg(long, env = "FRAME_WIDTH", default_value_t = 640)]
    capture_width: u32,

    /// Capture resolution height
    #[arg(long, env = "FRAME_HEIGHT", default_value_t = 480)]
    capture_height: u32,

    /// Target frames per second
    #[arg(long, env = "FPS", default_value_t = 30)]
    fps: u32,

    /// Use a synthetic test pattern instead of a camera
    #[arg(long)]
    test_pattern: bool,

    /// Output v4l2loopback device path
    /// If not provided, annotated frames are discarded
    #[arg(short, long)]
    output_device: Option<PathBuf>,

    /// Output resolution width
    #[arg(long, default_value_t = 640)]
    output_width: u32,

    /// Output resolution height
    #[arg(long, default_value_t = 480)]
    output_height: u32,

    /// Path to classifier model (ONNX file)
    /// If not provided, runs in passthrough mode without inference
    #[arg(long, env = "MODEL_PATH")]
    model: Option<PathBuf>,

    /// Class labels in model output order
    #[arg(long, value_delimiter = ',', default_values_t = DEFAULT_LABELS.map(String::from))]
    labels: Vec<String>,

    /// Label of the class that means no disease
    #[arg(long, default_value = DEFAULT_HEALTHY_LABEL)]
    healthy_label: String,

    /// Minimum confidence for a result to be trusted
    #[arg(long, env = "CONFIDENCE_THRESHOLD", default_value_t = DEFAULT_CONFIDENCE_THRESHOLD)]
    confidence_threshold: f32,

    /// Minimum seconds between inference runs
    #[arg(long, default_value_t = 2.0)]
    inference_interval: f64,

    /// Classifier input edge in pixels
    #[arg(long, env = "IMAGE_SIZE", default_value_t = 224)]
    input_size: u32,

    /// Model expects channels-first (NCHW) input instead of channels-last
    #[arg(long)]
    channels_first: bool,

    /// Directory for snapshots and their metadata
    #[arg(long, env = "CAPTURE_DIR", default_value = "captures")]
    snapshot_dir: PathBuf,

    /// Seconds to count down before a single capture
    #[arg(long, default_value_t = 3)]
    countdown: u64,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("Cropcam starting");

    let config = session_config(&args)?;
    let output = open_output(&args).context("Failed to initialize output")?;
    let mut session =
        CaptureSession::new(config, device_opener(args.test_pattern)).with_output(output);

    if let Some(model_path) = &args.model {
        let classifier = load_classifier(model_path, &args).context("Failed to load classifier")?;
        tracing::info!("Classifier loaded successfully");
        session = session.with_classifier(classifier);
    }

    match args.mode {
        Mode::Realtime => run_realtime(&mut session),
        Mode::Capture => run_capture(&mut session, args.countdown),
        Mode::Status => {
            // Status is reported even when the camera cannot be opened
            let status = session.probe().unwrap_or_else(|_| session.status());
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
    }
}

fn session_config(args: &Args) -> Result<SessionConfig> {
    let inference_interval = Duration::try_from_secs_f64(args.inference_interval)
        .with_context(|| format!("Invalid inference interval {}", args.inference_interval))?;

    Ok(SessionConfig {
        capture: CaptureSettings {
            device_index: args.input_device,
            width: args.capture_width,
            height: args.capture_height,
            fps: args.fps,
        },
        inference_interval,
        overlay: OverlayPolicy {
            healthy_label: args.healthy_label.clone(),
            confidence_threshold: args.confidence_threshold,
        },
        snapshot_dir: args.snapshot_dir.clone(),
    })
}

fn device_opener(
    test_pattern: bool,
) -> impl FnMut(&CaptureSettings) -> Result<Box<dyn FrameSource>, OpenError> + Send + 'static {
    move |settings: &CaptureSettings| -> Result<Box<dyn FrameSource>, OpenError> {
        if test_pattern {
            return Ok(Box::new(TestPatternSource::open(settings)?));
        }
        open_camera(settings)
    }
}

#[cfg(feature = "camera")]
fn open_camera(settings: &CaptureSettings) -> Result<Box<dyn FrameSource>, OpenError> {
    Ok(Box::new(cropcam::capture::WebcamSource::open(settings)?))
}

#[cfg(not(feature = "camera"))]
fn open_camera(settings: &CaptureSettings) -> Result<Box<dyn FrameSource>, OpenError> {
    Err(OpenError::DeviceUnavailable {
        index: settings.device_index,
        reason: "built without the `camera` feature; use --test-pattern".to_string(),
    })
}

fn open_output(args: &Args) -> Result<Box<dyn OutputSink>> {
    let Some(path) = &args.output_device else {
        return Ok(Box::new(NullOutput::new()));
    };

    #[cfg(feature = "v4l2-output")]
    {
        let output = cropcam::output::V4L2Output::new(path, args.output_width, args.output_height)?;
        Ok(Box::new(output))
    }

    #[cfg(not(feature = "v4l2-output"))]
    {
        anyhow::bail!(
            "cannot open {} at {}x{}: built without the `v4l2-output` feature",
            path.display(),
            args.output_width,
            args.output_height
        )
    }
}

fn load_classifier(model_path: &std::path::Path, args: &Args) -> Result<Box<dyn Classifier>> {
    tracing::info!(
        "Model {}: {} classes, {}x{} input",
        model_path.display(),
        args.labels.len(),
        args.input_size,
        args.input_size
    );

    #[cfg(feature = "onnx")]
    {
        use cropcam::classify::{OnnxClassifier, TensorLayout};

        let layout = if args.channels_first {
            TensorLayout::Nchw
        } else {
            TensorLayout::Nhwc
        };
        let classifier =
            OnnxClassifier::new(model_path, args.labels.clone(), args.input_size, layout)?;
        Ok(Box::new(classifier))
    }

    #[cfg(not(feature = "onnx"))]
    {
        anyhow::bail!(
            "built without the `onnx` feature (channels_first={})",
            args.channels_first
        )
    }
}

fn run_realtime(session: &mut CaptureSession) -> Result<()> {
    let handle = session.handle();

    let ctrlc_handle = handle.clone();
    ctrlc::set_handler(move || ctrlc_handle.stop()).context("Failed to install Ctrl+C handler")?;
    spawn_keyboard_controls(handle).context("Failed to start keyboard controls")?;

    tracing::info!("Starting real-time detection");
    tracing::info!("Type 's' + Enter to save a snapshot, 'q' + Enter or Ctrl+C to stop");

    let summary = session.run().context("Detection stopped")?;
    tracing::info!(
        "Detection stopped after {} frames ({} classified, {} failed)",
        summary.frames,
        summary.inference.completed,
        summary.inference.failed
    );
    Ok(())
}

fn spawn_keyboard_controls(handle: SessionHandle) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name("keyboard".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                match line.trim() {
                    "q" => {
                        handle.stop();
                        break;
                    }
                    "s" => match handle.request_snapshot().recv_timeout(SNAPSHOT_TIMEOUT) {
                        Ok(Ok(record)) => print_record(&record),
                        Ok(Err(e)) => tracing::warn!("Snapshot failed: {}", e),
                        Err(_) => tracing::warn!("Snapshot did not complete in time"),
                    },
                    "" => {}
                    other => tracing::info!(
                        "Unknown command '{}': use 's' to save, 'q' to quit",
                        other
                    ),
                }
            }
        })?;
    Ok(())
}

fn run_capture(session: &mut CaptureSession, countdown: u64) -> Result<()> {
    if !session.has_classifier() {
        tracing::warn!("No model loaded; the image will be saved without analysis");
    }

    if countdown > 0 {
        println!("Capturing image in {} seconds...", countdown);
        for i in (1..=countdown).rev() {
            println!("{}...", i);
            std::thread::sleep(Duration::from_secs(1));
        }
    }

    let record = session.capture_once().context("Capture and analysis failed")?;
    print_record(&record);
    Ok(())
}

fn print_record(record: &SnapshotRecord) {
    if let Some(result) = &record.classification {
        println!("\nAnalysis Results:");
        println!("Disease: {}", result.display_label());
        println!("Confidence: {:.2}", result.confidence);
    }

    if let Some(advice) = &record.remediation {
        println!("\nRecommended Solution ({}):", advice.name);
        for step in &advice.treatment {
            println!("  Treatment: {}", step);
        }
        for step in &advice.prevention {
            println!("  Prevention: {}", step);
        }
        println!("  Urgency: {:?}", advice.urgency);
    }

    println!("Result saved to: {}", record.image_path.display());
}
