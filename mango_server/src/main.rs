use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::Parser;
use ort::execution_providers::CPUExecutionProvider;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use inference_common::annotate::Annotator;
use inference_common::params::DetectParams;
use inference_common::ObjectDetector;
use ort_yolo::YoloSession;

mod api;
mod error;
mod video;

/// HTTP service detecting ripe and unripe mangoes in images, videos and
/// webcam frames with a YOLOv8 onnx model.
#[derive(Debug, Parser)]
struct Args {
    /// Path to the onnx model file.
    #[arg(long, default_value = "models/best.onnx")]
    model: PathBuf,
    /// Optional ttf font for box labels; boxes are drawn unlabeled without it.
    #[arg(long)]
    font: Option<PathBuf>,
    /// Address to bind.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind.
    #[arg(long, default_value_t = 8000)]
    port: u16,
    /// Minimum confidence for a detection to be kept.
    #[arg(long, default_value_t = 0.15)]
    conf: f32,
    /// IoU threshold for non-max suppression.
    #[arg(long, default_value_t = 0.4)]
    iou: f32,
    /// Square input size the model expects.
    #[arg(long, default_value_t = 640)]
    imgsz: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,mango_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    if !args.model.exists() {
        anyhow::bail!("model file not found: {}", args.model.display());
    }

    ort::init()
        .with_execution_providers([CPUExecutionProvider::default().build()])
        .commit()?;

    let session = YoloSession::from_file(&args.model)?;
    info!("Loaded model from {}", args.model.display());

    let detector: Arc<Mutex<dyn ObjectDetector>> = Arc::new(Mutex::new(session));
    let annotator = Arc::new(Annotator::from_font_file(args.font.as_deref()));
    let params = DetectParams {
        conf_threshold: args.conf,
        iou_threshold: args.iou,
        input_size: args.imgsz,
    };

    let state = api::AppState {
        detector,
        annotator,
        params,
        model_path: args.model.display().to_string(),
    };

    api::serve(state, &args.host, args.port).await
}
