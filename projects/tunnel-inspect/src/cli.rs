use crate::pipeline::detection::ModelKind;
use crate::video::processor::DEFAULT_SAMPLE_INTERVAL_SECS;
use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0", env = "TUNNEL_INSPECT_HOST")]
    pub host: IpAddr,

    /// Port to bind to
    #[arg(long, default_value_t = 5000, env = "TUNNEL_INSPECT_PORT")]
    pub port: u16,

    /// Path to the detection model (ONNX)
    #[arg(long, env = "TUNNEL_INSPECT_MODEL")]
    pub model_path: String,

    /// Model family of the ONNX file; only segmentation models draw masks
    #[arg(
        long,
        value_enum,
        default_value_t = ModelKind::YoloSeg,
        env = "TUNNEL_INSPECT_MODEL_KIND"
    )]
    pub model_kind: ModelKind,

    /// Class names in model order, comma separated
    #[arg(
        long,
        env = "TUNNEL_INSPECT_CLASS_NAMES",
        value_delimiter = ',',
        default_value = "Umidade,Corrosao,Rachadura"
    )]
    pub class_names: Vec<String>,

    /// Camera device index used by /capture
    #[arg(long, default_value_t = 0, env = "TUNNEL_INSPECT_CAMERA_INDEX")]
    pub camera_index: i32,

    /// Directory for temporary video uploads (defaults to the OS temp dir)
    #[arg(long, env = "TUNNEL_INSPECT_TEMP_DIR")]
    pub temp_dir: Option<PathBuf>,

    /// Seconds of video between two sampled frames
    #[arg(long, default_value_t = DEFAULT_SAMPLE_INTERVAL_SECS)]
    pub sample_interval_secs: f64,

    /// JPEG quality for annotated frames (1-100)
    #[arg(long, default_value_t = 95)]
    pub jpeg_quality: i32,

    /// Maximum accepted upload size in megabytes
    #[arg(long, default_value_t = 512)]
    pub max_upload_mb: usize,
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
