pub mod api;
pub mod server;

use crate::camera::CameraManager;
use crate::pipeline::frame::FramePipeline;
use crate::pipeline::package::JpegEncoder;
use std::path::PathBuf;

/// Shared by every handler behind an `Arc`.
pub struct AppState {
    pub pipeline: FramePipeline,
    pub camera: CameraManager,
    pub encoder: JpegEncoder,
    pub temp_dir: PathBuf,
    pub sample_interval_secs: f64,
}
