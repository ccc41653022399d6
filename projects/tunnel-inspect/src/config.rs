use crate::cli::Args;
use crate::pipeline::detection::ModelKind;
use anyhow::{bail, Context, Result};
use std::net::IpAddr;
use std::path::PathBuf;

/// Upload extensions routed to the video pipeline.
pub const VIDEO_EXTENSIONS: [&str; 3] = ["mp4", "avi", "mov"];

/// Validated runtime settings shared with the HTTP handlers.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: IpAddr,
    pub port: u16,
    pub model_path: String,
    pub model_kind: ModelKind,
    pub class_names: Vec<String>,
    pub camera_index: i32,
    pub temp_dir: PathBuf,
    pub sample_interval_secs: f64,
    pub jpeg_quality: i32,
    pub max_upload_bytes: usize,
}

impl TryFrom<Args> for ServiceConfig {
    type Error = anyhow::Error;

    fn try_from(args: Args) -> Result<Self> {
        let class_names: Vec<String> = args
            .class_names
            .into_iter()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();
        if class_names.is_empty() {
            bail!("At least one class name is required");
        }
        if !(args.sample_interval_secs.is_finite() && args.sample_interval_secs > 0.0) {
            bail!(
                "Sample interval must be positive, got {}",
                args.sample_interval_secs
            );
        }
        if !(1..=100).contains(&args.jpeg_quality) {
            bail!("JPEG quality must be in 1..=100, got {}", args.jpeg_quality);
        }

        Ok(Self {
            host: args.host,
            port: args.port,
            model_path: args.model_path,
            model_kind: args.model_kind,
            class_names,
            camera_index: args.camera_index,
            temp_dir: args.temp_dir.unwrap_or_else(std::env::temp_dir),
            sample_interval_secs: args.sample_interval_secs,
            jpeg_quality: args.jpeg_quality,
            max_upload_bytes: args.max_upload_mb.saturating_mul(1024 * 1024),
        })
    }
}

impl ServiceConfig {
    /// Creates the temp directory if it does not exist yet.
    pub fn prepare_temp_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.temp_dir)
            .with_context(|| format!("Failed to create temp dir {:?}", self.temp_dir))
    }
}

/// The lower-cased extension of `filename` when it names a video upload.
/// A bare `.mp4` counts, matching on the suffix rather than a path stem.
pub fn video_extension(filename: &str) -> Option<String> {
    let lower = filename.to_lowercase();
    VIDEO_EXTENSIONS
        .iter()
        .find(|ext| {
            lower
                .strip_suffix(*ext)
                .is_some_and(|stem| stem.ends_with('.'))
        })
        .map(|ext| ext.to_string())
}
