mod camera;
mod cli;
mod config;
mod error;
mod pipeline;
mod video;
mod web;

use anyhow::{Context, Result};
use camera::CameraManager;
use cli::Args;
use config::ServiceConfig;
use pipeline::detection::ObjectDetector;
use pipeline::frame::FramePipeline;
use pipeline::package::JpegEncoder;
use pipeline::types::ClassTable;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use web::server::run_server;
use web::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServiceConfig::try_from(Args::parse_args())?;
    config.prepare_temp_dir()?;

    let detector =
        ObjectDetector::new(config.model_kind, &config.model_path, &config.class_names)
            .with_context(|| format!("Failed to load model {}", config.model_path))?;
    let pipeline = FramePipeline::new(
        Arc::new(detector),
        Arc::new(ClassTable::new(config.class_names.iter().cloned())),
    );
    tracing::info!(
        "Model loaded from {} with classes {:?}",
        config.model_path,
        pipeline.classes().names()
    );

    let state = Arc::new(AppState {
        pipeline,
        camera: CameraManager::opencv(config.camera_index),
        encoder: JpegEncoder::new(config.jpeg_quality),
        temp_dir: config.temp_dir.clone(),
        sample_interval_secs: config.sample_interval_secs,
    });

    run_server(config.host, config.port, state, config.max_upload_bytes).await?;

    Ok(())
}
