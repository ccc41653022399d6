use crate::config::video_extension;
use crate::error::{ServiceError, ServiceResult};
use crate::pipeline::package::{package_archive, package_frame, Package};
use crate::video::opencv_reader::OpencvReader;
use crate::video::processor::process_video;
use crate::web::AppState;
use anyhow::{anyhow, bail, Context, Result};
use axum::{
    body::Bytes,
    extract::{Multipart, State},
    http::{header, HeaderName, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use opencv::{
    core::{Mat, Vector},
    imgcodecs::{imdecode, IMREAD_COLOR},
    prelude::*,
};
use serde_json::{json, Value};
use std::io::Write;
use std::sync::Arc;

/// The multipart field carrying the upload.
pub const UPLOAD_FIELD: &str = "file";

pub struct Upload {
    pub filename: String,
    pub data: Bytes,
}

pub async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

pub async fn capture_handler(State(state): State<Arc<AppState>>) -> ServiceResult<Response> {
    let package = tokio::task::spawn_blocking(move || -> Result<Package> {
        let processed = state
            .camera
            .capture_with(|frame| state.pipeline.process(frame))?;
        package_frame(&state.encoder, &processed)
    })
    .await
    .map_err(|e| anyhow!("Capture task failed: {}", e))??;

    package_to_response(package)
}

pub async fn detect_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> ServiceResult<Response> {
    let upload = read_upload(&mut multipart).await?;
    tracing::info!(
        "Received upload {} ({} bytes)",
        upload.filename,
        upload.data.len()
    );

    let package = tokio::task::spawn_blocking(move || match video_extension(&upload.filename) {
        Some(ext) => detect_video(&state, &upload, &ext),
        None => detect_image(&state, &upload),
    })
    .await
    .map_err(|e| anyhow!("Detection task failed: {}", e))??;

    package_to_response(package)
}

/// Pulls the `file` field out of the form, skipping any other fields.
pub async fn read_upload(multipart: &mut Multipart) -> ServiceResult<Upload> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServiceError::Upload(e.body_text()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        if filename.is_empty() {
            return Err(ServiceError::EmptyFilename);
        }
        let data = field
            .bytes()
            .await
            .map_err(|e| ServiceError::Upload(e.body_text()))?;
        return Ok(Upload { filename, data });
    }
    Err(ServiceError::MissingFile)
}

fn detect_image(state: &AppState, upload: &Upload) -> Result<Package> {
    let buf = Vector::<u8>::from_slice(&upload.data);
    let frame = imdecode(&buf, IMREAD_COLOR).unwrap_or_else(|e| {
        tracing::debug!("imdecode failed for {}: {}", upload.filename, e);
        Mat::default()
    });
    if frame.empty() {
        bail!(ServiceError::InvalidImage);
    }

    let processed = state.pipeline.process(&frame)?;
    package_frame(&state.encoder, &processed)
}

fn detect_video(state: &AppState, upload: &Upload, ext: &str) -> Result<Package> {
    // Removed when `temp` drops, on every exit path.
    let mut temp = tempfile::Builder::new()
        .prefix("upload_")
        .suffix(&format!(".{}", ext))
        .tempfile_in(&state.temp_dir)
        .with_context(|| format!("Failed to create temp file in {:?}", state.temp_dir))?;
    temp.write_all(&upload.data)
        .context("Failed to write video upload")?;
    temp.flush()?;

    let mut reader = match OpencvReader::open(temp.path()) {
        Ok(reader) => reader,
        Err(e) => {
            tracing::warn!("Could not open uploaded video {}: {:#}", upload.filename, e);
            bail!(ServiceError::NoFramesProcessed);
        }
    };
    let sampled = process_video(
        &mut reader,
        &state.pipeline,
        &state.encoder,
        state.sample_interval_secs,
    )?;
    drop(reader);

    tracing::info!(
        "Video {}: {} frames, {} detections",
        upload.filename,
        sampled.frames.len(),
        sampled.detections.len()
    );
    package_archive(&sampled.frames, &sampled.detections, &sampled.logs)
}

/// Body plus content type, metadata headers, and an expose list naming them.
pub fn package_to_response(package: Package) -> ServiceResult<Response> {
    let expose = package.header_names().join(", ");
    let mut response = package.body.into_response();
    let headers = response.headers_mut();

    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(package.content_type),
    );
    for (name, value) in &package.metadata {
        let value = HeaderValue::from_bytes(value.as_bytes())
            .map_err(|e| anyhow!("Invalid {} header value: {}", name, e))?;
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| anyhow!("Invalid header name {}: {}", name, e))?;
        headers.insert(name, value);
    }
    let expose = HeaderValue::from_str(&expose)
        .map_err(|e| anyhow!("Invalid expose header value: {}", e))?;
    headers.insert(header::ACCESS_CONTROL_EXPOSE_HEADERS, expose);

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraManager, FrameGrabber};
    use crate::pipeline::frame::FramePipeline;
    use crate::pipeline::package::JpegEncoder;
    use crate::pipeline::testing::{blank_frame, raw, ScriptedDetector};
    use crate::pipeline::types::{ClassTable, Inference};
    use axum::{body::Body, extract::FromRequest, extract::Request, http::StatusCode};
    use opencv::core::Size;
    use opencv::imgcodecs::imencode;
    use opencv::videoio::VideoWriter;

    const BOUNDARY: &str = "XBOUNDARYX";

    struct StillCamera;

    impl FrameGrabber for StillCamera {
        fn grab_frame(&mut self) -> Result<Option<Mat>> {
            Ok(Some(blank_frame(64, 48)))
        }
    }

    fn state(camera: CameraManager, temp_dir: &std::path::Path) -> Arc<AppState> {
        let detector = ScriptedDetector::fixed(Inference {
            detections: vec![raw(2, 0.9), raw(0, 0.1)],
            summary: Some("64x48 2 detections, 3ms".to_string()),
        });
        Arc::new(AppState {
            pipeline: FramePipeline::new(
                Arc::new(detector),
                Arc::new(ClassTable::new(["Umidade", "Corrosao", "Rachadura"])),
            ),
            camera,
            encoder: JpegEncoder::default(),
            temp_dir: temp_dir.to_path_buf(),
            sample_interval_secs: 3.0,
        })
    }

    fn no_camera() -> CameraManager {
        CameraManager::with_opener(|| Err(anyhow!("no device")))
    }

    fn form(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, filename, data) in parts {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            let disposition = match filename {
                Some(f) => format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                    name, f
                ),
                None => format!("Content-Disposition: form-data; name=\"{}\"\r\n", name),
            };
            body.extend_from_slice(disposition.as_bytes());
            body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    async fn multipart(body: Vec<u8>) -> Multipart {
        let request = Request::builder()
            .method("POST")
            .uri("/detect")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap();
        Multipart::from_request(request, &()).await.unwrap()
    }

    fn jpeg_bytes() -> Vec<u8> {
        let mut buf = Vector::<u8>::new();
        imencode(".jpg", &blank_frame(32, 24), &mut buf, &Vector::new()).unwrap();
        buf.to_vec()
    }

    /// A real MJPG-in-AVI clip of `frames` blank frames at `fps`.
    fn avi_bytes(frames: usize, fps: f64) -> Vec<u8> {
        let src = tempfile::tempdir().unwrap();
        let path = src.path().join("clip.avi");
        let fourcc = VideoWriter::fourcc('M', 'J', 'P', 'G').unwrap();
        let mut writer =
            VideoWriter::new(path.to_str().unwrap(), fourcc, fps, Size::new(64, 48), true)
                .unwrap();
        assert!(writer.is_opened().unwrap());
        for _ in 0..frames {
            writer.write(&blank_frame(64, 48)).unwrap();
        }
        writer.release().unwrap();
        std::fs::read(&path).unwrap()
    }

    fn header_str<'a>(response: &'a Response, name: &str) -> &'a str {
        response.headers()[name].to_str().unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let Json(body) = health_handler().await;
        assert_eq!(body, json!({ "status": "healthy" }));
    }

    #[tokio::test]
    async fn test_detect_image_returns_jpeg_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let image = jpeg_bytes();
        let mp = multipart(form(&[("file", Some("wall.JPG"), image.as_slice())])).await;

        let response = detect_handler(State(state(no_camera(), dir.path())), mp)
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header_str(&response, "content-type"), "image/jpeg");
        assert_eq!(
            header_str(&response, "access-control-expose-headers"),
            "Detections, Logs"
        );
        let detections: Vec<Value> =
            serde_json::from_str(header_str(&response, "detections")).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0]["class"], "Rachadura");
        let logs: Vec<String> = serde_json::from_str(header_str(&response, "logs")).unwrap();
        assert_eq!(logs, vec!["64x48 2 detections, 3ms"]);
    }

    #[tokio::test]
    async fn test_detect_skips_other_fields() {
        let dir = tempfile::tempdir().unwrap();
        let image = jpeg_bytes();
        let mp = multipart(form(&[
            ("note", None, b"hello".as_slice()),
            ("file", Some("wall.png"), image.as_slice()),
        ]))
        .await;

        let response = detect_handler(State(state(no_camera(), dir.path())), mp)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_detect_missing_file_field() {
        let dir = tempfile::tempdir().unwrap();
        let mp = multipart(form(&[("image", Some("a.jpg"), b"x".as_slice())])).await;

        let err = detect_handler(State(state(no_camera(), dir.path())), mp)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ServiceError::MissingFile));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_detect_empty_filename() {
        let dir = tempfile::tempdir().unwrap();
        let mp = multipart(form(&[("file", Some(""), b"x".as_slice())])).await;

        let err = detect_handler(State(state(no_camera(), dir.path())), mp)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ServiceError::EmptyFilename));
    }

    #[tokio::test]
    async fn test_detect_undecodable_image() {
        let dir = tempfile::tempdir().unwrap();
        let mp = multipart(form(&[(
            "file",
            Some("a.jpg"),
            b"not an image".as_slice(),
        )]))
        .await;

        let err = detect_handler(State(state(no_camera(), dir.path())), mp)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ServiceError::InvalidImage));
    }

    #[tokio::test]
    async fn test_detect_unreadable_video_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let mp = multipart(form(&[(
            "file",
            Some("clip.MP4"),
            b"garbage".as_slice(),
        )]))
        .await;

        let err = detect_handler(State(state(no_camera(), dir.path())), mp)
            .await
            .err()
            .unwrap();
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_detect_video_returns_archive_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let clip = avi_bytes(6, 1.0);
        let mp = multipart(form(&[("file", Some("inspection.AVI"), clip.as_slice())])).await;

        let response = detect_handler(State(state(no_camera(), dir.path())), mp)
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header_str(&response, "content-type"), "application/zip");
        // fps 1, interval 3s: counters 3 and 6
        assert_eq!(header_str(&response, "frame-count"), "2");
        let logs: Vec<String> = serde_json::from_str(header_str(&response, "logs")).unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_capture_returns_annotated_frame() {
        let dir = tempfile::tempdir().unwrap();
        let camera =
            CameraManager::with_opener(|| Ok(Box::new(StillCamera) as Box<dyn FrameGrabber>));

        let response = capture_handler(State(state(camera, dir.path())))
            .await
            .unwrap();
        assert_eq!(header_str(&response, "content-type"), "image/jpeg");
        assert!(response.headers().contains_key("detections"));
    }

    #[tokio::test]
    async fn test_capture_without_camera_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err = capture_handler(State(state(no_camera(), dir.path())))
            .await
            .err()
            .unwrap();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_archive_response_headers() {
        let logs = vec!["Classe ñ".to_string()];
        let package = package_archive(&[vec![1, 2, 3]], &[], &logs).unwrap();
        let response = package_to_response(package).unwrap();

        assert_eq!(header_str(&response, "content-type"), "application/zip");
        assert_eq!(header_str(&response, "frame-count"), "1");
        assert_eq!(
            header_str(&response, "access-control-expose-headers"),
            "Detections, Logs, Frame-Count"
        );
        assert_eq!(
            response.headers()["logs"].as_bytes(),
            "[\"Classe ñ\"]".as_bytes()
        );
    }
}
