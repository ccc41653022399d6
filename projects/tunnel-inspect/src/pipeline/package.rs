use crate::error::ServiceError;
use crate::pipeline::frame::ProcessedFrame;
use crate::pipeline::types::Detection;
use anyhow::{bail, Context, Result};
use opencv::core::{Mat, Vector};
use opencv::imgcodecs::{self, IMWRITE_JPEG_QUALITY};
use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const DETECTIONS_HEADER: &str = "Detections";
pub const LOGS_HEADER: &str = "Logs";
pub const FRAME_COUNT_HEADER: &str = "Frame-Count";

pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";
pub const ZIP_CONTENT_TYPE: &str = "application/zip";

/// Encodes frames to JPEG at a fixed quality.
#[derive(Debug, Clone, Copy)]
pub struct JpegEncoder {
    quality: i32,
}

impl JpegEncoder {
    pub fn new(quality: i32) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn encode(&self, image: &Mat) -> Result<Vec<u8>> {
        let mut buf = Vector::<u8>::new();
        let params = Vector::<i32>::from_slice(&[IMWRITE_JPEG_QUALITY, self.quality]);
        let ok = imgcodecs::imencode(".jpg", image, &mut buf, &params)?;
        if !ok || buf.is_empty() {
            bail!(ServiceError::Encoding("image".to_string()));
        }
        Ok(buf.to_vec())
    }
}

impl Default for JpegEncoder {
    fn default() -> Self {
        Self::new(95)
    }
}

/// A fully serialized response: body plus the metadata headers that go with it.
#[derive(Debug)]
pub struct Package {
    pub body: Vec<u8>,
    pub content_type: &'static str,
    pub metadata: Vec<(&'static str, String)>,
}

impl Package {
    pub fn header_names(&self) -> Vec<&'static str> {
        self.metadata.iter().map(|(name, _)| *name).collect()
    }
}

/// Single annotated frame: JPEG body, detection list and a one-entry log list.
pub fn package_frame(encoder: &JpegEncoder, frame: &ProcessedFrame) -> Result<Package> {
    let body = encoder.encode(&frame.image)?;
    Ok(Package {
        body,
        content_type: JPEG_CONTENT_TYPE,
        metadata: vec![
            (DETECTIONS_HEADER, serde_json::to_string(&frame.detections)?),
            (
                LOGS_HEADER,
                serde_json::to_string(std::slice::from_ref(&frame.log))?,
            ),
        ],
    })
}

/// Sampled video: ZIP of `frame_{i}.jpg` entries plus flattened metadata.
pub fn package_archive(
    frames: &[Vec<u8>],
    detections: &[Detection],
    logs: &[String],
) -> Result<Package> {
    let body = build_archive(frames)
        .map_err(|e| ServiceError::Encoding(format!("archive: {:#}", e)))?;

    Ok(Package {
        body,
        content_type: ZIP_CONTENT_TYPE,
        metadata: vec![
            (DETECTIONS_HEADER, serde_json::to_string(detections)?),
            (LOGS_HEADER, serde_json::to_string(logs)?),
            (FRAME_COUNT_HEADER, frames.len().to_string()),
        ],
    })
}

pub fn frame_entry_name(index: usize) -> String {
    format!("frame_{}.jpg", index)
}

fn build_archive(frames: &[Vec<u8>]) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    // JPEG data does not compress further.
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    for (i, data) in frames.iter().enumerate() {
        let name = frame_entry_name(i);
        zip.start_file(name.as_str(), options)
            .with_context(|| format!("Failed to start entry {}", name))?;
        zip.write_all(data)?;
    }

    Ok(zip.finish()?.into_inner())
}
