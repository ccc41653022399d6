use crate::pipeline::types::{Inference, Mask, RawDetection};
use anyhow::{anyhow, Result};
use image::{DynamicImage, ImageBuffer, Rgb};
use opencv::core::Mat;
use opencv::prelude::*;
use std::sync::Mutex;
use std::time::Instant;
use usls::models::{RTDETR, YOLO};
use usls::{Config, Hbb, Image, Y};

/// The inference backend, seen as a black box by the rest of the pipeline.
pub trait Detector: Send + Sync {
    /// Runs the model on one BGR frame.
    fn detect(&self, frame: &Mat) -> Result<Inference>;
}

/// Which usls model family the ONNX file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ModelKind {
    /// YOLO instance segmentation: boxes plus per-instance masks
    YoloSeg,
    /// RT-DETR: boxes only, mask overlays are never drawn
    Rtdetr,
}

impl ModelKind {
    pub fn produces_masks(self) -> bool {
        matches!(self, ModelKind::YoloSeg)
    }
}

enum Backend {
    YoloSeg(YOLO),
    Rtdetr(RTDETR),
}

impl Backend {
    fn forward(&mut self, images: &[Image]) -> Result<Vec<Y>> {
        match self {
            Backend::YoloSeg(model) => Ok(model.forward(images)?),
            Backend::Rtdetr(model) => Ok(model.forward(images)?),
        }
    }
}

/// A wrapper around the USLS models that handles BGR-to-RGB conversion,
/// corrects RT-DETR aspect-ratio padding and pairs YOLO masks with their boxes.
pub struct ObjectDetector {
    kind: ModelKind,
    model: Mutex<Backend>,
}

impl ObjectDetector {
    /// Load the model at `model_path`, labelling its outputs with `class_names`.
    pub fn new(kind: ModelKind, model_path: &str, class_names: &[String]) -> Result<Self> {
        let names: Vec<&str> = class_names.iter().map(String::as_str).collect();
        let config = match kind {
            ModelKind::YoloSeg => Config::yolo_segment(),
            ModelKind::Rtdetr => Config::default(),
        }
        .with_model_file(model_path)
        .with_class_names(&names);

        #[cfg(target_os = "macos")]
        let config = config.with_model_device(usls::Device::CoreMl);

        let config = config.commit()?;
        let backend = match kind {
            ModelKind::YoloSeg => Backend::YoloSeg(YOLO::new(config)?),
            ModelKind::Rtdetr => Backend::Rtdetr(RTDETR::new(config)?),
        };
        tracing::info!(
            "Loaded {:?} detector from {} (masks: {})",
            kind,
            model_path,
            kind.produces_masks()
        );
        Ok(Self {
            kind,
            model: Mutex::new(backend),
        })
    }
}

impl Detector for ObjectDetector {
    fn detect(&self, frame: &Mat) -> Result<Inference> {
        let start = Instant::now();
        let size = frame.size()?;
        let img_w = size.width as f32;
        let img_h = size.height as f32;
        if img_w <= 0.0 || img_h <= 0.0 {
            return Err(anyhow!("Cannot run detection on an empty frame"));
        }

        let correction = match self.kind {
            ModelKind::Rtdetr => rtdetr_correction(img_w, img_h),
            ModelKind::YoloSeg => (1.0, 1.0),
        };

        let image = Image::from(mat_to_dynamic_image(frame)?);
        let result = {
            let mut model = self
                .model
                .lock()
                .map_err(|_| anyhow!("Detector mutex poisoned"))?;
            model.forward(&[image])?.into_iter().next()
        };
        let Some(y) = result else {
            return Ok(Inference::default());
        };

        let mut masks = instance_masks(&y.masks, y.hbbs.len()).into_iter();
        let detections: Vec<RawDetection> = y
            .hbbs
            .iter()
            .filter_map(|hbb| {
                let mask = masks.next().flatten();
                to_raw(BoxReading::from_hbb(hbb, correction), img_w, img_h, mask)
            })
            .collect();

        let summary = format!(
            "{}x{} {} detections, {:.1}ms",
            size.height,
            size.width,
            detections.len(),
            start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(Inference {
            detections,
            summary: Some(summary),
        })
    }
}

// Correction calculations (USLS RT-DETR bug workaround)
fn rtdetr_correction(img_w: f32, img_h: f32) -> (f32, f32) {
    if img_w > img_h {
        (img_w / img_h, 1.0)
    } else if img_h > img_w {
        (1.0, img_h / img_w)
    } else {
        (1.0, 1.0)
    }
}

/// A model box in pixel space, after any aspect correction.
#[derive(Debug, Clone, Copy)]
struct BoxReading {
    id: Option<usize>,
    confidence: Option<f32>,
    xmin: f32,
    ymin: f32,
    width: f32,
    height: f32,
}

impl BoxReading {
    fn from_hbb(hbb: &Hbb, (x_corr, y_corr): (f32, f32)) -> Self {
        Self {
            id: hbb.id(),
            confidence: hbb.confidence(),
            xmin: hbb.xmin() * x_corr,
            ymin: hbb.ymin() * y_corr,
            width: hbb.width() * x_corr,
            height: hbb.height() * y_corr,
        }
    }
}

/// Normalizes a pixel box; boxes without a class id are dropped.
fn to_raw(
    reading: BoxReading,
    img_w: f32,
    img_h: f32,
    mask: Option<Mask>,
) -> Option<RawDetection> {
    let Some(class_id) = reading.id else {
        tracing::warn!(
            "Dropping model box without class id at ({:.0}, {:.0})",
            reading.xmin,
            reading.ymin
        );
        return None;
    };

    Some(RawDetection {
        class_id,
        confidence: reading.confidence.unwrap_or(0.0),
        x_center: (reading.xmin + reading.width / 2.0) / img_w,
        y_center: (reading.ymin + reading.height / 2.0) / img_h,
        width: reading.width / img_w,
        height: reading.height / img_h,
        mask,
    })
}

/// One entry per box. usls emits masks in box order; any other count
/// cannot be paired and yields no masks.
fn instance_masks(masks: &[usls::Mask], boxes: usize) -> Vec<Option<Mask>> {
    if masks.len() != boxes {
        if !masks.is_empty() {
            tracing::warn!(
                "Model returned {} masks for {} boxes, skipping mask overlays",
                masks.len(),
                boxes
            );
        }
        return vec![None; boxes];
    }
    masks
        .iter()
        .map(|m| Some(mask_from_luma(m.width(), m.height(), m.to_vec())))
        .collect()
}

/// Wraps a row-major 8-bit mask; values stay in the 0..=255 range.
fn mask_from_luma(width: u32, height: u32, bytes: Vec<u8>) -> Mask {
    Mask {
        width: width as usize,
        height: height as usize,
        data: bytes.into_iter().map(f32::from).collect(),
    }
}

/// Convert an OpenCV Mat (BGR) to an image::DynamicImage (RGB)
fn mat_to_dynamic_image(mat: &Mat) -> Result<DynamicImage> {
    let mut rgb_mat = Mat::default();
    opencv::imgproc::cvt_color_def(mat, &mut rgb_mat, opencv::imgproc::COLOR_BGR2RGB)?;

    let size = rgb_mat.size()?;
    let width = size.width as u32;
    let height = size.height as u32;

    if !rgb_mat.is_continuous() {
        return Err(anyhow!("Mat is not continuous"));
    }

    let buffer = rgb_mat.data_bytes()?.to_vec();

    let img_buffer = ImageBuffer::<Rgb<u8>, _>::from_vec(width, height, buffer)
        .ok_or_else(|| anyhow!("Failed to create ImageBuffer from Mat data"))?;

    Ok(DynamicImage::ImageRgb8(img_buffer))
}
