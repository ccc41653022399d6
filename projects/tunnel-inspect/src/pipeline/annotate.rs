use crate::pipeline::normalize::Annotation;
use crate::pipeline::types::{Color, Mask};
use anyhow::{bail, Result};
use opencv::core::{self, Mat, Point, Scalar, Size, CV_32FC1, CV_8U, CV_8UC3};
use opencv::imgproc::{self, FONT_HERSHEY_SIMPLEX, INTER_LINEAR, LINE_8, THRESH_BINARY};
use opencv::prelude::*;

const BOX_THICKNESS: i32 = 2;
const LABEL_OFFSET_Y: i32 = 5;
const LABEL_SCALE: f64 = 0.6;
const FRAME_WEIGHT: f64 = 0.7;
const MASK_WEIGHT: f64 = 0.3;
const PROB_MASK_MIDPOINT: f64 = 0.5;
const BYTE_MASK_MIDPOINT: f64 = 127.5;

/// Frame state threaded through the annotation fold.
pub struct AnnotatedFrame {
    pub image: Mat,
    /// Non-fatal mask failures, one line each
    pub warnings: Vec<String>,
}

/// Result of compositing one mask onto a frame.
pub enum MaskOutcome {
    Composited(Mat),
    Skipped { frame: Mat, warning: String },
}

impl MaskOutcome {
    fn into_parts(self) -> (Mat, Option<String>) {
        match self {
            MaskOutcome::Composited(frame) => (frame, None),
            MaskOutcome::Skipped { frame, warning } => (frame, Some(warning)),
        }
    }
}

/// Draws every annotation onto a copy of `frame`, in order.
///
/// The input frame is never touched. Drawing failures abort; mask failures
/// are collected into [`AnnotatedFrame::warnings`].
pub fn annotate(frame: &Mat, annotations: &[Annotation<'_>]) -> Result<AnnotatedFrame> {
    let start = AnnotatedFrame {
        image: frame.try_clone()?,
        warnings: Vec::new(),
    };

    annotations.iter().try_fold(start, annotate_one)
}

fn annotate_one(state: AnnotatedFrame, ann: &Annotation<'_>) -> Result<AnnotatedFrame> {
    let AnnotatedFrame {
        mut image,
        mut warnings,
    } = state;

    let color = ann.color.to_scalar();
    let bbox = ann.bbox;

    imgproc::rectangle_points(
        &mut image,
        Point::new(bbox.x1, bbox.y1),
        Point::new(bbox.x2, bbox.y2),
        color,
        BOX_THICKNESS,
        LINE_8,
        0,
    )?;
    imgproc::put_text(
        &mut image,
        &ann.caption(),
        Point::new(bbox.x1, bbox.y1 - LABEL_OFFSET_Y),
        FONT_HERSHEY_SIMPLEX,
        LABEL_SCALE,
        color,
        BOX_THICKNESS,
        LINE_8,
        false,
    )?;

    if let Some(mask) = ann.mask {
        let (blended, warning) = apply_mask(image, mask, ann.color).into_parts();
        image = blended;
        if let Some(warning) = warning {
            tracing::warn!("{} for {}", warning, ann.detection.label);
            warnings.push(warning);
        }
    }

    Ok(AnnotatedFrame { image, warnings })
}

/// Blends a class-colored mask into `frame`, or hands the frame back untouched.
pub fn apply_mask(frame: Mat, mask: &Mask, color: Color) -> MaskOutcome {
    match blend_mask(&frame, mask, color) {
        Ok(blended) => MaskOutcome::Composited(blended),
        Err(e) => MaskOutcome::Skipped {
            frame,
            warning: format!("Mask overlay skipped (non-fatal): {:#}", e),
        },
    }
}

/// `0.7 * frame + 0.3 * color_inside_mask`, applied over the whole frame.
fn blend_mask(frame: &Mat, mask: &Mask, color: Color) -> Result<Mat> {
    let size = frame.size()?;
    let binary = binary_mask(mask, size)?;

    let solid =
        Mat::new_rows_cols_with_default(size.height, size.width, CV_8UC3, color.to_scalar())?;
    let mut masked =
        Mat::new_rows_cols_with_default(size.height, size.width, CV_8UC3, Scalar::all(0.0))?;
    solid.copy_to_masked(&mut masked, &binary)?;

    let mut blended = Mat::default();
    core::add_weighted(frame, FRAME_WEIGHT, &masked, MASK_WEIGHT, 0.0, &mut blended, -1)?;
    Ok(blended)
}

/// Midpoint of the mask's nominal range: probabilities in [0, 1], or bytes
/// in [0, 255] once any value exceeds 1.
pub fn nominal_midpoint(data: &[f32]) -> f64 {
    if data.iter().any(|&v| v > 1.0) {
        BYTE_MASK_MIDPOINT
    } else {
        PROB_MASK_MIDPOINT
    }
}

/// Resizes the mask to `size` and thresholds it at its nominal midpoint.
fn binary_mask(mask: &Mask, size: Size) -> Result<Mat> {
    if mask.width == 0 || mask.height == 0 {
        bail!("empty mask ({}x{})", mask.width, mask.height);
    }
    if mask.data.len() != mask.width * mask.height {
        bail!(
            "mask has {} values, expected {}x{}",
            mask.data.len(),
            mask.width,
            mask.height
        );
    }
    if mask.data.iter().any(|v| !v.is_finite()) {
        bail!("mask contains non-finite values");
    }

    let midpoint = nominal_midpoint(&mask.data);

    let mut grid = Mat::new_rows_cols_with_default(
        mask.height as i32,
        mask.width as i32,
        CV_32FC1,
        Scalar::all(0.0),
    )?;
    grid.data_typed_mut::<f32>()?.copy_from_slice(&mask.data);

    let mut resized = Mat::default();
    imgproc::resize(&grid, &mut resized, size, 0.0, 0.0, INTER_LINEAR)?;

    let mut thresholded = Mat::default();
    imgproc::threshold(&resized, &mut thresholded, midpoint, 255.0, THRESH_BINARY)?;

    let mut binary = Mat::default();
    thresholded.convert_to(&mut binary, CV_8U, 1.0, 0.0)?;
    Ok(binary)
}
