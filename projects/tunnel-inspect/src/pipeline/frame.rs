use crate::pipeline::annotate::annotate;
use crate::pipeline::detection::Detector;
use crate::pipeline::normalize::normalize_all;
use crate::pipeline::types::{ClassTable, Detection};
use anyhow::{Context, Result};
use opencv::core::Mat;
use opencv::prelude::*;
use std::sync::Arc;

pub const NO_DETECTIONS_LOG: &str = "No detections";

/// One frame after detection and annotation.
pub struct ProcessedFrame {
    pub image: Mat,
    pub detections: Vec<Detection>,
    pub log: String,
}

/// Model + normalizer + annotator for a single frame.
#[derive(Clone)]
pub struct FramePipeline {
    detector: Arc<dyn Detector>,
    classes: Arc<ClassTable>,
}

impl FramePipeline {
    pub fn new(detector: Arc<dyn Detector>, classes: Arc<ClassTable>) -> Self {
        Self { detector, classes }
    }

    pub fn classes(&self) -> &ClassTable {
        &self.classes
    }

    /// Runs the model on `frame` and returns an annotated copy.
    pub fn process(&self, frame: &Mat) -> Result<ProcessedFrame> {
        let inference = self
            .detector
            .detect(frame)
            .context("Model inference failed")?;

        let size = frame.size()?;
        let annotations = normalize_all(
            &inference.detections,
            size.width,
            size.height,
            &self.classes,
        );
        let annotated = annotate(frame, &annotations)?;

        let mut log = if inference.detections.is_empty() {
            NO_DETECTIONS_LOG.to_string()
        } else {
            inference
                .summary
                .clone()
                .unwrap_or_else(|| format!("{} detections", inference.detections.len()))
        };
        for warning in &annotated.warnings {
            log.push('\n');
            log.push_str(warning);
        }

        tracing::debug!(
            "Frame {}x{}: {} raw, {} kept",
            size.width,
            size.height,
            inference.detections.len(),
            annotations.len()
        );

        Ok(ProcessedFrame {
            image: annotated.image,
            detections: annotations.into_iter().map(|a| a.detection).collect(),
            log,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{blank_frame, raw, ScriptedDetector};
    use crate::pipeline::types::{Inference, Mask};

    fn pipeline(detector: ScriptedDetector) -> FramePipeline {
        FramePipeline::new(
            Arc::new(detector),
            Arc::new(ClassTable::new(["Umidade", "Corrosao", "Rachadura"])),
        )
    }

    #[test]
    fn test_no_detections_log() {
        let p = pipeline(ScriptedDetector::fixed(Inference::default()));
        let out = p.process(&blank_frame(64, 48)).unwrap();

        assert!(out.detections.is_empty());
        assert_eq!(out.log, NO_DETECTIONS_LOG);
    }

    #[test]
    fn test_filters_and_preserves_order() {
        let p = pipeline(ScriptedDetector::fixed(Inference {
            detections: vec![raw(2, 0.9), raw(0, 0.2), raw(1, 0.6)],
            summary: Some("64x48 3 detections".to_string()),
        }));
        let out = p.process(&blank_frame(64, 48)).unwrap();

        let labels: Vec<_> = out.detections.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["Rachadura", "Corrosao"]);
        assert_eq!(out.log, "64x48 3 detections");
    }

    #[test]
    fn test_only_low_confidence_uses_model_summary() {
        // The model did report something, so its summary is kept.
        let p = pipeline(ScriptedDetector::fixed(Inference {
            detections: vec![raw(0, 0.1)],
            summary: Some("1 detection".to_string()),
        }));
        let out = p.process(&blank_frame(32, 32)).unwrap();
        assert!(out.detections.is_empty());
        assert_eq!(out.log, "1 detection");
    }

    #[test]
    fn test_idempotent_without_masks() {
        let p = pipeline(ScriptedDetector::fixed(Inference {
            detections: vec![raw(0, 0.9), raw(1, 0.5)],
            summary: None,
        }));
        let frame = blank_frame(80, 60);

        let a = p.process(&frame).unwrap();
        let b = p.process(&frame).unwrap();

        assert_eq!(a.detections, b.detections);
        assert_eq!(a.log, b.log);
        assert_eq!(a.image.data_bytes().unwrap(), b.image.data_bytes().unwrap());
    }

    #[test]
    fn test_mask_failure_appended_to_log() {
        let mut masked = raw(0, 0.9);
        masked.mask = Some(Mask {
            width: 4,
            height: 4,
            data: vec![0.5; 3],
        });
        let p = pipeline(ScriptedDetector::fixed(Inference {
            detections: vec![masked],
            summary: Some("summary".to_string()),
        }));
        let out = p.process(&blank_frame(40, 40)).unwrap();

        assert_eq!(out.detections.len(), 1);
        let lines: Vec<_> = out.log.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "summary");
        assert!(lines[1].contains("non-fatal"));
    }

    #[test]
    fn test_detector_failure_propagates() {
        let p = pipeline(ScriptedDetector::failing("backend offline"));
        let err = p.process(&blank_frame(8, 8)).err().unwrap();
        assert!(format!("{:#}", err).contains("backend offline"));
    }
}
