use crate::error::ServiceError;
use crate::pipeline::frame::FramePipeline;
use crate::pipeline::package::JpegEncoder;
use crate::pipeline::types::Detection;
use crate::video::VideoReader;
use anyhow::{bail, Result};
use opencv::core::Mat;
use std::time::{Duration, Instant};

/// Seconds of source video between two sampled frames.
pub const DEFAULT_SAMPLE_INTERVAL_SECS: f64 = 3.0;

/// Frames between two samples: `round(fps * interval)`, or 0 when fps is unknown.
pub fn sampling_stride(fps: f64, interval_secs: f64) -> usize {
    let stride = (fps * interval_secs).round();
    if stride.is_finite() && stride > 0.0 {
        stride as usize
    } else {
        0
    }
}

/// A 1-based frame counter is sampled when it is a multiple of the stride.
/// A zero stride samples every frame.
pub fn is_sampled(counter: usize, stride: usize) -> bool {
    stride == 0 || counter % stride == 0
}

/// A trait for handling sampled video frames. This separates the "how to process"
/// from the "how to read and select" logic.
pub trait FrameProcessor {
    fn process(&mut self, counter: usize, frame: Mat) -> Result<()>;
}

/// Blanket implementation so any closure with the right signature
/// automatically implements FrameProcessor.
impl<F> FrameProcessor for F
where
    F: FnMut(usize, Mat) -> Result<()>,
{
    fn process(&mut self, counter: usize, frame: Mat) -> Result<()> {
        self(counter, frame)
    }
}

/// Aggregated output of one sampled video.
#[derive(Debug, Default)]
pub struct SampledVideo {
    /// Encoded annotated frames, in processing order
    pub frames: Vec<Vec<u8>>,
    pub detections: Vec<Detection>,
    /// One entry per entry in `frames`
    pub logs: Vec<String>,
}

pub struct ProcessingStats {
    pub frames_read: usize,
    pub frames_sampled: usize,
    pub duration: Duration,
}

/// Per-request sampling state.
pub struct VideoSamplingSession<'r> {
    pub reader: &'r mut dyn VideoReader,
    pub fps: f64,
    pub stride: usize,
    pub frame_counter: usize,
    pub start_time: Instant,
}

impl<'r> VideoSamplingSession<'r> {
    pub fn new(reader: &'r mut dyn VideoReader, interval_secs: f64) -> Result<Self> {
        let fps = reader.source_fps()?;
        let stride = sampling_stride(fps, interval_secs);

        tracing::info!(
            "Video session: fps={:.2}, stride={}, stream_frames={}",
            fps,
            stride,
            reader.frame_count().unwrap_or(0)
        );

        Ok(Self {
            reader,
            fps,
            stride,
            frame_counter: 0,
            start_time: Instant::now(),
        })
    }

    /// Decodes until the source runs dry, handing every sampled frame to `processor`.
    pub fn run<P>(mut self, mut processor: P) -> Result<ProcessingStats>
    where
        P: FrameProcessor,
    {
        let mut frames_sampled = 0;

        while let Ok(frame) = self.reader.next_frame() {
            self.frame_counter += 1;
            if !is_sampled(self.frame_counter, self.stride) {
                continue;
            }
            processor.process(self.frame_counter, frame)?;
            frames_sampled += 1;
        }

        let stats = ProcessingStats {
            frames_read: self.frame_counter,
            frames_sampled,
            duration: self.start_time.elapsed(),
        };
        tracing::info!(
            "Video session finished: fps={:.2}, read={}, sampled={}, elapsed={:.2}s",
            self.fps,
            stats.frames_read,
            stats.frames_sampled,
            stats.duration.as_secs_f64()
        );
        Ok(stats)
    }
}

/// Samples `reader` every `interval_secs` of video, running `pipeline` on each sample.
pub fn process_video(
    reader: &mut dyn VideoReader,
    pipeline: &FramePipeline,
    encoder: &JpegEncoder,
    interval_secs: f64,
) -> Result<SampledVideo> {
    let session = VideoSamplingSession::new(reader, interval_secs)?;
    let mut sampled = SampledVideo::default();

    session.run(|counter: usize, frame: Mat| -> Result<()> {
        let processed = pipeline.process(&frame)?;
        tracing::debug!("Sampled frame {}: {}", counter, processed.log);
        sampled.frames.push(encoder.encode(&processed.image)?);
        sampled.detections.extend(processed.detections);
        sampled.logs.push(processed.log);
        Ok(())
    })?;

    if sampled.frames.is_empty() {
        bail!(ServiceError::NoFramesProcessed);
    }

    Ok(sampled)
}
