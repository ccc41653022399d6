pub mod opencv_reader;
pub mod processor;

use anyhow::Result;
use opencv::core::Mat;

/// Sequential frame source for the sampling pipeline.
pub trait VideoReader: Send {
    /// Frames per second reported by the container; 0.0 when unknown.
    fn source_fps(&self) -> Result<f64>;
    /// Frame count from metadata, for logging only.
    fn frame_count(&self) -> Result<usize>;
    /// Next decoded frame; `Err` at end of stream or on a read failure.
    fn next_frame(&mut self) -> Result<Mat>;
}
