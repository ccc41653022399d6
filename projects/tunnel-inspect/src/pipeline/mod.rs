// Detection post-processing: normalize, annotate, package

pub mod annotate;
pub mod detection;
pub mod frame;
pub mod normalize;
pub mod package;
pub mod types;
