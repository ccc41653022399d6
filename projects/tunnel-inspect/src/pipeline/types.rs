use opencv::core::Scalar;
use serde::Serialize;

/// Detections below this confidence never leave the normalizer.
pub const MIN_CONFIDENCE: f32 = 0.3;

/// Per-instance segmentation mask at model resolution, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
}

/// One object hypothesis as emitted by the model, before filtering.
///
/// Box coordinates are normalized to [0, 1] relative to the frame that was
/// handed to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub class_id: usize,
    pub confidence: f32,
    pub x_center: f32,
    pub y_center: f32,
    pub width: f32,
    pub height: f32,
    pub mask: Option<Mask>,
}

/// Output of one model invocation on one frame.
#[derive(Debug, Clone, Default)]
pub struct Inference {
    pub detections: Vec<RawDetection>,
    /// Human-readable per-frame summary produced by the model, if any.
    pub summary: Option<String>,
}

/// Filtered, labeled detection record returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    #[serde(rename = "class")]
    pub label: String,
    pub confidence: f32,
    pub x_center: f32,
    pub y_center: f32,
    pub width: f32,
    pub height: f32,
    /// Box area in pixels of the source frame
    pub area: f32,
}

/// Box corners in pixel coordinates of the source frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

/// Display color in OpenCV channel order (B, G, R).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub b: u8,
    pub g: u8,
    pub r: u8,
}

impl Color {
    pub const WHITE: Color = Color::bgr(255, 255, 255);

    pub const fn bgr(b: u8, g: u8, r: u8) -> Self {
        Self { b, g, r }
    }

    pub fn to_scalar(self) -> Scalar {
        Scalar::new(self.b as f64, self.g as f64, self.r as f64, 0.0)
    }
}

/// Fixed colors for the first class ids; the rest fall back to white.
const CLASS_COLORS: [Color; 3] = [
    Color::bgr(0, 255, 0), // Umidade
    Color::bgr(0, 0, 255), // Corrosao
    Color::bgr(255, 0, 0), // Rachadura
];

/// Class id lookups for labels and display colors, built once at startup.
#[derive(Debug, Clone)]
pub struct ClassTable {
    names: Vec<String>,
}

impl ClassTable {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn label(&self, class_id: usize) -> String {
        self.names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("Classe {}", class_id))
    }

    pub fn color(&self, class_id: usize) -> Color {
        CLASS_COLORS.get(class_id).copied().unwrap_or(Color::WHITE)
    }
}
