use crate::pipeline::types::{
    ClassTable, Color, Detection, Mask, PixelBox, RawDetection, MIN_CONFIDENCE,
};

/// A retained detection together with everything needed to draw it.
#[derive(Debug, Clone)]
pub struct Annotation<'a> {
    pub detection: Detection,
    pub bbox: PixelBox,
    pub color: Color,
    pub mask: Option<&'a Mask>,
}

impl Annotation<'_> {
    /// Text drawn above the box, e.g. `Corrosao (0.87)`.
    pub fn caption(&self) -> String {
        format!("{} ({:.2})", self.detection.label, self.detection.confidence)
    }
}

/// Converts normalized center/size into pixel corners on a `frame_w` x `frame_h` frame.
pub fn pixel_box(raw: &RawDetection, frame_w: i32, frame_h: i32) -> PixelBox {
    let w = frame_w as f32;
    let h = frame_h as f32;
    let box_w = raw.width * w;
    let box_h = raw.height * h;
    let cx = raw.x_center * w;
    let cy = raw.y_center * h;

    PixelBox {
        x1: (cx - box_w / 2.0).round() as i32,
        y1: (cy - box_h / 2.0).round() as i32,
        x2: (cx + box_w / 2.0).round() as i32,
        y2: (cy + box_h / 2.0).round() as i32,
    }
}

/// Resolves one raw detection, or drops it when below [`MIN_CONFIDENCE`].
pub fn normalize<'a>(
    raw: &'a RawDetection,
    frame_w: i32,
    frame_h: i32,
    classes: &ClassTable,
) -> Option<Annotation<'a>> {
    if raw.confidence < MIN_CONFIDENCE {
        return None;
    }

    let area = (raw.width * frame_w as f32) * (raw.height * frame_h as f32);
    let detection = Detection {
        label: classes.label(raw.class_id),
        confidence: raw.confidence,
        x_center: raw.x_center,
        y_center: raw.y_center,
        width: raw.width,
        height: raw.height,
        area,
    };

    Some(Annotation {
        detection,
        bbox: pixel_box(raw, frame_w, frame_h),
        color: classes.color(raw.class_id),
        mask: raw.mask.as_ref(),
    })
}

/// Normalizes a whole model output, keeping emission order.
pub fn normalize_all<'a>(
    raws: &'a [RawDetection],
    frame_w: i32,
    frame_h: i32,
    classes: &ClassTable,
) -> Vec<Annotation<'a>> {
    raws.iter()
        .filter_map(|raw| normalize(raw, frame_w, frame_h, classes))
        .collect()
}
