/// Box in normalized model coordinates: center point plus extent, all in 0..1.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NormalizedBox {
    pub center_x: f32,
    pub center_y: f32,
    pub width: f32,
    pub height: f32,
}

impl NormalizedBox {
    pub fn new(center_x: f32, center_y: f32, width: f32, height: f32) -> Self {
        Self {
            center_x,
            center_y,
            width,
            height,
        }
    }

    /// Scale to a frame of `frame_width` x `frame_height` pixels, converting
    /// center form to top-left corner form.
    pub fn to_pixels(&self, frame_width: u32, frame_height: u32) -> PixelBox {
        let fw = frame_width as f32;
        let fh = frame_height as f32;
        let center_x = self.center_x * fw;
        let center_y = self.center_y * fh;
        let width = self.width * fw;
        let height = self.height * fh;
        PixelBox {
            x: (center_x - width / 2.0).round() as i32,
            y: (center_y - height / 2.0).round() as i32,
            width: width.round().max(0.0) as u32,
            height: height.round().max(0.0) as u32,
        }
    }
}

/// Box in pixel space of the rendered frame. `x`/`y` may be negative when a
/// detection hangs off the top-left edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelBox {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// One raw row emitted by an inference engine, before filtering.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectionCandidate {
    pub class_index: usize,
    /// Score in 0..=1.
    pub confidence: f32,
    pub bbox: NormalizedBox,
}

/// A candidate that passed the detection filter.
#[derive(Clone, Debug, PartialEq)]
pub struct AcceptedDetection {
    pub label: String,
    pub confidence: f32,
    pub bbox: PixelBox,
}

impl AcceptedDetection {
    /// Overlay caption, e.g. `"person 90%"`.
    pub fn caption(&self) -> String {
        let percent = (self.confidence * 100.0).round() as u32;
        format!("{} {}%", self.label, percent)
    }
}
