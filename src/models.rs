use image::DynamicImage;
use serde::Serialize;

/// Axis-aligned box in pixel coordinates of the image it was detected on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn x_center(&self) -> f32 {
        (self.x1 + self.x2) / 2.0
    }

    /// Intersection over union, 0.0 for disjoint or degenerate boxes.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - intersection;
        if union > 0.0 { intersection / union } else { 0.0 }
    }
}

/// Candidate plate region reported by a plate detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// Labeled character box reported by a glyph recognizer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlyphBox {
    pub label: char,
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// A recognized character reduced to what plate assembly needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Glyph {
    pub label: char,
    pub x_center: f32,
    pub confidence: f32,
}

impl From<&GlyphBox> for Glyph {
    fn from(glyph: &GlyphBox) -> Self {
        Self {
            label: glyph.label,
            x_center: glyph.bbox.x_center(),
            confidence: glyph.confidence,
        }
    }
}

/// Integer crop bounds, half-open: `[x1, x2) x [y1, y2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CropRegion {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl CropRegion {
    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }
}

/// Sub-image around the best plate detection of a frame.
#[derive(Debug, Clone)]
pub struct PlateCrop {
    pub image: DynamicImage,
    pub region: CropRegion,
    pub confidence: f32,
}

/// Result of running the full cascade on one frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlateReading {
    /// Plate characters left to right; empty when nothing was readable.
    pub plate: String,
    pub region: Option<CropRegion>,
    pub plate_confidence: Option<f32>,
}
