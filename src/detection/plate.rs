use image::{DynamicImage, GenericImageView};
use tracing::info;

use crate::detection::{InferenceParams, PlateDetector};
use crate::error::ModelError;
use crate::models::{BoundingBox, CropRegion, Detection, PlateCrop};

pub const PLATE_PARAMS: InferenceParams = InferenceParams {
    confidence: 0.5,
    iou: 0.5,
};

/// Pixels added on every side of the selected plate box before cropping.
pub const PLATE_PADDING: u32 = 10;

/// Find the most confident plate in `frame` and crop it.
///
/// Returns `Ok(None)` when no detection reaches the confidence floor.
pub fn detect_and_crop(
    detector: &dyn PlateDetector,
    frame: &DynamicImage,
) -> Result<Option<PlateCrop>, ModelError> {
    let detections = detector.detect(frame, PLATE_PARAMS)?;

    let Some(best) = select_best(&detections, PLATE_PARAMS.confidence) else {
        info!(candidates = detections.len(), "no license plate detected or confidence too low");
        return Ok(None);
    };

    let (width, height) = frame.dimensions();
    let Some(region) = padded_region(&best.bbox, width, height, PLATE_PADDING) else {
        info!(bbox = ?best.bbox, "best plate box lies outside the frame");
        return Ok(None);
    };

    info!(confidence = best.confidence, ?region, "detected a plate");
    Ok(Some(PlateCrop {
        image: frame.crop_imm(region.x1, region.y1, region.width(), region.height()),
        region,
        confidence: best.confidence,
    }))
}

/// The detection with strictly maximum confidence among those at or above
/// `floor`. Exact ties keep the earlier detection.
pub fn select_best(detections: &[Detection], floor: f32) -> Option<&Detection> {
    detections
        .iter()
        .filter(|detection| detection.confidence >= floor)
        .fold(None, |best: Option<&Detection>, detection| match best {
            Some(current) if detection.confidence <= current.confidence => Some(current),
            _ => Some(detection),
        })
}

/// Truncate `bbox` to whole pixels, grow it by `padding` and clip it to the
/// frame. `None` if nothing of the box remains inside the frame.
pub fn padded_region(
    bbox: &BoundingBox,
    width: u32,
    height: u32,
    padding: u32,
) -> Option<CropRegion> {
    let padding = i64::from(padding);
    let clip = |value: i64, limit: u32| value.clamp(0, i64::from(limit)) as u32;

    let x1 = clip(bbox.x1 as i64 - padding, width);
    let y1 = clip(bbox.y1 as i64 - padding, height);
    let x2 = clip(bbox.x2 as i64 + padding, width);
    let y2 = clip(bbox.y2 as i64 + padding, height);

    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some(CropRegion { x1, y1, x2, y2 })
}
