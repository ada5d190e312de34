//! YOLOv8-style detectors running on the `rten` runtime.
//!
//! Both cascade models share one output layout, `[1, 4 + classes, anchors]`,
//! where the first four rows hold `cx, cy, w, h` in model input pixels and the
//! remaining rows hold per-class scores.

use std::path::Path;

use image::DynamicImage;
use rten::Model;
use rten_tensor::NdTensor;
use rten_tensor::prelude::*;
use tracing::debug;

use crate::detection::{GlyphRecognizer, InferenceParams, PlateDetector, preprocessing};
use crate::error::ModelError;
use crate::models::{BoundingBox, Detection, GlyphBox};

/// Decoded box before class names are attached.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawBox {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub class_id: usize,
}

struct YoloModel {
    model: Model,
    input_size: u32,
}

impl YoloModel {
    fn load(path: &Path, input_size: u32) -> Result<Self, ModelError> {
        let model = Model::load_file(path).map_err(|err| ModelError::Load {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        Ok(Self { model, input_size })
    }

    fn infer(&self, img: &DynamicImage, params: InferenceParams) -> Result<Vec<RawBox>, ModelError> {
        let input = preprocessing::to_input_tensor(img, self.input_size);

        let output = self
            .model
            .run_one(input.tensor.view().into(), None)
            .map_err(|err| ModelError::Inference(err.to_string()))?;
        let output: NdTensor<f32, 3> = output
            .try_into()
            .map_err(|err| ModelError::Inference(format!("unexpected model output: {err:?}")))?;

        let boxes = decode_output(&output, params.confidence, input.scale_x, input.scale_y)?;
        let kept = non_max_suppression(boxes, params.iou);
        debug!(kept = kept.len(), "yolo postprocess done");
        Ok(kept)
    }
}

/// Turn raw model output into boxes in source image coordinates, keeping the
/// best class of every anchor whose score reaches `confidence`.
pub fn decode_output(
    output: &NdTensor<f32, 3>,
    confidence: f32,
    scale_x: f32,
    scale_y: f32,
) -> Result<Vec<RawBox>, ModelError> {
    let shape = output.shape();
    if shape[0] != 1 || shape[1] < 5 {
        return Err(ModelError::Inference(format!(
            "expected output shape [1, 4 + classes, anchors], got {shape:?}"
        )));
    }
    let rows = shape[1];
    let anchors = shape[2];

    let mut boxes = Vec::new();
    for anchor in 0..anchors {
        let (class_id, score) = (4..rows)
            .map(|row| (row - 4, output[[0, row, anchor]]))
            .fold((0, f32::MIN), |best, candidate| {
                if candidate.1 > best.1 { candidate } else { best }
            });

        if score < confidence {
            continue;
        }

        let cx = output[[0, 0, anchor]];
        let cy = output[[0, 1, anchor]];
        let w = output[[0, 2, anchor]];
        let h = output[[0, 3, anchor]];

        boxes.push(RawBox {
            bbox: BoundingBox::new(
                (cx - w / 2.0) * scale_x,
                (cy - h / 2.0) * scale_y,
                (cx + w / 2.0) * scale_x,
                (cy + h / 2.0) * scale_y,
            ),
            confidence: score,
            class_id,
        });
    }
    Ok(boxes)
}

/// Per-class greedy NMS; the result is ordered by descending confidence.
pub fn non_max_suppression(mut boxes: Vec<RawBox>, iou_threshold: f32) -> Vec<RawBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<RawBox> = Vec::new();
    for candidate in boxes {
        let suppressed = kept.iter().any(|best| {
            best.class_id == candidate.class_id && best.bbox.iou(&candidate.bbox) >= iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

/// Single-class plate localizer.
pub struct YoloPlateDetector {
    model: YoloModel,
}

impl YoloPlateDetector {
    pub fn load(path: &Path, input_size: u32) -> Result<Self, ModelError> {
        Ok(Self {
            model: YoloModel::load(path, input_size)?,
        })
    }
}

impl PlateDetector for YoloPlateDetector {
    fn detect(
        &self,
        frame: &DynamicImage,
        params: InferenceParams,
    ) -> Result<Vec<Detection>, ModelError> {
        Ok(self
            .model
            .infer(frame, params)?
            .into_iter()
            .map(|raw| Detection {
                bbox: raw.bbox,
                confidence: raw.confidence,
            })
            .collect())
    }
}

/// Character detector; class `i` is labeled with `classes[i]`.
pub struct YoloGlyphRecognizer {
    model: YoloModel,
    classes: Vec<char>,
}

impl YoloGlyphRecognizer {
    pub fn load(path: &Path, input_size: u32, classes: Vec<char>) -> Result<Self, ModelError> {
        if classes.is_empty() {
            return Err(ModelError::Load {
                path: path.to_path_buf(),
                reason: "glyph class list is empty".to_string(),
            });
        }
        Ok(Self {
            model: YoloModel::load(path, input_size)?,
            classes,
        })
    }
}

impl GlyphRecognizer for YoloGlyphRecognizer {
    fn recognize(
        &self,
        crop: &DynamicImage,
        params: InferenceParams,
    ) -> Result<Vec<GlyphBox>, ModelError> {
        let raw = self.model.infer(crop, params)?;
        let mut glyphs = Vec::with_capacity(raw.len());
        for raw in raw {
            match self.classes.get(raw.class_id) {
                Some(&label) => glyphs.push(GlyphBox {
                    label,
                    bbox: raw.bbox,
                    confidence: raw.confidence,
                }),
                None => debug!(class_id = raw.class_id, "glyph class has no label, skipped"),
            }
        }
        Ok(glyphs)
    }
}
